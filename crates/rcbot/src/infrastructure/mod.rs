//! Infrastructure layer: adapters that connect the session to the outside
//! world.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `rcbot_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`transport`** – the WebSocket client transport plus a recording mock.
//! - **`channels`** – mpsc-backed `EventSink` and `HostLifecycle`
//!   implementations the binary (and integration tests) consume.
//! - **`storage`** – TOML configuration loading and validation.

pub mod channels;
pub mod storage;
pub mod transport;
