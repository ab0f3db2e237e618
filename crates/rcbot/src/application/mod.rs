//! Application layer: the session use case and the pieces it is built from.
//!
//! - **`session`** – connection lifecycle, handshake and login, inbound
//!   dispatch, filtering and the reconnect policy.
//! - **`reply_matcher`** – pending reply handlers keyed by request id.
//! - **`worker_pool`** – bounded concurrent processing of inbound frames.
//! - **`transport`** – the `Transport` port the session drives.

pub mod reply_matcher;
pub mod session;
pub mod transport;
pub mod worker_pool;
