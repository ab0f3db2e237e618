//! Transport adapters for the session's [`Transport`] port.
//!
//! - **`websocket`**: the production transport over `tokio-tungstenite`.
//! - **`mock`**: an in-memory recording transport for tests.

pub mod mock;
pub mod websocket;

pub use crate::application::transport::{Transport, TransportError, TransportEvent};
pub use mock::RecordingTransport;
pub use websocket::WebSocketTransport;
