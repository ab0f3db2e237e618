//! Transport port: the duplex channel the session drives.
//!
//! The session never touches sockets.  It asks a [`Transport`] to connect,
//! send and disconnect, and the transport reports what happened as
//! [`TransportEvent`]s on an mpsc channel.  The session drains that channel on
//! a single task, which gives the serial connect/message/disconnect callback
//! order the protocol relies on.

use thiserror::Error;

/// Errors a transport can return from [`Transport::send`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// There is no open connection to send on.
    #[error("transport is not connected")]
    NotConnected,

    /// The connection task is gone; the frame could not be queued.
    #[error("transport channel closed")]
    ChannelClosed,
}

/// Lifecycle and data notifications emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The channel is up.  `session_id` identifies this connection epoch.
    Connected { session_id: String },
    /// One inbound text frame.
    Message(String),
    /// The channel is down, or a connection attempt failed.
    Disconnected { session_id: String },
}

/// The duplex channel abstraction consumed by the session.
///
/// All methods are non-blocking.  Outcomes of `connect` and `disconnect`
/// surface later as [`TransportEvent`]s.
pub trait Transport: Send + Sync {
    /// Starts a connection attempt to `endpoint`.
    ///
    /// Ignored while an attempt is in flight or a connection is open, so at
    /// most one attempt exists at a time.
    fn connect(&self, endpoint: &str);

    /// Queues one text frame for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] when no connection is open.
    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Closes the current connection (or aborts the current attempt).
    fn disconnect(&self);
}
