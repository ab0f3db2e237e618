//! mpsc-backed adapters for the session's outbound ports.
//!
//! The session publishes from worker tasks and reports fatal errors from
//! whichever task hit them.  Forwarding both into unbounded channels lets the
//! binary consume them in one `select!` loop.

use rcbot_core::RealtimeEvent;
use tokio::sync::mpsc;
use tracing::warn;

use crate::application::session::{EventSink, HostLifecycle, SessionError, SinkError};

/// [`EventSink`] that forwards every event into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<RealtimeEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<RealtimeEvent>) -> Self {
        Self { tx }
    }

    /// Creates a sink together with the receiver its events arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RealtimeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: RealtimeEvent) -> Result<(), SinkError> {
        self.tx.send(event).map_err(|_| SinkError::Closed)
    }
}

/// [`HostLifecycle`] that forwards fatal errors into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelHost {
    tx: mpsc::UnboundedSender<SessionError>,
}

impl ChannelHost {
    pub fn new(tx: mpsc::UnboundedSender<SessionError>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionError>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl HostLifecycle for ChannelHost {
    fn fatal(&self, error: SessionError) {
        if let Err(mpsc::error::SendError(error)) = self.tx.send(error) {
            warn!("host is gone; fatal error dropped: {error}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
