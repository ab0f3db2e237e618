//! Recording transport for tests.
//!
//! # Why a recording transport?
//!
//! The real [`WebSocketTransport`](super::WebSocketTransport) needs a running
//! server.  `RecordingTransport` keeps everything in memory: connect requests,
//! every frame passed to `send`, and disconnect requests are recorded so tests
//! can assert exactly what the session put on the wire and in what order.
//!
//! The transport never emits [`TransportEvent`](crate::application::transport::TransportEvent)s
//! by itself.  Tests play the server's part by calling the session callbacks
//! (`connected`, `on_message`, `disconnected`) directly.
//!
//! # `should_fail` flag
//!
//! Set `should_fail` to make every `send` return
//! [`TransportError::NotConnected`], which exercises the session's
//! send-failure paths.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::application::transport::{Transport, TransportError};

#[derive(Debug, Default)]
pub struct RecordingTransport {
    /// Endpoints passed to `connect`, in call order.
    pub connects: Mutex<Vec<String>>,
    /// Text frames accepted by `send`, in call order.
    pub sent: Mutex<Vec<String>>,
    /// Number of `disconnect` calls.
    pub disconnects: AtomicUsize,
    /// When `true`, `send` refuses every frame.
    pub should_fail: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Sent frames parsed back into JSON values.  Frames that are not valid
    /// JSON become `Value::Null`.
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap_or(Value::Null))
            .collect()
    }

    /// Sent frames whose `msg` field equals `kind`.
    pub fn sent_of_kind(&self, kind: &str) -> Vec<Value> {
        self.sent_json()
            .into_iter()
            .filter(|frame| frame.get("msg").and_then(Value::as_str) == Some(kind))
            .collect()
    }

    pub fn last_sent(&self) -> Option<Value> {
        self.sent_json().pop()
    }
}

impl Transport for RecordingTransport {
    fn connect(&self, endpoint: &str) {
        self.connects.lock().push(endpoint.to_owned());
    }

    fn send(&self, text: String) -> Result<(), TransportError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
