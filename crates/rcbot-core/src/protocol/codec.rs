//! JSON codec for the realtime protocol.
//!
//! Outbound, [`serialize`] turns an [`OutgoingCommand`] into one compact JSON
//! text frame.  Inbound, [`parse`] turns a text frame into an
//! [`InboundMessage`]: a thin wrapper around the parsed JSON tree with typed
//! accessors for the handful of fields the session core needs (`msg`, `id`,
//! `error`, `result`, `subs`).
//!
//! Inbound frames are *not* deserialized into a closed enum.  The server sends
//! many frame types the session does not care about, and the event classifier
//! needs the raw tree anyway, so the codec only validates that a frame is a
//! JSON object and leaves interpretation to the caller.

use serde_json::{Map, Value};
use thiserror::Error;

use super::messages::OutgoingCommand;

/// Name of the message-type field present on every frame.
pub const MSG_FIELD: &str = "msg";

/// `msg` value of a server keep-alive ping.
pub const PING_MARKER: &str = "ping";

/// `msg` value of a successful handshake reply.
pub const CONNECTED_MARKER: &str = "connected";

/// `msg` value of a rejected handshake (unsupported protocol version).
pub const FAILED_MARKER: &str = "failed";

/// `msg` value of a subscription-ready notification.
pub const READY_MARKER: &str = "ready";

/// `msg` value of a method result.
pub const RESULT_MARKER: &str = "result";

/// `msg` value of a collection change push.
pub const CHANGED_MARKER: &str = "changed";

/// `msg` value of a collection insert push.
pub const ADDED_MARKER: &str = "added";

/// `msg` value of a collection delete push.
pub const REMOVED_MARKER: &str = "removed";

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The command could not be converted to JSON text.
    #[error("failed to serialize command: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The inbound frame is not valid JSON.
    #[error("failed to parse frame: {0}")]
    Parse(#[source] serde_json::Error),

    /// The inbound frame is valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
}

/// Serializes a command to its wire text.
///
/// # Errors
///
/// Returns [`ProtocolError::Serialize`] if serde fails, which for the command
/// types in this crate can only happen with non-string map keys inside
/// user-supplied `params`.
pub fn serialize(command: &OutgoingCommand) -> Result<String, ProtocolError> {
    serde_json::to_string(command).map_err(ProtocolError::Serialize)
}

/// Parses one inbound text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Parse`] for malformed JSON and
/// [`ProtocolError::NotAnObject`] for JSON that is not an object.
pub fn parse(text: &str) -> Result<InboundMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::Parse)?;
    InboundMessage::from_value(value)
}

/// A parsed inbound frame.
///
/// Cheap to clone relative to the network cost of receiving it; the session
/// clones it once when a reply handler and the classifier both need it.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    json: Map<String, Value>,
}

impl InboundMessage {
    /// Wraps an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotAnObject`] if `value` is not an object.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        match value {
            Value::Object(json) => Ok(Self { json }),
            _ => Err(ProtocolError::NotAnObject),
        }
    }

    /// The `msg` type field, if present and a string.
    pub fn msg(&self) -> Option<&str> {
        text(&self.json, MSG_FIELD)
    }

    /// Returns `true` for a server keep-alive ping.
    pub fn is_ping(&self) -> bool {
        self.msg() == Some(PING_MARKER)
    }

    /// The raw `id` field, stringified.  The server echoes our ids as strings
    /// but numeric ids are accepted as well.
    pub fn id(&self) -> Option<String> {
        match self.json.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Returns `true` if the frame has a non-null `id` field.
    pub fn has_id(&self) -> bool {
        self.json.get("id").is_some_and(|v| !v.is_null())
    }

    /// Returns `true` for `added`/`changed`/`removed` collection pushes,
    /// whose `id` names a document rather than a request.
    pub fn is_collection_push(&self) -> bool {
        matches!(
            self.msg(),
            Some(ADDED_MARKER) | Some(CHANGED_MARKER) | Some(REMOVED_MARKER)
        )
    }

    /// The `id` field interpreted as a numeric request id.  Collection pushes
    /// never carry one.
    pub fn request_id(&self) -> Option<u64> {
        if self.is_collection_push() {
            return None;
        }
        match self.json.get("id")? {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    /// Subscription ids listed in a `ready` frame.
    pub fn ready_subs(&self) -> Vec<u64> {
        if self.msg() != Some(READY_MARKER) {
            return Vec::new();
        }
        self.json
            .get("subs")
            .and_then(Value::as_array)
            .map(|subs| {
                subs.iter()
                    .filter_map(|s| match s {
                        Value::String(s) => s.parse().ok(),
                        Value::Number(n) => n.as_u64(),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns `true` if this frame looks like a reply to the handshake.
    ///
    /// The handshake reply does not echo a request id.  It is either a
    /// `connected`/`failed` frame or a bare frame without a `msg` type.
    pub fn is_handshake_shaped(&self) -> bool {
        if self.has_id() {
            return false;
        }
        matches!(self.msg(), None | Some(CONNECTED_MARKER) | Some(FAILED_MARKER))
    }

    /// The `error` field, if present and non-null.
    pub fn error(&self) -> Option<&Value> {
        self.json.get("error").filter(|v| !v.is_null())
    }

    /// Human-readable error text: `error.message`, then `error.reason`, then
    /// the error value itself when it is a plain string.
    pub fn error_message(&self) -> Option<String> {
        let error = self.error()?;
        match error {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => text(obj, "message")
                .or_else(|| text(obj, "reason"))
                .map(str::to_string),
            other => Some(other.to_string()),
        }
    }

    /// The `result` field, if present and non-null.
    pub fn result(&self) -> Option<&Value> {
        self.json.get("result").filter(|v| !v.is_null())
    }

    /// Arbitrary top-level field access.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.json.get(field)
    }

    /// A top-level string field.
    pub fn text(&self, field: &str) -> Option<&str> {
        text(&self.json, field)
    }

    /// Borrow the underlying JSON object.
    pub fn as_object(&self) -> &Map<String, Value> {
        &self.json
    }

    /// Consume the message and return the JSON tree.
    pub fn into_value(self) -> Value {
        Value::Object(self.json)
    }
}

/// Reads a non-null string attribute.
pub fn text<'a>(json: &'a Map<String, Value>, attr: &str) -> Option<&'a str> {
    json.get(attr).and_then(Value::as_str)
}

/// Reads a timestamp in milliseconds since the Unix epoch.
///
/// Accepts both the bare number form and the EJSON `{"$date": <ms>}` form the
/// server uses for dates.
pub fn millis(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::Object(obj) => obj.get("$date").and_then(Value::as_u64),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
