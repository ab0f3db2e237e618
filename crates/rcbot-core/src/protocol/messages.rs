//! Outgoing command model for the realtime protocol.
//!
//! Every frame the client sends is one [`OutgoingCommand`].  Serde's
//! `#[serde(tag = "msg")]` puts the variant name into the `msg` field, which is
//! exactly how the server discriminates frames:
//!
//! ```json
//! {"msg":"connect","version":"1","support":["1"]}
//! {"msg":"method","id":"7","method":"sendMessage","params":[{"rid":"GENERAL","msg":"hi"}]}
//! {"msg":"sub","id":"8","name":"stream-room-messages","params":["__my_messages__",false]}
//! {"msg":"unsub","id":"8"}
//! {"msg":"pong"}
//! ```
//!
//! # Identity slots
//!
//! `method` and `sub` commands carry an `id` that the server echoes in its
//! reply.  The id is left empty when the command is built and is filled in by
//! the session right before the frame is serialized (see
//! [`OutgoingCommand::assign_id`]).  `connect` is the handshake command and is
//! correlated by a fixed key instead.  `unsub` and `pong` are fire-and-forget.

use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// DDP protocol version announced in the handshake.
pub const DDP_VERSION: &str = "1";

/// Server method that authenticates the connection.
pub const LOGIN_METHOD: &str = "login";

/// Server method that posts a chat message into a room.
pub const SEND_MESSAGE_METHOD: &str = "sendMessage";

/// Stream that carries chat messages.
pub const ROOM_MESSAGES_STREAM: &str = "stream-room-messages";

/// Pseudo-room that subscribes to every room the user participates in.
pub const MY_MESSAGES_ROOM: &str = "__my_messages__";

/// Digest algorithm name the server expects next to a hashed password.
pub const PASSWORD_ALGORITHM: &str = "sha-256";

/// A single frame the client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum OutgoingCommand {
    /// Handshake.  Must be the first frame after the socket opens, otherwise
    /// the server closes the connection.
    Connect {
        version: String,
        support: Vec<String>,
    },

    /// Remote procedure call (`login`, `sendMessage`, ...).
    Method(MethodCall),

    /// Subscription to a named publication or stream.
    Sub(Subscription),

    /// Cancels a subscription; `id` is the id of the original `sub`.
    Unsub { id: String },

    /// Keep-alive reply to a server `ping`.
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

/// Payload of a `method` frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodCall {
    /// Request id, assigned by the session at send time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub method: String,
    pub params: Vec<Value>,
}

/// Payload of a `sub` frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscription {
    /// Subscription id, assigned by the session at send time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub params: Vec<Value>,
}

impl OutgoingCommand {
    /// The handshake command: `{"msg":"connect","version":"1","support":["1"]}`.
    pub fn connect() -> Self {
        Self::Connect {
            version: DDP_VERSION.to_string(),
            support: vec![DDP_VERSION.to_string()],
        }
    }

    /// A `login` method call with a SHA-256 digested password.
    ///
    /// The plain-text password never goes over the wire.
    pub fn login(username: &str, password: &str) -> Self {
        Self::method(
            LOGIN_METHOD,
            vec![json!({
                "user": { "username": username },
                "password": {
                    "digest": password_digest(password),
                    "algorithm": PASSWORD_ALGORITHM,
                },
            })],
        )
    }

    /// A generic method call without an id.
    pub fn method(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self::Method(MethodCall {
            id: None,
            method: method.into(),
            params,
        })
    }

    /// A `sendMessage` call posting `text` into `room_id`.
    pub fn send_message(room_id: &str, text: &str) -> Self {
        Self::method(SEND_MESSAGE_METHOD, vec![json!({ "rid": room_id, "msg": text })])
    }

    /// A subscription without an id.
    pub fn subscribe(name: impl Into<String>, params: Vec<Value>) -> Self {
        Self::Sub(Subscription {
            id: None,
            name: name.into(),
            params,
        })
    }

    /// Subscription to every room message visible to the logged-in user.
    pub fn subscribe_my_messages() -> Self {
        Self::subscribe(ROOM_MESSAGES_STREAM, vec![json!(MY_MESSAGES_ROOM), json!(false)])
    }

    /// Cancels the subscription that was sent with id `subscription_id`.
    pub fn unsubscribe(subscription_id: u64) -> Self {
        Self::Unsub {
            id: subscription_id.to_string(),
        }
    }

    /// Keep-alive reply.  `id` echoes the ping's id when it had one.
    pub fn pong(id: Option<String>) -> Self {
        Self::Pong { id }
    }

    /// Returns `true` if this command has an identity slot the session must fill.
    pub fn carries_identity(&self) -> bool {
        matches!(self, Self::Method(_) | Self::Sub(_))
    }

    /// Returns `true` for the handshake command.
    pub fn is_handshake(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }

    /// Stores `id` in the identity slot.  No-op for commands without one.
    pub fn assign_id(&mut self, id: u64) {
        match self {
            Self::Method(call) => call.id = Some(id.to_string()),
            Self::Sub(sub) => sub.id = Some(id.to_string()),
            Self::Connect { .. } | Self::Unsub { .. } | Self::Pong { .. } => {}
        }
    }

    /// Returns the id currently stored on the command, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Method(call) => call.id.as_deref(),
            Self::Sub(sub) => sub.id.as_deref(),
            Self::Unsub { id } => Some(id),
            Self::Pong { id } => id.as_deref(),
            Self::Connect { .. } => None,
        }
    }

    /// Short name for log lines: the method or stream name, else the `msg` type.
    pub fn describe(&self) -> &str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Method(call) => &call.method,
            Self::Sub(sub) => &sub.name,
            Self::Unsub { .. } => "unsub",
            Self::Pong { .. } => "pong",
        }
    }
}

/// Lowercase hex SHA-256 of `password`, as the `login` method expects.
pub fn password_digest(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
