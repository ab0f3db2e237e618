//! # rcbot-core
//!
//! Shared library for rcbot containing the realtime wire protocol, the
//! authenticated-identity snapshot and the typed domain events.
//!
//! This crate has zero dependencies on sockets, async runtimes or the file
//! system.  Everything in it operates on in-memory values, which keeps it easy
//! to test and to reuse from other front-ends.
//!
//! # Architecture overview (for beginners)
//!
//! The chat server speaks a JSON dialect of DDP over a WebSocket.  Every frame
//! is a single JSON object with a `msg` field naming its type:
//!
//! ```text
//! client → server   {"msg":"connect","version":"1","support":["1"]}
//! server → client   {"msg":"connected","session":"Xy7..."}
//! client → server   {"msg":"method","method":"login","id":"1","params":[...]}
//! server → client   {"msg":"result","id":"1","result":{"id":"...","token":"..."}}
//! server → client   {"msg":"ping"}
//! client → server   {"msg":"pong"}
//! ```
//!
//! This crate defines:
//!
//! - **`protocol`** – the outgoing command model, the JSON codec and the
//!   request-id generator used to correlate requests with replies.
//!
//! - **`domain`** – what the frames *mean*: the identity returned by a
//!   successful login and the classifier that turns server pushes into
//!   [`RealtimeEvent`] values.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `rcbot_core::OutgoingCommand` instead of the full module path.
pub use domain::events::{
    EventClassifier, MessageEvent, RealtimeEvent, RoomMembershipEvent, StreamEventClassifier,
    TopicChangedEvent, UserRef,
};
pub use domain::identity::{AuthenticatedIdentity, IdentityError};
pub use protocol::codec::{parse, serialize, InboundMessage, ProtocolError};
pub use protocol::messages::OutgoingCommand;
pub use protocol::sequence::RequestIdGenerator;
