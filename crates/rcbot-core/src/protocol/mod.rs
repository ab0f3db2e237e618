//! Protocol module containing the outgoing command model, the JSON codec and
//! the request-id generator.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{parse, serialize, InboundMessage, ProtocolError, PING_MARKER};
pub use messages::*;
pub use sequence::RequestIdGenerator;
