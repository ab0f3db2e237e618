//! Domain module: the logged-in identity and the typed events derived from
//! inbound frames.

pub mod events;
pub mod identity;

pub use events::{EventClassifier, RealtimeEvent, StreamEventClassifier, UserRef};
pub use identity::AuthenticatedIdentity;
