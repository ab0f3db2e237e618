//! `rcbot`: a persistent client session for a chat server's realtime API.
//!
//! The session connects over a WebSocket, performs the protocol handshake and
//! a password login, keeps the connection alive by answering server pings,
//! correlates replies with the requests that caused them, turns stream frames
//! into typed [`RealtimeEvent`](rcbot_core::RealtimeEvent)s and hands them to
//! an [`EventSink`](application::session::EventSink).  Lost connections are
//! re-established a bounded number of times before the host is told to give
//! up.
//!
//! Protocol types, the JSON codec and the event classifier live in
//! `rcbot_core`, which does no I/O.

pub mod application;
pub mod infrastructure;

pub use application::session::{
    EventSink, HostLifecycle, Session, SessionError, SessionSettings, SinkError,
    MAX_RECONNECT_ATTEMPTS,
};
pub use application::transport::{Transport, TransportError, TransportEvent};
