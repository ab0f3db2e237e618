//! Correlates inbound replies with the requests that are waiting for them.
//!
//! # How correlation works (for beginners)
//!
//! When the session sends a `method` or `sub` command it may register a
//! one-shot [`ReplyHandler`] under the command's request id.  When a frame
//! later arrives, [`ReplyMatcher::take_all`] works out which keys the frame
//! answers and removes and hands back every handler waiting under them.  Most
//! frames answer one key; a `ready` frame answers every subscription it lists.
//!
//! ```text
//! send login  (id "2")  ──► register(Request(2), handler)
//!                              ...
//! {"msg":"result","id":"2",...}  ──► take_all() → [handler]  (table no longer has 2)
//! {"msg":"result","id":"2",...}  ──► take_all() → []         (duplicate is a no-op)
//! ```
//!
//! The handshake reply does not echo an id, so the handshake registers under
//! the fixed [`CorrelationKey::Handshake`] key instead.
//!
//! # Thread safety
//!
//! `register` and `take_all` are called from the IO task and from many worker
//! tasks at once.  The table lives behind a single mutex and `take_all` removes
//! every matched key under one hold of that lock, so a handler can be handed
//! out at most once even when duplicate replies are processed concurrently.
//!
//! Entries have no timeout: a request whose reply never arrives keeps its
//! entry until the next disconnect clears the table.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use rcbot_core::InboundMessage;
use tracing::debug;

use crate::application::session::SessionError;

/// A single-shot continuation run with the reply it was waiting for.
pub type ReplyHandler = Box<dyn FnOnce(&InboundMessage) -> Result<(), SessionError> + Send>;

/// Key a pending reply is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    /// The initial handshake, whose reply carries no id.
    Handshake,
    /// A numeric request id assigned by the session.
    Request(u64),
}

impl CorrelationKey {
    /// Works out which pending keys, if any, `message` answers.
    ///
    /// 1. A frame with an `id` answers that request id.  Ids that are not
    ///    numeric never match, and neither do the document ids carried by
    ///    collection pushes.
    /// 2. A `ready` frame answers every subscription it lists.
    /// 3. A handshake-shaped frame answers the handshake.
    pub fn for_message(message: &InboundMessage) -> Vec<Self> {
        if message.has_id() {
            return message.request_id().map(Self::Request).into_iter().collect();
        }
        let subs = message.ready_subs();
        if !subs.is_empty() {
            return subs.into_iter().map(Self::Request).collect();
        }
        if message.is_handshake_shaped() {
            return vec![Self::Handshake];
        }
        Vec::new()
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshake => f.write_str("handshake"),
            Self::Request(id) => write!(f, "request {id}"),
        }
    }
}

/// Concurrency-safe table of pending reply handlers.
#[derive(Default)]
pub struct ReplyMatcher {
    pending: Mutex<HashMap<CorrelationKey, ReplyHandler>>,
}

impl ReplyMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `handler` under `key`.  A second registration under the same key
    /// replaces the first.
    pub fn register(&self, key: CorrelationKey, handler: ReplyHandler) {
        if self.pending.lock().insert(key, handler).is_some() {
            debug!("replaced pending reply handler for {key}");
        }
    }

    /// Removes and returns every pending handler `message` answers, in the
    /// order the frame lists their keys.
    pub fn take_all(&self, message: &InboundMessage) -> Vec<ReplyHandler> {
        let keys = CorrelationKey::for_message(message);
        if keys.is_empty() {
            return Vec::new();
        }
        let mut pending = self.pending.lock();
        keys.iter().filter_map(|key| pending.remove(key)).collect()
    }

    /// Removes the handler stored under `key`.
    pub fn remove(&self, key: CorrelationKey) -> Option<ReplyHandler> {
        self.pending.lock().remove(&key)
    }

    /// Drops every pending handler and returns how many there were.
    pub fn clear(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn contains(&self, key: CorrelationKey) -> bool {
        self.pending.lock().contains_key(&key)
    }
}

impl fmt::Debug for ReplyMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.pending.lock();
        f.debug_struct("ReplyMatcher")
            .field("pending", &pending.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
