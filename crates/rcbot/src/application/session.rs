//! Session use case: owns one logical connection to the chat server.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//! start() ──► transport.connect()
//!                  │
//!          Connected(session_id)
//!                  │  fresh worker pool, retry counter reset
//!                  ▼
//!          send connect ──► handshake reply ──► send login ──► login reply
//!                                                                  │
//!                                               identity stored, ClientStarted published
//!                  │
//!          Message(text) ... (ping answered inline, rest dispatched to workers)
//!                  │
//!          Disconnected(session_id)
//!                  │  pool aborted, pending replies dropped
//!                  ▼
//!          retry_count <= 5 ? reconnect : host.fatal(RetriesExhausted)
//! ```
//!
//! The three transport callbacks run one at a time on the task that drives
//! [`Session::run`].  Everything except ping handling happens on the worker
//! pool, so reply handlers, classification and publishing may run
//! concurrently with each other.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rcbot_core::protocol::codec::FAILED_MARKER;
use rcbot_core::{
    parse, serialize, AuthenticatedIdentity, EventClassifier, IdentityError, InboundMessage,
    OutgoingCommand, ProtocolError, RealtimeEvent, RequestIdGenerator, StreamEventClassifier,
    UserRef,
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::application::reply_matcher::{CorrelationKey, ReplyHandler, ReplyMatcher};
use crate::application::transport::{Transport, TransportError, TransportEvent};
use crate::application::worker_pool::{WorkerPool, DEFAULT_WORKER_THREADS};

/// Reconnects are attempted while the retry counter is at most this value.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Error type for session operations and reply handlers.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server answered `login` with an error object.
    #[error("login rejected: {message}")]
    LoginRejected { message: String },

    /// The server accepted `login` but the result could not be read.
    #[error("malformed login response: {0}")]
    MalformedLoginResponse(#[from] IdentityError),

    /// The connection dropped more often than the reconnect policy allows.
    #[error("gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

impl SessionError {
    /// Whether the error ends the session rather than a single operation.
    ///
    /// Fatal errors are delivered to the [`HostLifecycle`]; the rest are
    /// logged.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LoginRejected { .. }
                | Self::MalformedLoginResponse(_)
                | Self::RetriesExhausted { .. }
        )
    }
}

/// Error type for [`EventSink::publish`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("event sink is closed")]
    Closed,

    #[error("event rejected: {0}")]
    Rejected(String),
}

// ── Ports ─────────────────────────────────────────────────────────────────────

/// Receives the domain events the session publishes.
///
/// Called concurrently from worker tasks.  Errors are logged by the session
/// and otherwise ignored.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn publish(&self, event: RealtimeEvent) -> Result<(), SinkError>;
}

/// The process hosting the session.
///
/// `fatal` is how the session says it cannot continue: login was rejected,
/// or the reconnect budget is spent.
pub trait HostLifecycle: Send + Sync {
    fn fatal(&self, error: SessionError);
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// Connection parameters for a [`Session`].
#[derive(Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// WebSocket endpoint, e.g. `wss://chat.example.com/websocket`.
    pub endpoint: String,
    pub username: String,
    pub password: String,
    /// Maximum number of inbound frames processed concurrently.
    pub worker_threads: usize,
}

impl SessionSettings {
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }
}

impl fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSettings")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("worker_threads", &self.worker_threads)
            .finish()
    }
}

/// Why an event was withheld from the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Suppression {
    /// The event was caused by the session's own user.
    SelfEcho,
    /// A message from a room the session's user does not take part in.
    NotParticipant,
}

// ── Session ───────────────────────────────────────────────────────────────────

/// A persistent, self-healing session with the chat server.
///
/// Construct with [`Session::new`], call [`Session::start`], then drive it by
/// awaiting [`Session::run`] on the transport's event receiver.
pub struct Session {
    settings: SessionSettings,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    host: Arc<dyn HostLifecycle>,
    classifier: Arc<dyn EventClassifier>,
    ids: RequestIdGenerator,
    replies: ReplyMatcher,
    connected: AtomicBool,
    retry_count: AtomicU32,
    exhausted: AtomicBool,
    identity: RwLock<Option<Arc<AuthenticatedIdentity>>>,
    workers: Mutex<Option<Arc<WorkerPool>>>,
}

impl Session {
    /// Creates a session that classifies frames with [`StreamEventClassifier`].
    pub fn new(
        settings: SessionSettings,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
        host: Arc<dyn HostLifecycle>,
    ) -> Arc<Self> {
        Self::with_classifier(settings, transport, sink, host, Arc::new(StreamEventClassifier))
    }

    pub fn with_classifier(
        settings: SessionSettings,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
        host: Arc<dyn HostLifecycle>,
        classifier: Arc<dyn EventClassifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            transport,
            sink,
            host,
            classifier,
            ids: RequestIdGenerator::new(),
            replies: ReplyMatcher::new(),
            connected: AtomicBool::new(false),
            retry_count: AtomicU32::new(0),
            exhausted: AtomicBool::new(false),
            identity: RwLock::new(None),
            workers: Mutex::new(None),
        })
    }

    // ── Control ───────────────────────────────────────────────────────────────

    /// Asks the transport to connect.  The outcome arrives as a
    /// `Connected` or `Disconnected` transport event.
    pub fn start(&self) {
        info!(endpoint = %self.settings.endpoint, "connecting");
        self.transport.connect(&self.settings.endpoint);
    }

    /// Asks the transport to close the connection.
    ///
    /// The resulting disconnect goes through the reconnect policy like any
    /// other; leave [`Session::run`] to shut down for good.
    pub fn stop(&self) {
        info!("closing connection");
        self.transport.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Drains transport events until the transport side of the channel closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected { session_id } => self.connected(&session_id),
                TransportEvent::Message(text) => self.on_message(&text),
                TransportEvent::Disconnected { session_id } => self.disconnected(&session_id),
            }
        }
        debug!("transport event channel closed");
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    /// Serializes `command` and hands it to the transport without waiting for
    /// a reply.
    ///
    /// `method` and `sub` commands get the next request id, which is returned.
    /// If `on_reply` is given it runs exactly once when the matching reply
    /// arrives: under the request id for `method`/`sub`, or under the
    /// handshake key for `connect`.  Other commands cannot be answered and
    /// their handler is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Protocol`] if serialization fails and
    /// [`SessionError::Transport`] if the transport refuses the frame.  In
    /// both cases the handler is unregistered again.
    pub fn send(
        &self,
        mut command: OutgoingCommand,
        on_reply: Option<ReplyHandler>,
    ) -> Result<Option<u64>, SessionError> {
        let mut request_id = None;
        let mut registered = None;

        if command.carries_identity() {
            let id = self.ids.next_id();
            command.assign_id(id);
            request_id = Some(id);
            if let Some(handler) = on_reply {
                self.replies.register(CorrelationKey::Request(id), handler);
                registered = Some(CorrelationKey::Request(id));
            }
        } else if command.is_handshake() {
            if let Some(handler) = on_reply {
                self.replies.register(CorrelationKey::Handshake, handler);
                registered = Some(CorrelationKey::Handshake);
            }
        } else if on_reply.is_some() {
            debug!(kind = command.describe(), "command gets no reply; handler dropped");
        }

        let outcome = serialize(&command)
            .map_err(SessionError::from)
            .and_then(|text| {
                debug!(kind = command.describe(), id = ?request_id, "sending {text}");
                self.transport.send(text).map_err(SessionError::from)
            });

        if let Err(e) = outcome {
            if let Some(key) = registered {
                self.replies.remove(key);
            }
            return Err(e);
        }
        Ok(request_id)
    }

    /// Sends `command` and returns a receiver resolved with its reply.
    ///
    /// The receiver errors if the reply can never arrive: the command kind is
    /// never answered, or the connection dropped first.
    pub fn call(
        &self,
        command: OutgoingCommand,
    ) -> Result<oneshot::Receiver<InboundMessage>, SessionError> {
        let (tx, rx) = oneshot::channel();
        let handler: ReplyHandler = Box::new(move |reply| {
            // The caller may have stopped listening; that is fine.
            let _ = tx.send(reply.clone());
            Ok(())
        });
        self.send(command, Some(handler))?;
        Ok(rx)
    }

    /// Subscribes to a server stream.  The receiver resolves with the `ready`
    /// (or `nosub`) reply.
    pub fn subscribe(
        &self,
        name: &str,
        params: Vec<Value>,
    ) -> Result<oneshot::Receiver<InboundMessage>, SessionError> {
        self.call(OutgoingCommand::subscribe(name, params))
    }

    /// Subscribes to every room message visible to the logged-in user.
    pub fn subscribe_my_messages(
        &self,
    ) -> Result<oneshot::Receiver<InboundMessage>, SessionError> {
        self.call(OutgoingCommand::subscribe_my_messages())
    }

    /// Posts `text` to the room `room_id`.
    pub fn send_room_message(
        &self,
        room_id: &str,
        text: &str,
    ) -> Result<oneshot::Receiver<InboundMessage>, SessionError> {
        self.call(OutgoingCommand::send_message(room_id, text))
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn username(&self) -> &str {
        &self.settings.username
    }

    /// User id of the logged-in user, once login has succeeded.
    pub fn user_id(&self) -> Option<String> {
        self.identity().map(|identity| identity.user_id().to_owned())
    }

    pub fn identity(&self) -> Option<Arc<AuthenticatedIdentity>> {
        self.identity.read().clone()
    }

    /// Consecutive reconnects since the last successful connection.
    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }

    // ── Transport callbacks ───────────────────────────────────────────────────

    /// Handles a newly established connection: resets the retry counter,
    /// starts a fresh worker pool and begins the handshake.
    pub fn connected(self: &Arc<Self>, session_id: &str) {
        info!(session_id, "connected");
        self.retry_count.store(0, Ordering::SeqCst);
        self.exhausted.store(false, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);

        let pool = Arc::new(WorkerPool::new(self.settings.worker_threads));
        if let Some(previous) = self.workers.lock().replace(pool) {
            previous.shutdown_now();
        }

        let session = Arc::downgrade(self);
        let on_handshake: ReplyHandler = Box::new(move |reply| {
            if reply.msg() == Some(FAILED_MARKER) {
                warn!("server refused protocol version: {:?}", reply.get("version"));
            }
            match session.upgrade() {
                Some(session) => session.login(),
                None => Ok(()),
            }
        });
        if let Err(e) = self.send(OutgoingCommand::connect(), Some(on_handshake)) {
            warn!(session_id, "could not send handshake: {e}");
        }
    }

    /// Handles one inbound text frame.
    ///
    /// Pings are answered right here so the pong is queued ahead of any
    /// pool work.  Every other frame is handed to the worker pool.
    pub fn on_message(self: &Arc<Self>, text: &str) {
        let message = match parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("dropping malformed frame: {e}");
                return;
            }
        };

        if message.is_ping() {
            if let Err(e) = self.send(OutgoingCommand::pong(message.id()), None) {
                warn!("could not answer ping: {e}");
            }
            return;
        }

        let Some(pool) = self.workers.lock().clone() else {
            debug!("no worker pool; frame dropped");
            return;
        };
        let session = Arc::clone(self);
        if !pool.submit(async move { session.dispatch(message) }) {
            debug!("worker pool shut down; frame dropped");
        }
    }

    /// Handles the loss of the connection and applies the reconnect policy.
    pub fn disconnected(&self, session_id: &str) {
        warn!(session_id, "disconnected");
        self.connected.store(false, Ordering::SeqCst);

        if let Some(pool) = self.workers.lock().take() {
            pool.shutdown_now();
        }
        let dropped = self.replies.clear();
        if dropped > 0 {
            debug!(dropped, "discarded pending replies");
        }

        let retries = self.retry_count.load(Ordering::SeqCst);
        if retries <= MAX_RECONNECT_ATTEMPTS {
            self.retry_count.store(retries + 1, Ordering::SeqCst);
            info!(attempt = retries + 1, "reconnecting");
            self.start();
        } else if !self.exhausted.swap(true, Ordering::SeqCst) {
            let error = SessionError::RetriesExhausted { attempts: retries };
            error!("{error}");
            self.host.fatal(error);
        } else {
            debug!("reconnect budget already spent; ignoring disconnect");
        }
    }

    // ── Worker-side processing ────────────────────────────────────────────────

    fn login(self: &Arc<Self>) -> Result<(), SessionError> {
        let session = Arc::downgrade(self);
        let on_login: ReplyHandler = Box::new(move |reply| match session.upgrade() {
            Some(session) => session.complete_login(reply),
            None => Ok(()),
        });
        let command = OutgoingCommand::login(&self.settings.username, &self.settings.password);
        self.send(command, Some(on_login))?;
        Ok(())
    }

    fn complete_login(&self, reply: &InboundMessage) -> Result<(), SessionError> {
        if reply.error().is_some() {
            let message = reply
                .error_message()
                .unwrap_or_else(|| "login failed".to_owned());
            return Err(SessionError::LoginRejected { message });
        }

        let identity = AuthenticatedIdentity::from_login_response(reply)?;
        info!(user_id = identity.user_id(), username = %self.settings.username, "logged in");
        *self.identity.write() = Some(Arc::new(identity));
        self.publish(RealtimeEvent::ClientStarted);
        Ok(())
    }

    /// Runs on a worker: reply correlation, classification, filtering and
    /// publishing for one frame.
    fn dispatch(&self, message: InboundMessage) {
        for handler in self.replies.take_all(&message) {
            if let Err(e) = handler(&message) {
                self.report(e);
            }
        }

        let Some(event) = self.classifier.classify(&message) else {
            return;
        };
        if let Some(reason) = self.suppression(&event) {
            debug!(kind = event.kind(), ?reason, "event suppressed");
            return;
        }
        self.publish(event);
    }

    fn report(&self, error: SessionError) {
        if error.is_fatal() {
            error!("{error}");
            self.host.fatal(error);
        } else {
            warn!("reply handler failed: {error}");
        }
    }

    fn publish(&self, event: RealtimeEvent) {
        let kind = event.kind();
        if let Err(e) = self.sink.publish(event) {
            error!(kind, "event sink failed: {e}");
        }
    }

    fn suppression(&self, event: &RealtimeEvent) -> Option<Suppression> {
        if event.user().is_some_and(|user| self.is_own_user(user)) {
            return Some(Suppression::SelfEcho);
        }
        (!event.is_context_relevant()).then_some(Suppression::NotParticipant)
    }

    fn is_own_user(&self, user: &UserRef) -> bool {
        if user.username == self.settings.username {
            return true;
        }
        self.identity
            .read()
            .as_ref()
            .is_some_and(|identity| identity.user_id() == user.id)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("settings", &self.settings)
            .field("connected", &self.is_connected())
            .field("retry_count", &self.retry_count())
            .field("pending_replies", &self.replies.len())
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
