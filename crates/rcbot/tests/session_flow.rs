//! End-to-end session scenarios driven through `Session::run`.
//!
//! The recording transport stands in for the network: tests push
//! `TransportEvent`s into the session's event channel the way a real
//! transport would, and read what the session sent back from the recorder.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rcbot::infrastructure::channels::{ChannelHost, ChannelSink};
use rcbot::infrastructure::transport::RecordingTransport;
use rcbot::{
    EventSink, Session, SessionError, SessionSettings, SinkError, Transport, TransportEvent,
    MAX_RECONNECT_ATTEMPTS,
};
use rcbot_core::RealtimeEvent;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    session: Arc<Session>,
    transport: Arc<RecordingTransport>,
    wire: mpsc::UnboundedSender<TransportEvent>,
    events: mpsc::UnboundedReceiver<RealtimeEvent>,
    fatal: mpsc::UnboundedReceiver<SessionError>,
}

impl Harness {
    fn start() -> Self {
        let transport = Arc::new(RecordingTransport::new());
        let (sink, events) = ChannelSink::channel();
        let (host, fatal) = ChannelHost::channel();
        let session = Session::new(
            SessionSettings::new("ws://localhost:3000/websocket", "bot", "secret")
                .with_worker_threads(2),
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(sink),
            Arc::new(host),
        );
        let (wire, rx) = mpsc::unbounded_channel();
        tokio::spawn(Arc::clone(&session).run(rx));
        session.start();
        Self {
            session,
            transport,
            wire,
            events,
            fatal,
        }
    }

    fn push(&self, event: TransportEvent) {
        self.wire.send(event).expect("session loop is running");
    }

    fn receive(&self, frame: Value) {
        self.push(TransportEvent::Message(frame.to_string()));
    }

    async fn wait_for_sent(&self, count: usize) -> Vec<Value> {
        timeout(WAIT, async {
            loop {
                let sent = self.transport.sent_json();
                if sent.len() >= count {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {count} frames, got {:?}", self.transport.sent_json()))
    }

    async fn next_event(&mut self) -> RealtimeEvent {
        timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("sink channel open")
    }

    /// Runs connect, handshake and login to completion.
    async fn log_in(&mut self) {
        self.push(TransportEvent::Connected {
            session_id: "s1".into(),
        });
        self.wait_for_sent(1).await;
        self.receive(json!({"msg": "connected", "session": "s1"}));
        let sent = self.wait_for_sent(2).await;
        let login_id = sent[1]["id"].as_str().expect("login id").to_owned();
        self.receive(json!({
            "msg": "result",
            "id": login_id,
            "result": {"id": "u-bot", "token": "tok", "tokenExpires": {"$date": 1480377601000u64}}
        }));
        assert_eq!(self.next_event().await, RealtimeEvent::ClientStarted);
    }
}

fn room_message(id: &str, user_id: &str, username: &str, participant: bool) -> Value {
    json!({
        "msg": "changed",
        "collection": "stream-room-messages",
        "id": "id",
        "fields": {
            "eventName": "__my_messages__",
            "args": [
                {"_id": id, "rid": "GENERAL", "msg": format!("from {username}"),
                 "ts": {"$date": 1480377601000u64},
                 "u": {"_id": user_id, "username": username}},
                {"roomParticipant": participant, "roomType": "c", "roomName": "general"}
            ]
        }
    })
}

#[tokio::test]
async fn test_login_flow_sends_frames_in_order() {
    // Arrange
    let mut h = Harness::start();

    // Act
    h.log_in().await;

    // Assert
    let sent = h.transport.sent_json();
    assert_eq!(sent[0], json!({"msg": "connect", "version": "1", "support": ["1"]}));
    assert_eq!(sent[1]["method"], "login");
    assert_eq!(sent[1]["id"], "1");
    assert_eq!(h.session.user_id().as_deref(), Some("u-bot"));
    assert!(h.session.is_connected());
    assert_eq!(h.transport.connects.lock().as_slice(), ["ws://localhost:3000/websocket"]);
}

#[tokio::test]
async fn test_login_rejection_reaches_host_and_nothing_is_published() {
    // Arrange
    let mut h = Harness::start();
    h.push(TransportEvent::Connected {
        session_id: "s1".into(),
    });
    h.wait_for_sent(1).await;
    h.receive(json!({"msg": "connected", "session": "s1"}));
    h.wait_for_sent(2).await;

    // Act
    h.receive(json!({"msg": "result", "id": "1", "error": {"message": "Incorrect password"}}));

    // Assert
    let error = timeout(WAIT, h.fatal.recv()).await.unwrap().unwrap();
    assert!(matches!(error, SessionError::LoginRejected { ref message } if message == "Incorrect password"));
    assert!(h.events.try_recv().is_err(), "ClientStarted must not be published");
}

#[tokio::test]
async fn test_ping_gets_exactly_one_pong_and_nothing_else() {
    // Arrange
    let mut h = Harness::start();
    h.log_in().await;
    let before = h.transport.sent_json().len();

    // Act
    h.receive(json!({"msg": "ping"}));
    let sent = h.wait_for_sent(before + 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Assert
    assert_eq!(sent[before], json!({"msg": "pong"}));
    assert_eq!(h.transport.sent_json().len(), before + 1);
    assert!(h.events.try_recv().is_err());
}

/// Sink that holds every publishing worker until the gate is opened.
#[derive(Default)]
struct GatedSink {
    open: AtomicBool,
    published: AtomicUsize,
}

impl EventSink for GatedSink {
    fn publish(&self, _event: RealtimeEvent) -> Result<(), SinkError> {
        let deadline = Instant::now() + WAIT;
        while !self.open.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ping_is_answered_while_the_worker_pool_is_saturated() {
    // Arrange: a single worker, stuck in the sink on the first message
    let transport = Arc::new(RecordingTransport::new());
    let sink = Arc::new(GatedSink::default());
    let (host, _fatal) = ChannelHost::channel();
    let session = Session::new(
        SessionSettings::new("ws://localhost:3000/websocket", "bot", "secret")
            .with_worker_threads(1),
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::clone(&sink) as Arc<dyn EventSink>,
        Arc::new(host),
    );
    let (wire, rx) = mpsc::unbounded_channel();
    tokio::spawn(Arc::clone(&session).run(rx));
    session.start();
    wire.send(TransportEvent::Connected {
        session_id: "s1".into(),
    })
    .unwrap();

    // Act: a backlog of room messages, then a keep-alive
    for n in 0..5 {
        let frame = room_message(&format!("m{n}"), "u-alice", "alice", true);
        wire.send(TransportEvent::Message(frame.to_string())).unwrap();
    }
    wire.send(TransportEvent::Message(json!({"msg": "ping"}).to_string()))
        .unwrap();

    // Assert: the pong is on the wire while no message has been published yet
    let sent = timeout(WAIT, async {
        loop {
            let sent = transport.sent_json();
            if sent.len() >= 2 {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pong was not sent");
    assert_eq!(sent[0]["msg"], "connect");
    assert_eq!(sent[1], json!({"msg": "pong"}));
    assert_eq!(sink.published.load(Ordering::SeqCst), 0);

    // The backlog drains once the sink lets go.
    sink.open.store(true, Ordering::SeqCst);
    timeout(WAIT, async {
        while sink.published.load(Ordering::SeqCst) < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("backlog drained");
}

#[tokio::test]
async fn test_only_foreign_messages_from_joined_rooms_are_published() {
    // Arrange
    let mut h = Harness::start();
    h.log_in().await;

    // Act
    h.receive(room_message("m1", "u-bot", "bot", true));
    h.receive(room_message("m2", "u-bot", "renamed-bot", true));
    h.receive(room_message("m3", "u-dave", "dave", false));
    h.receive(room_message("m4", "u-alice", "alice", true));

    // Assert
    match h.next_event().await {
        RealtimeEvent::Message(m) => {
            assert_eq!(m.message_id, "m4");
            assert_eq!(m.user.username, "alice");
            assert_eq!(m.room_name.as_deref(), Some("general"));
        }
        other => panic!("expected a message event, got {other:?}"),
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.events.try_recv().is_err(), "suppressed events must not appear");
}

#[tokio::test]
async fn test_duplicate_reply_resolves_caller_once() {
    // Arrange
    let mut h = Harness::start();
    h.log_in().await;
    let reply = h.session.send_room_message("GENERAL", "hi").expect("send");
    let sent = h.transport.sent_json();
    let id = sent.last().unwrap()["id"].as_str().unwrap().to_owned();
    assert_eq!(id, "2");

    // Act
    h.receive(json!({"msg": "result", "id": id, "result": {"_id": "first"}}));
    let message = timeout(WAIT, reply).await.unwrap().unwrap();
    h.receive(json!({"msg": "result", "id": id, "result": {"_id": "second"}}));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Assert
    assert_eq!(message.result().unwrap()["_id"], "first");
    assert_eq!(h.session.pending_replies(), 0);
    assert!(h.fatal.try_recv().is_err());
    assert!(h.events.try_recv().is_err(), "a method result is not an event");
}

#[tokio::test]
async fn test_batched_ready_resolves_every_subscription() {
    // Arrange
    let mut h = Harness::start();
    h.log_in().await;
    let first = h.session.subscribe_my_messages().expect("subscribe");
    let second = h
        .session
        .subscribe(
            "stream-notify-user",
            vec![json!("u-bot/rooms-changed"), json!(false)],
        )
        .expect("subscribe");
    let sent = h.transport.sent_json();
    assert_eq!(sent[2]["id"], "2");
    assert_eq!(sent[3]["id"], "3");

    // Act
    h.receive(json!({"msg": "ready", "subs": ["2", "3"]}));

    // Assert
    assert!(timeout(WAIT, first).await.unwrap().is_ok());
    assert!(timeout(WAIT, second).await.unwrap().is_ok());
    assert_eq!(h.session.pending_replies(), 0);
}

#[tokio::test]
async fn test_collection_push_does_not_resolve_a_pending_call() {
    // Arrange
    let mut h = Harness::start();
    h.log_in().await;
    let mut reply = h.session.send_room_message("GENERAL", "hi").expect("send");

    // Act: a document push whose id happens to equal the request id
    h.receive(json!({"msg": "added", "collection": "users", "id": "2", "fields": {}}));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Assert
    assert!(reply.try_recv().is_err(), "the call is still waiting");
    assert_eq!(h.session.pending_replies(), 1);
    h.receive(json!({"msg": "result", "id": "2", "result": {"_id": "m9"}}));
    let message = timeout(WAIT, reply).await.unwrap().unwrap();
    assert_eq!(message.result().unwrap()["_id"], "m9");
}

#[tokio::test]
async fn test_disconnects_exhaust_retry_budget_then_signal_host_once() {
    // Arrange
    let mut h = Harness::start();
    h.log_in().await;

    // Act: the connection drops and every reconnect attempt fails
    let reconnects = MAX_RECONNECT_ATTEMPTS as usize + 1;
    for _ in 0..reconnects + 2 {
        h.push(TransportEvent::Disconnected {
            session_id: "s1".into(),
        });
    }

    // Assert
    let error = timeout(WAIT, h.fatal.recv()).await.unwrap().unwrap();
    assert!(matches!(error, SessionError::RetriesExhausted { .. }));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.fatal.try_recv().is_err(), "host is signalled exactly once");
    // One connect from start(), then one per allowed reconnect.
    assert_eq!(h.transport.connect_count(), 1 + reconnects);
    assert!(!h.session.is_connected());
}

#[tokio::test]
async fn test_reconnect_logs_in_again_with_fresh_ids() {
    // Arrange
    let mut h = Harness::start();
    h.log_in().await;

    // Act
    h.push(TransportEvent::Disconnected {
        session_id: "s1".into(),
    });
    h.push(TransportEvent::Connected {
        session_id: "s2".into(),
    });
    let sent = h.wait_for_sent(3).await;
    h.receive(json!({"msg": "connected", "session": "s2"}));
    let sent_after = h.wait_for_sent(4).await;

    // Assert
    assert_eq!(sent[2]["msg"], "connect");
    assert_eq!(sent_after[3]["method"], "login");
    assert_eq!(sent_after[3]["id"], "2", "ids keep increasing across connections");
    assert_eq!(h.session.retry_count(), 0);
}
