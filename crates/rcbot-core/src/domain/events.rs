//! Typed domain events and the classifier that produces them.
//!
//! The server pushes collection changes as `changed` frames.  Chat traffic
//! arrives on the `stream-room-messages` collection:
//!
//! ```json
//! {"msg":"changed","collection":"stream-room-messages","id":"id",
//!  "fields":{"eventName":"__my_messages__","args":[
//!     {"_id":"m1","rid":"GENERAL","msg":"hello","ts":{"$date":1480377601000},
//!      "u":{"_id":"u2","username":"bob","name":"Bob"}},
//!     {"roomParticipant":true,"roomType":"c","roomName":"general"}]}}
//! ```
//!
//! `args[0]` is the chat message.  Its optional `t` field marks system
//! messages (`uj` = user joined, `ul` = user left, ...).  `args[1]` is present
//! on the `__my_messages__` feed and says whether the logged-in user takes part
//! in the room; it drives the context-relevance flag on [`MessageEvent`].
//!
//! Room list changes arrive on `stream-notify-user` with an event name ending
//! in `/rooms-changed`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};

use crate::protocol::codec::{self, InboundMessage, CHANGED_MARKER};

/// Collection carrying chat messages.
pub const ROOM_MESSAGES_COLLECTION: &str = "stream-room-messages";

/// Collection carrying per-user notifications.
pub const NOTIFY_USER_COLLECTION: &str = "stream-notify-user";

/// Event-name suffix of room list changes on [`NOTIFY_USER_COLLECTION`].
pub const ROOMS_CHANGED_SUFFIX: &str = "/rooms-changed";

/// Reference to the user who caused an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRef {
    pub id: String,
    pub username: String,
    pub name: Option<String>,
}

/// A chat message posted to a room.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub message_id: String,
    pub room_id: String,
    pub text: String,
    pub user: UserRef,
    pub timestamp: Option<SystemTime>,
    /// `true` if the logged-in user participates in the room.
    pub room_participant: bool,
    /// `c` (channel), `p` (private group), `d` (direct), ...
    pub room_type: Option<String>,
    pub room_name: Option<String>,
}

/// A user joined or left a room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomMembershipEvent {
    pub message_id: String,
    pub room_id: String,
    pub user: UserRef,
    pub timestamp: Option<SystemTime>,
}

/// A room's topic was changed.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicChangedEvent {
    pub room_id: String,
    pub topic: String,
    pub user: UserRef,
}

/// Everything the session publishes to its sink.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// Handshake and login completed; the session is ready for traffic.
    ClientStarted,
    Message(MessageEvent),
    UserJoined(RoomMembershipEvent),
    UserLeft(RoomMembershipEvent),
    TopicChanged(TopicChangedEvent),
    /// A room was inserted, updated or removed from the user's room list.
    RoomChanged { room_id: String, action: String },
}

impl RealtimeEvent {
    /// The user that caused the event, for user-aware event kinds.
    pub fn user(&self) -> Option<&UserRef> {
        match self {
            Self::Message(e) => Some(&e.user),
            Self::UserJoined(e) | Self::UserLeft(e) => Some(&e.user),
            Self::TopicChanged(e) => Some(&e.user),
            Self::ClientStarted | Self::RoomChanged { .. } => None,
        }
    }

    /// Whether the event concerns a room the session takes part in.
    ///
    /// Only message events carry the flag; every other kind is relevant.
    pub fn is_context_relevant(&self) -> bool {
        match self {
            Self::Message(e) => e.room_participant,
            _ => true,
        }
    }

    /// Short kind label for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClientStarted => "client_started",
            Self::Message(_) => "message",
            Self::UserJoined(_) => "user_joined",
            Self::UserLeft(_) => "user_left",
            Self::TopicChanged(_) => "topic_changed",
            Self::RoomChanged { .. } => "room_changed",
        }
    }
}

/// Converts a parsed inbound frame into a domain event.
///
/// Implementations must be cheap and side-effect free: the session calls
/// `classify` on worker tasks, concurrently, for every non-ping frame.
pub trait EventClassifier: Send + Sync {
    /// Returns the event carried by `message`, or `None` if it carries none.
    fn classify(&self, message: &InboundMessage) -> Option<RealtimeEvent>;
}

/// Default classifier for the room-message and user-notification streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamEventClassifier;

impl EventClassifier for StreamEventClassifier {
    fn classify(&self, message: &InboundMessage) -> Option<RealtimeEvent> {
        if message.msg() != Some(CHANGED_MARKER) {
            return None;
        }
        let fields = message.get("fields")?.as_object()?;
        let args = fields.get("args")?.as_array()?;

        match message.text("collection")? {
            ROOM_MESSAGES_COLLECTION => classify_room_message(args),
            NOTIFY_USER_COLLECTION => {
                let event_name = codec::text(fields, "eventName")?;
                if !event_name.ends_with(ROOMS_CHANGED_SUFFIX) {
                    return None;
                }
                let action = args.first()?.as_str()?.to_string();
                let room_id = codec::text(args.get(1)?.as_object()?, "_id")?.to_string();
                Some(RealtimeEvent::RoomChanged { room_id, action })
            }
            _ => None,
        }
    }
}

fn classify_room_message(args: &[Value]) -> Option<RealtimeEvent> {
    let message = args.first()?.as_object()?;
    let room_info = args.get(1).and_then(Value::as_object);

    let message_id = codec::text(message, "_id")?.to_string();
    let room_id = codec::text(message, "rid")?.to_string();
    let user = user_ref(message.get("u")?.as_object()?)?;
    let timestamp = message.get("ts").and_then(timestamp);

    match codec::text(message, "t") {
        None => Some(RealtimeEvent::Message(MessageEvent {
            message_id,
            room_id,
            text: codec::text(message, "msg").unwrap_or_default().to_string(),
            user,
            timestamp,
            // Missing context info means the push came from a room-specific
            // subscription, which is relevant by construction.
            room_participant: room_info
                .and_then(|info| info.get("roomParticipant"))
                .and_then(Value::as_bool)
                .unwrap_or(true),
            room_type: room_info
                .and_then(|info| codec::text(info, "roomType"))
                .map(str::to_string),
            room_name: room_info
                .and_then(|info| codec::text(info, "roomName"))
                .map(str::to_string),
        })),
        Some("uj") => Some(RealtimeEvent::UserJoined(RoomMembershipEvent {
            message_id,
            room_id,
            user,
            timestamp,
        })),
        Some("ul") => Some(RealtimeEvent::UserLeft(RoomMembershipEvent {
            message_id,
            room_id,
            user,
            timestamp,
        })),
        Some("room_changed_topic") => Some(RealtimeEvent::TopicChanged(TopicChangedEvent {
            room_id,
            topic: codec::text(message, "msg").unwrap_or_default().to_string(),
            user,
        })),
        Some(_) => None,
    }
}

fn user_ref(u: &Map<String, Value>) -> Option<UserRef> {
    Some(UserRef {
        id: codec::text(u, "_id")?.to_string(),
        username: codec::text(u, "username")?.to_string(),
        name: codec::text(u, "name").map(str::to_string),
    })
}

fn timestamp(value: &Value) -> Option<SystemTime> {
    codec::millis(value).map(|ms| UNIX_EPOCH + Duration::from_millis(ms))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::parse;
    use serde_json::json;

    fn room_push(message: Value, info: Option<Value>) -> InboundMessage {
        let mut args = vec![message];
        args.extend(info);
        InboundMessage::from_value(json!({
            "msg": "changed",
            "collection": "stream-room-messages",
            "id": "id",
            "fields": { "eventName": "__my_messages__", "args": args }
        }))
        .unwrap()
    }

    fn bob() -> Value {
        json!({"_id": "u2", "username": "bob", "name": "Bob"})
    }

    #[test]
    fn test_plain_message_is_classified() {
        // Arrange
        let msg = room_push(
            json!({"_id": "m1", "rid": "GENERAL", "msg": "hello", "ts": {"$date": 1000}, "u": bob()}),
            Some(json!({"roomParticipant": true, "roomType": "c", "roomName": "general"})),
        );

        // Act
        let event = StreamEventClassifier.classify(&msg);

        // Assert
        let m = match event {
            Some(RealtimeEvent::Message(m)) => m,
            other => panic!("expected a message event, got {other:?}"),
        };
        assert_eq!(m.message_id, "m1");
        assert_eq!(m.room_id, "GENERAL");
        assert_eq!(m.text, "hello");
        assert_eq!(m.user.username, "bob");
        assert_eq!(m.user.name.as_deref(), Some("Bob"));
        assert_eq!(m.timestamp, Some(UNIX_EPOCH + Duration::from_millis(1000)));
        assert!(m.room_participant);
        assert_eq!(m.room_type.as_deref(), Some("c"));
        assert_eq!(m.room_name.as_deref(), Some("general"));
    }

    #[test]
    fn test_non_participant_message_is_not_context_relevant() {
        let msg = room_push(
            json!({"_id": "m1", "rid": "R", "msg": "x", "u": bob()}),
            Some(json!({"roomParticipant": false})),
        );

        let event = StreamEventClassifier.classify(&msg).unwrap();

        assert!(!event.is_context_relevant());
    }

    #[test]
    fn test_missing_room_info_defaults_to_participant() {
        let msg = room_push(json!({"_id": "m1", "rid": "R", "msg": "x", "u": bob()}), None);
        let event = StreamEventClassifier.classify(&msg).unwrap();
        assert!(event.is_context_relevant());
    }

    #[test]
    fn test_system_messages_map_to_membership_and_topic_events() {
        let joined = room_push(json!({"_id": "m", "rid": "R", "t": "uj", "u": bob()}), None);
        let left = room_push(json!({"_id": "m", "rid": "R", "t": "ul", "u": bob()}), None);
        let topic = room_push(
            json!({"_id": "m", "rid": "R", "t": "room_changed_topic", "msg": "new", "u": bob()}),
            None,
        );
        let unknown = room_push(json!({"_id": "m", "rid": "R", "t": "xyz", "u": bob()}), None);

        assert!(matches!(
            StreamEventClassifier.classify(&joined),
            Some(RealtimeEvent::UserJoined(_))
        ));
        assert!(matches!(
            StreamEventClassifier.classify(&left),
            Some(RealtimeEvent::UserLeft(_))
        ));
        match StreamEventClassifier.classify(&topic) {
            Some(RealtimeEvent::TopicChanged(t)) => assert_eq!(t.topic, "new"),
            other => panic!("expected topic change, got {other:?}"),
        }
        assert_eq!(StreamEventClassifier.classify(&unknown), None);
    }

    #[test]
    fn test_rooms_changed_notification() {
        // Arrange
        let msg = parse(
            r#"{"msg":"changed","collection":"stream-notify-user","id":"id",
                "fields":{"eventName":"u1/rooms-changed","args":["inserted",{"_id":"R9"}]}}"#,
        )
        .unwrap();

        // Act
        let event = StreamEventClassifier.classify(&msg).unwrap();

        // Assert
        assert_eq!(
            event,
            RealtimeEvent::RoomChanged {
                room_id: "R9".into(),
                action: "inserted".into()
            }
        );
        assert!(event.user().is_none());
    }

    #[test]
    fn test_other_frames_are_not_events() {
        for text in [
            r#"{"msg":"result","id":"1","result":{}}"#,
            r#"{"msg":"connected","session":"s"}"#,
            r#"{"msg":"changed","collection":"users","fields":{"args":[]}}"#,
            r#"{"msg":"changed","collection":"stream-room-messages","fields":{"args":[]}}"#,
            r#"{"msg":"changed","collection":"stream-notify-user","fields":{"eventName":"u1/message","args":[]}}"#,
        ] {
            let msg = parse(text).unwrap();
            assert_eq!(StreamEventClassifier.classify(&msg), None, "frame: {text}");
        }
    }

    #[test]
    fn test_message_without_user_is_dropped() {
        let msg = room_push(json!({"_id": "m1", "rid": "R", "msg": "x"}), None);
        assert_eq!(StreamEventClassifier.classify(&msg), None);
    }

    #[test]
    fn test_user_accessor_and_kind() {
        assert!(RealtimeEvent::ClientStarted.user().is_none());
        assert_eq!(RealtimeEvent::ClientStarted.kind(), "client_started");
        assert!(RealtimeEvent::ClientStarted.is_context_relevant());
    }
}
