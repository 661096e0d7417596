//! Wire-contract tests.
//!
//! Pin down the JSON shapes clients and gateways exchange: broker payloads
//! carry the `event` discriminator, socket frames do not, and every frame
//! keeps the exact field names existing clients parse.

use serde_json::{json, Value};

use parley_types::routing;
use parley_types::{
    BatchStatusEvent, BrokerEvent, ClientTyping, MessageResponse, MessageStatus, PresenceEvent,
    StatusEvent, TypingEvent, UserStatus,
};

fn message_frame() -> MessageResponse {
    MessageResponse {
        id: "5f8d0f1b9d9d9d9d9d9d9d9f".to_string(),
        sender_id: "5f8d0f1b9d9d9d9d9d9d9d9d".to_string(),
        sender_username: "alice".to_string(),
        receiver_id: Some("5f8d0f1b9d9d9d9d9d9d9d9e".to_string()),
        group_id: None,
        content: "hi".to_string(),
        media_url: None,
        created_at: "2023-08-01T15:04:05Z".to_string(),
        status: MessageStatus::Sent,
    }
}

// A sends to B: the frame B's socket receives.
#[test]
fn direct_message_frame_shape() {
    let frame: Value = serde_json::to_value(message_frame()).unwrap();
    assert_eq!(
        frame,
        json!({
            "id": "5f8d0f1b9d9d9d9d9d9d9d9f",
            "sender_id": "5f8d0f1b9d9d9d9d9d9d9d9d",
            "sender_username": "alice",
            "receiver_id": "5f8d0f1b9d9d9d9d9d9d9d9e",
            "content": "hi",
            "created_at": "2023-08-01T15:04:05Z",
            "status": "sent",
        })
    );
}

// The delivered tick A later receives.
#[test]
fn per_message_status_frame_shape() {
    let frame: Value = serde_json::to_value(StatusEvent {
        message_id: "m1".to_string(),
        status: MessageStatus::Delivered,
        updated_at: "2023-08-01T15:04:06Z".to_string(),
        sender_id: Some("a".to_string()),
        receiver_id: Some("b".to_string()),
    })
    .unwrap();
    assert_eq!(
        frame,
        json!({
            "message_id": "m1",
            "status": "delivered",
            "updated_at": "2023-08-01T15:04:06Z",
            "sender_id": "a",
            "receiver_id": "b",
        })
    );
}

// B opens the thread: the batch frame routed to A.
#[test]
fn batch_status_frame_shape() {
    let frame: Value = serde_json::to_value(BatchStatusEvent::read(
        "a".to_string(),
        "b".to_string(),
        "2023-08-01T15:04:07Z".to_string(),
    ))
    .unwrap();
    assert_eq!(
        frame,
        json!({
            "type": "batch",
            "sender_id": "a",
            "receiver_id": "b",
            "status": "read",
            "updated_at": "2023-08-01T15:04:07Z",
        })
    );
}

// B types to A: the client frame in, the stamped frame out.
#[test]
fn typing_frames_round_trip() {
    let inbound: ClientTyping =
        serde_json::from_str(r#"{"type":"typing","receiver_id":"a","is_typing":true}"#).unwrap();
    assert_eq!(inbound.receiver_id, "a");
    assert!(inbound.is_typing);

    let outbound: Value = serde_json::to_value(TypingEvent::new(
        "b".to_string(),
        inbound.receiver_id,
        inbound.is_typing,
        "2023-08-01T15:04:08Z".to_string(),
    ))
    .unwrap();
    assert_eq!(
        outbound,
        json!({
            "type": "typing",
            "sender_id": "b",
            "receiver_id": "a",
            "is_typing": true,
            "timestamp": "2023-08-01T15:04:08Z",
        })
    );
}

#[test]
fn presence_event_shape() {
    let event: Value = serde_json::to_value(BrokerEvent::Presence(PresenceEvent {
        user_id: "u1".to_string(),
        status: UserStatus::Offline,
    }))
    .unwrap();
    assert_eq!(
        event,
        json!({
            "event": "presence",
            "UserID": "u1",
            "status": "offline",
        })
    );
}

// Group send to G={O,X,Y}: one event per member except the sender, each a
// copy with the member as receiver, all monotone on the same message id.
#[test]
fn group_fanout_copies_share_the_message_id() {
    let base = MessageResponse {
        receiver_id: None,
        group_id: Some("g1".to_string()),
        ..message_frame()
    };

    let members = ["x1", "y1"];
    let copies: Vec<BrokerEvent> = members
        .iter()
        .map(|member| {
            let mut copy = base.clone();
            copy.receiver_id = Some(member.to_string());
            BrokerEvent::Message(copy)
        })
        .collect();

    for (member, copy) in members.iter().zip(&copies) {
        let value = serde_json::to_value(copy).unwrap();
        assert_eq!(value["event"], "message");
        assert_eq!(value["id"], base.id);
        assert_eq!(value["group_id"], "g1");
        assert_eq!(value["receiver_id"], *member);
    }
}

// Broker payloads round-trip through the tag; a gateway can always parse
// what a service publishes.
#[test]
fn broker_events_round_trip() {
    let events = vec![
        BrokerEvent::Message(message_frame()),
        BrokerEvent::Status(StatusEvent {
            message_id: "m1".to_string(),
            status: MessageStatus::Read,
            updated_at: "2023-08-01T15:04:09Z".to_string(),
            sender_id: Some("a".to_string()),
            receiver_id: Some("b".to_string()),
        }),
        BrokerEvent::Batch(BatchStatusEvent::read(
            "a".to_string(),
            "b".to_string(),
            "2023-08-01T15:04:09Z".to_string(),
        )),
        BrokerEvent::Typing(TypingEvent::new(
            "a".to_string(),
            "b".to_string(),
            false,
            "2023-08-01T15:04:09Z".to_string(),
        )),
        BrokerEvent::Presence(PresenceEvent {
            user_id: "u1".to_string(),
            status: UserStatus::Away,
        }),
    ];

    for event in events {
        let bytes = serde_json::to_vec(&event).unwrap();
        let parsed: BrokerEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, event);
    }
}

// Routing keys and queue bindings line up: everything a service publishes
// lands in a pattern some queue is bound with.
#[test]
fn published_keys_match_declared_bindings() {
    let matches = |key: &str, pattern: &str| -> bool {
        // `prefix.#` in a topic exchange matches one or more further words.
        match pattern.strip_suffix(".#") {
            Some(prefix) => {
                key.starts_with(prefix) && key.len() > prefix.len() + 1
            }
            None => pattern == "#" || key == pattern,
        }
    };

    let gateway_patterns = [
        routing::MESSAGE_PATTERN,
        routing::STATUS_PATTERN,
        routing::TYPING_PATTERN,
    ];

    for key in [
        routing::message_key("u1"),
        routing::status_key("m1"),
        routing::batch_status_key("a", "b"),
        routing::presence_key("u1"),
        routing::typing_key("u1"),
    ] {
        assert!(
            gateway_patterns.iter().any(|p| matches(&key, p)),
            "no gateway binding matches {}",
            key
        );
    }

    // The message service's queue sees exactly the message family.
    assert!(matches(&routing::message_key("u1"), routing::MESSAGE_PATTERN));
    assert!(!matches(&routing::status_key("m1"), routing::MESSAGE_PATTERN));
    assert!(!matches(&routing::typing_key("u1"), routing::MESSAGE_PATTERN));
}
