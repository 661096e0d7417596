//! Broker event payloads.
//!
//! Every payload published to the `messages` exchange is one of these
//! variants, discriminated by the `event` field. Gateways match on the tag
//! and write the inner object to the socket, so the socket frames carry no
//! `event` field and keep the shapes clients already understand.

use serde::{Deserialize, Serialize};

use crate::message::{MessageResponse, MessageStatus};
use crate::user::UserStatus;

/// Tagged union of everything that flows through the topic exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BrokerEvent {
    /// A freshly persisted message, routed `message.<receiver_id>`.
    Message(MessageResponse),
    /// A single message changed status, routed `status.<message_id>`.
    Status(StatusEvent),
    /// A whole conversation tail was marked read at once,
    /// routed `status.batch.<sender>.<receiver>`.
    Batch(BatchStatusEvent),
    /// Someone started or stopped typing, routed `typing.<receiver_id>`.
    Typing(TypingEvent),
    /// A user connected or disconnected, routed `status.user.<user_id>`.
    Presence(PresenceEvent),
}

/// Per-message status transition.
///
/// Producers always populate `sender_id` and `receiver_id`; consumers must
/// tolerate their absence from older producers, hence the options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub message_id: String,
    pub status: MessageStatus,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
}

/// One event standing for "every unread message from `sender_id` to
/// `receiver_id` is now `status`". Routed to the original sender so their
/// UI can flip the whole conversation tail in one repaint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatusEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub status: MessageStatus,
    pub updated_at: String,
}

impl BatchStatusEvent {
    pub fn read(sender_id: String, receiver_id: String, updated_at: String) -> Self {
        Self {
            kind: "batch".to_string(),
            sender_id,
            receiver_id,
            status: MessageStatus::Read,
            updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub is_typing: bool,
    pub timestamp: String,
}

impl TypingEvent {
    pub fn new(sender_id: String, receiver_id: String, is_typing: bool, timestamp: String) -> Self {
        Self {
            kind: "typing".to_string(),
            sender_id,
            receiver_id,
            is_typing,
            timestamp,
        }
    }
}

/// Presence change. The field name `UserID` is part of the wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEvent {
    #[serde(rename = "UserID")]
    pub user_id: String,
    pub status: UserStatus,
}

/// The typing frame as clients send it: `sender_id` and `timestamp` are
/// stamped by the gateway, never trusted from the client.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientTyping {
    pub receiver_id: String,
    #[serde(default)]
    pub is_typing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> MessageResponse {
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

    #[test]
    fn events_carry_the_discriminator() {
        let event = BrokerEvent::Message(sample_message());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "message");
        assert_eq!(json["content"], "hi");

        let event = BrokerEvent::Batch(BatchStatusEvent::read(
            "a".to_string(),
            "b".to_string(),
            "2023-08-01T15:04:05Z".to_string(),
        ));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "batch");
        assert_eq!(json["type"], "batch");
        assert_eq!(json["status"], "read");
    }

    #[test]
    fn round_trip_through_the_tag() {
        let event = BrokerEvent::Typing(TypingEvent::new(
            "a".to_string(),
            "b".to_string(),
            true,
            "2023-08-01T15:04:05Z".to_string(),
        ));
        let bytes = serde_json::to_vec(&event).unwrap();
        let parsed: BrokerEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn status_event_tolerates_missing_parties() {
        // Older producers omitted sender_id/receiver_id from `sent` events.
        let legacy = r#"{"event":"status","message_id":"m1","status":"delivered","updated_at":"2023-08-01T15:04:05Z"}"#;
        let parsed: BrokerEvent = serde_json::from_str(legacy).unwrap();
        match parsed {
            BrokerEvent::Status(s) => {
                assert_eq!(s.message_id, "m1");
                assert!(s.sender_id.is_none());
                assert!(s.receiver_id.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn presence_uses_wire_field_name() {
        let event = BrokerEvent::Presence(PresenceEvent {
            user_id: "u1".to_string(),
            status: UserStatus::Online,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "presence");
        assert_eq!(json["UserID"], "u1");
        assert_eq!(json["status"], "online");
    }

    #[test]
    fn socket_frame_has_no_event_tag() {
        // Gateways serialize the inner struct, not the enum.
        let json = serde_json::to_value(sample_message()).unwrap();
        assert!(json.get("event").is_none());
    }
}
