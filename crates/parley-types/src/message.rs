use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::rfc3339;

/// Delivery status of a message.
///
/// Transitions are monotone along sent -> delivered -> read; a lower-ranked
/// update against a higher-ranked document is a no-op everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn rank(self) -> u8 {
        match self {
            MessageStatus::Sent => 0,
            MessageStatus::Delivered => 1,
            MessageStatus::Read => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    /// Statuses strictly below `self`, i.e. the states an update to `self`
    /// is allowed to overwrite.
    pub fn lower_ranks(self) -> Vec<&'static str> {
        [MessageStatus::Sent, MessageStatus::Delivered, MessageStatus::Read]
            .into_iter()
            .filter(|s| s.rank() < self.rank())
            .map(MessageStatus::as_str)
            .collect()
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            other => Err(format!("invalid message status: {}", other)),
        }
    }
}

/// Message document as stored in the `messages` collection.
///
/// Exactly one of `receiver_id` / `group_id` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub sender_id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<ObjectId>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub created_at: bson::DateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<bson::DateTime>,
    pub status: MessageStatus,
}

impl Message {
    /// Build the API/broker representation, filling in the sender's username
    /// looked up by the caller.
    pub fn to_response(&self, sender_username: impl Into<String>) -> MessageResponse {
        MessageResponse {
            id: self.id.to_hex(),
            sender_id: self.sender_id.to_hex(),
            sender_username: sender_username.into(),
            receiver_id: self.receiver_id.map(|id| id.to_hex()),
            group_id: self.group_id.map(|id| id.to_hex()),
            content: self.content.clone(),
            media_url: self.media_url.clone(),
            created_at: rfc3339(self.created_at),
            status: self.status,
        }
    }
}

/// Body of `POST /messages`. Exactly one of the two discriminators must be
/// present; the sender always comes from the JWT, never from the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

impl MessageRequest {
    /// Structural validation: non-empty content and exactly one recipient
    /// discriminator. Id syntax and authorization are the service's job.
    pub fn validate(&self) -> Result<(), String> {
        if self.content.trim().is_empty() {
            return Err("content is required".to_string());
        }
        match (&self.receiver_id, &self.group_id) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err("exactly one of receiver_id or group_id must be set".to_string()),
        }
    }
}

/// Message as returned by the API and delivered on sockets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: String,
    pub sender_id: String,
    pub sender_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub created_at: String,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageStatusUpdate {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageStatusResponse {
    pub message_id: String,
    pub status: MessageStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ranks_are_monotone() {
        assert!(MessageStatus::Sent.rank() < MessageStatus::Delivered.rank());
        assert!(MessageStatus::Delivered.rank() < MessageStatus::Read.rank());
    }

    #[test]
    fn lower_ranks_gate_transitions() {
        assert_eq!(MessageStatus::Sent.lower_ranks(), Vec::<&str>::new());
        assert_eq!(MessageStatus::Delivered.lower_ranks(), vec!["sent"]);
        assert_eq!(MessageStatus::Read.lower_ranks(), vec!["sent", "delivered"]);
    }

    #[test]
    fn response_omits_empty_discriminator() {
        let msg = Message {
            id: ObjectId::new(),
            sender_id: ObjectId::new(),
            receiver_id: Some(ObjectId::new()),
            group_id: None,
            content: "hi".to_string(),
            media_url: None,
            created_at: crate::now(),
            updated_at: None,
            status: MessageStatus::Sent,
        };
        let json = serde_json::to_value(msg.to_response("alice")).unwrap();
        assert!(json.get("group_id").is_none());
        assert!(json.get("media_url").is_none());
        assert_eq!(json["sender_username"], "alice");
        assert_eq!(json["status"], "sent");
    }

    #[test]
    fn request_accepts_either_discriminator() {
        let one: MessageRequest =
            serde_json::from_str(r#"{"receiver_id":"5f8d0f1b9d9d9d9d9d9d9d9e","content":"hi"}"#)
                .unwrap();
        assert!(one.receiver_id.is_some() && one.group_id.is_none());
        assert!(one.validate().is_ok());

        let other: MessageRequest =
            serde_json::from_str(r#"{"group_id":"5f8d0f1b9d9d9d9d9d9d9d9f","content":"hi"}"#)
                .unwrap();
        assert!(other.group_id.is_some() && other.receiver_id.is_none());
        assert!(other.validate().is_ok());
    }

    #[test]
    fn request_rejects_bad_discriminators_and_empty_content() {
        let both: MessageRequest = serde_json::from_str(
            r#"{"receiver_id":"a","group_id":"b","content":"hi"}"#,
        )
        .unwrap();
        assert!(both.validate().is_err());

        let neither: MessageRequest = serde_json::from_str(r#"{"content":"hi"}"#).unwrap();
        assert!(neither.validate().is_err());

        let blank: MessageRequest =
            serde_json::from_str(r#"{"receiver_id":"a","content":"   "}"#).unwrap();
        assert!(blank.validate().is_err());
    }
}
