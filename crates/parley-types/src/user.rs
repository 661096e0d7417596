use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::rfc3339;

/// Presence status of a user, independent of any message status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Offline,
    Away,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Online => "online",
            UserStatus::Offline => "offline",
            UserStatus::Away => "away",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(UserStatus::Online),
            "offline" => Ok(UserStatus::Offline),
            "away" => Ok(UserStatus::Away),
            other => Err(format!("invalid user status: {}", other)),
        }
    }
}

/// User document as stored in the `users` collection.
///
/// The bcrypt hash lives in the `password` field and is never exposed: every
/// outbound representation goes through [`UserResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub username: String,
    #[serde(rename = "password")]
    pub password_hash: String,
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub avatar_url: String,
    pub status: UserStatus,
    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<bson::DateTime>,
}

impl User {
    pub fn new(username: String, email: String, password_hash: String) -> Self {
        let now = crate::now();
        Self {
            id: ObjectId::new(),
            username,
            password_hash,
            email,
            full_name: String::new(),
            avatar_url: String::new(),
            status: UserStatus::Offline,
            created_at: now,
            updated_at: now,
            last_login: None,
        }
    }

    pub fn to_response(&self) -> UserResponse {
        UserResponse {
            id: self.id.to_hex(),
            username: self.username.clone(),
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            avatar_url: self.avatar_url.clone(),
            created_at: rfc3339(self.created_at),
            status: self.status,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRegistration {
    pub username: String,
    pub password: String,
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub avatar_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserLogin {
    pub username: String,
    pub password: String,
}

/// Public view of a user. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar_url: String,
    pub created_at: String,
    pub status: UserStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: String,
    pub user: UserResponse,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

/// Response to a status mutation. The field name `UserID` is part of the
/// wire contract shared with existing clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(rename = "UserID")]
    pub user_id: String,
    pub status: UserStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContactRequest {
    pub contact_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_never_in_response() {
        let user = User::new(
            "alice".to_string(),
            "alice@example.com".to_string(),
            "$2b$12$abcdefghijklmnopqrstuv".to_string(),
        );
        let json = serde_json::to_string(&user.to_response()).unwrap();
        assert!(!json.contains("password"));
        assert!(!json.contains("$2b$"));
        assert!(json.contains("\"username\":\"alice\""));
    }

    #[test]
    fn status_round_trip() {
        for s in ["online", "offline", "away"] {
            let parsed: UserStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!("busy".parse::<UserStatus>().is_err());
    }

    #[test]
    fn status_response_uses_wire_field_name() {
        let resp = StatusResponse {
            user_id: "5f8d0f1b9d9d9d9d9d9d9d9d".to_string(),
            status: UserStatus::Online,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["UserID"], "5f8d0f1b9d9d9d9d9d9d9d9d");
        assert_eq!(json["status"], "online");
    }
}
