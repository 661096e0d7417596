use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::rfc3339;

/// Group document. `member_ids` is a set that always contains `owner_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub owner_id: ObjectId,
    pub member_ids: Vec<ObjectId>,
    #[serde(default)]
    pub avatar_url: String,
    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

impl Group {
    pub fn is_member(&self, user_id: ObjectId) -> bool {
        self.member_ids.contains(&user_id)
    }

    pub fn to_response(&self) -> GroupResponse {
        GroupResponse {
            id: self.id.to_hex(),
            name: self.name.clone(),
            description: if self.description.is_empty() {
                None
            } else {
                Some(self.description.clone())
            },
            owner_id: self.owner_id.to_hex(),
            member_ids: self.member_ids.iter().map(|id| id.to_hex()).collect(),
            avatar_url: if self.avatar_url.is_empty() {
                None
            } else {
                Some(self.avatar_url.clone())
            },
            created_at: rfc3339(self.created_at),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub member_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupResponse {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub owner_id: String,
    pub member_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_is_a_member() {
        let owner = ObjectId::new();
        let group = Group {
            id: ObjectId::new(),
            name: "team".to_string(),
            description: String::new(),
            owner_id: owner,
            member_ids: vec![owner, ObjectId::new()],
            avatar_url: String::new(),
            created_at: crate::now(),
            updated_at: crate::now(),
        };
        assert!(group.is_member(owner));
        assert!(!group.is_member(ObjectId::new()));
        let resp = group.to_response();
        assert_eq!(resp.member_ids.len(), 2);
        assert!(resp.description.is_none());
    }
}
