use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Contact relation. `{user_id, contact_id}` is unique and directional:
/// adding a contact does not add the inverse edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,
    pub contact_id: ObjectId,
    pub created_at: bson::DateTime,
}

impl Contact {
    pub fn new(user_id: ObjectId, contact_id: ObjectId) -> Self {
        Self {
            id: ObjectId::new(),
            user_id,
            contact_id,
            created_at: crate::now(),
        }
    }
}
