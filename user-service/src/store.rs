//! All MongoDB access of the user service.
//!
//! Owns the `users`, `contacts` and `groups` collections. The `messages`
//! collection is touched read-only, for deriving the contact list from
//! conversation history; writes to it belong to the message service.

use bson::oid::ObjectId;
use bson::{doc, Bson};
use futures_util::TryStreamExt;
use mongodb::options::FindOptions;
use mongodb::Collection;

use parley_db::{is_duplicate_key, Database};
use parley_error::{AppError, AppResult};
use parley_types::{Contact, Group, Message, ProfileUpdate, User, UserStatus};

pub const DEFAULT_SEARCH_LIMIT: i64 = 20;

pub struct UserStore {
    users: Collection<User>,
    contacts: Collection<Contact>,
    groups: Collection<Group>,
    messages: Collection<Message>,
}

impl UserStore {
    pub fn new(db: &Database) -> Self {
        Self {
            users: db.users(),
            contacts: db.contacts(),
            groups: db.groups(),
            messages: db.messages(),
        }
    }

    // ===== Users =====

    /// Insert a new user. Duplicate username/email surfaces as a conflict,
    /// backed by the unique indexes rather than a racy pre-check.
    pub async fn insert_user(&self, user: &User) -> AppResult<()> {
        match self.users.insert_one(user, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                Err(AppError::conflict("username or email already exists"))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_id(&self, id: ObjectId) -> AppResult<Option<User>> {
        Ok(self.users.find_one(doc! { "_id": id }, None).await?)
    }

    pub async fn find_by_username(&self, username: &str) -> AppResult<Option<User>> {
        Ok(self
            .users
            .find_one(doc! { "username": username }, None)
            .await?)
    }

    pub async fn record_login(&self, id: ObjectId) -> AppResult<()> {
        self.users
            .update_one(
                doc! { "_id": id },
                doc! { "$set": { "last_login": parley_types::now() } },
                None,
            )
            .await?;
        Ok(())
    }

    pub async fn search_users(
        &self,
        query: &str,
        limit: i64,
        exclude: ObjectId,
    ) -> AppResult<Vec<User>> {
        let regex = doc! { "$regex": escape_regex(query), "$options": "i" };
        let filter = doc! {
            "_id": { "$ne": exclude },
            "$or": [ { "username": regex.clone() }, { "full_name": regex } ],
        };
        let options = FindOptions::builder()
            .sort(doc! { "username": 1 })
            .limit(limit)
            .build();
        let cursor = self.users.find(filter, options).await?;
        Ok(cursor.try_collect().await?)
    }

    pub async fn update_profile(
        &self,
        id: ObjectId,
        update: &ProfileUpdate,
        status: Option<UserStatus>,
    ) -> AppResult<Option<User>> {
        let mut set = doc! { "updated_at": parley_types::now() };
        if let Some(full_name) = &update.full_name {
            set.insert("full_name", full_name);
        }
        if let Some(avatar_url) = &update.avatar_url {
            set.insert("avatar_url", avatar_url);
        }
        if let Some(status) = status {
            set.insert("status", status.as_str());
        }

        self.users
            .update_one(doc! { "_id": id }, doc! { "$set": set }, None)
            .await?;
        self.find_by_id(id).await
    }

    pub async fn update_status(&self, id: ObjectId, status: UserStatus) -> AppResult<bool> {
        let result = self
            .users
            .update_one(
                doc! { "_id": id },
                doc! { "$set": {
                    "status": status.as_str(),
                    "updated_at": parley_types::now(),
                } },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    pub async fn users_by_ids(&self, ids: &[ObjectId]) -> AppResult<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let cursor = self
            .users
            .find(doc! { "_id": { "$in": ids } }, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    pub async fn count_users(&self, ids: &[ObjectId]) -> AppResult<u64> {
        Ok(self
            .users
            .count_documents(doc! { "_id": { "$in": ids } }, None)
            .await?)
    }

    // ===== Contacts =====

    pub async fn find_contact(
        &self,
        user_id: ObjectId,
        contact_id: ObjectId,
    ) -> AppResult<Option<Contact>> {
        Ok(self
            .contacts
            .find_one(doc! { "user_id": user_id, "contact_id": contact_id }, None)
            .await?)
    }

    pub async fn insert_contact(&self, contact: &Contact) -> AppResult<bool> {
        match self.contacts.insert_one(contact, None).await {
            Ok(_) => Ok(true),
            // Concurrent add of the same pair; the row exists, which is all
            // the caller wanted.
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete_contact(&self, user_id: ObjectId, contact_id: ObjectId) -> AppResult<bool> {
        let result = self
            .contacts
            .delete_one(doc! { "user_id": user_id, "contact_id": contact_id }, None)
            .await?;
        Ok(result.deleted_count > 0)
    }

    pub async fn contact_ids_of(&self, user_id: ObjectId) -> AppResult<Vec<ObjectId>> {
        let cursor = self
            .contacts
            .find(doc! { "user_id": user_id }, None)
            .await?;
        let contacts: Vec<Contact> = cursor.try_collect().await?;
        Ok(contacts.into_iter().map(|c| c.contact_id).collect())
    }

    /// Distinct users the caller has exchanged 1:1 messages with.
    pub async fn message_counterparties(&self, user_id: ObjectId) -> AppResult<Vec<ObjectId>> {
        let sent_to = self
            .messages
            .distinct("receiver_id", doc! { "sender_id": user_id }, None)
            .await?;
        let received_from = self
            .messages
            .distinct("sender_id", doc! { "receiver_id": user_id }, None)
            .await?;

        let mut ids: Vec<ObjectId> = sent_to
            .into_iter()
            .chain(received_from)
            .filter_map(|value| match value {
                Bson::ObjectId(id) => Some(id),
                _ => None,
            })
            .filter(|id| *id != user_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    // ===== Groups =====

    pub async fn insert_group(&self, group: &Group) -> AppResult<()> {
        self.groups.insert_one(group, None).await?;
        Ok(())
    }

    pub async fn groups_for_member(&self, user_id: ObjectId) -> AppResult<Vec<Group>> {
        let options = FindOptions::builder().sort(doc! { "created_at": -1 }).build();
        let cursor = self
            .groups
            .find(doc! { "member_ids": user_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }
}

/// Treat the user's query as a literal, not a pattern.
pub fn escape_regex(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(
            c,
            '\\' | '.' | '^' | '$' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | ']' | '{' | '}'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_queries_are_taken_literally() {
        assert_eq!(escape_regex("ali"), "ali");
        assert_eq!(escape_regex("a+b"), "a\\+b");
        assert_eq!(escape_regex(".*"), "\\.\\*");
    }
}
