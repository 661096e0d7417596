//! All MongoDB access of the message service.
//!
//! Only single-document operations are used, and every status write is a
//! conditional monotone update, so at-least-once redelivery from the broker
//! collapses to a no-op instead of rewinding a message's status.

use std::collections::HashMap;

use bson::oid::ObjectId;
use bson::{doc, Bson};
use futures_util::TryStreamExt;
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use mongodb::Collection;

use parley_db::Database;
use parley_error::AppResult;
use parley_types::{Group, Message, MessageStatus, User};

pub const DEFAULT_PAGE_LIMIT: i64 = 50;

pub struct MessageStore {
    messages: Collection<Message>,
    groups: Collection<Group>,
    users: Collection<User>,
}

impl MessageStore {
    pub fn new(db: &Database) -> Self {
        Self {
            messages: db.messages(),
            groups: db.groups(),
            users: db.users(),
        }
    }

    pub async fn insert_message(&self, message: &Message) -> AppResult<()> {
        self.messages.insert_one(message, None).await?;
        Ok(())
    }

    pub async fn find_message(&self, id: ObjectId) -> AppResult<Option<Message>> {
        Ok(self.messages.find_one(doc! { "_id": id }, None).await?)
    }

    /// Advance a message's status, but only upward. Returns the updated
    /// document when the transition happened, `None` when it was a
    /// duplicate, a downgrade, or the id is unknown.
    pub async fn advance_status(
        &self,
        id: ObjectId,
        status: MessageStatus,
    ) -> AppResult<Option<Message>> {
        let lower: Vec<Bson> = status
            .lower_ranks()
            .into_iter()
            .map(|s| Bson::String(s.to_string()))
            .collect();
        if lower.is_empty() {
            // Nothing ranks below `sent`; there is no transition to make.
            return Ok(None);
        }

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let updated = self
            .messages
            .find_one_and_update(
                doc! { "_id": id, "status": { "$in": lower } },
                doc! { "$set": {
                    "status": status.as_str(),
                    "updated_at": parley_types::now(),
                } },
                options,
            )
            .await?;
        Ok(updated)
    }

    /// Newest-first page of the 1:1 thread between `a` and `b`.
    pub async fn conversation_page(
        &self,
        a: ObjectId,
        b: ObjectId,
        limit: i64,
        before: Option<bson::DateTime>,
    ) -> AppResult<Vec<Message>> {
        let pair = doc! { "$or": [
            { "sender_id": a, "receiver_id": b },
            { "sender_id": b, "receiver_id": a },
        ] };
        self.page(pair, limit, before).await
    }

    /// Newest-first page of a group thread.
    pub async fn group_page(
        &self,
        group_id: ObjectId,
        limit: i64,
        before: Option<bson::DateTime>,
    ) -> AppResult<Vec<Message>> {
        self.page(doc! { "group_id": group_id }, limit, before).await
    }

    async fn page(
        &self,
        mut filter: bson::Document,
        limit: i64,
        before: Option<bson::DateTime>,
    ) -> AppResult<Vec<Message>> {
        if let Some(before) = before {
            filter.insert("created_at", doc! { "$lt": before });
        }
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .limit(limit)
            .build();
        let cursor = self.messages.find(filter, options).await?;
        Ok(cursor.try_collect().await?)
    }

    /// Mark every unread message from `sender` to `receiver` as read in one
    /// bulk write. Returns how many documents actually changed.
    pub async fn mark_read(&self, sender: ObjectId, receiver: ObjectId) -> AppResult<u64> {
        let result = self
            .messages
            .update_many(
                doc! {
                    "sender_id": sender,
                    "receiver_id": receiver,
                    "status": { "$ne": MessageStatus::Read.as_str() },
                },
                doc! { "$set": {
                    "status": MessageStatus::Read.as_str(),
                    "updated_at": parley_types::now(),
                } },
                None,
            )
            .await?;
        Ok(result.modified_count)
    }

    pub async fn find_group(&self, id: ObjectId) -> AppResult<Option<Group>> {
        Ok(self.groups.find_one(doc! { "_id": id }, None).await?)
    }

    /// Ids of every group the user belongs to, for search scoping.
    pub async fn group_ids_for_member(&self, user_id: ObjectId) -> AppResult<Vec<ObjectId>> {
        let cursor = self
            .groups
            .find(doc! { "member_ids": user_id }, None)
            .await?;
        let groups: Vec<Group> = cursor.try_collect().await?;
        Ok(groups.into_iter().map(|g| g.id).collect())
    }

    /// Case-insensitive substring search over message content within the
    /// given scope filter.
    pub async fn search(
        &self,
        mut scope: bson::Document,
        query: &str,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        scope.insert(
            "content",
            doc! { "$regex": escape_regex(query), "$options": "i" },
        );
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .limit(limit)
            .build();
        let cursor = self.messages.find(scope, options).await?;
        Ok(cursor.try_collect().await?)
    }

    pub async fn username(&self, id: ObjectId) -> AppResult<Option<String>> {
        let user = self.users.find_one(doc! { "_id": id }, None).await?;
        Ok(user.map(|u| u.username))
    }

    /// Usernames for a set of ids, for building a page of responses with one
    /// round trip.
    pub async fn usernames_for(
        &self,
        ids: &[ObjectId],
    ) -> AppResult<HashMap<ObjectId, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let cursor = self
            .users
            .find(doc! { "_id": { "$in": ids } }, None)
            .await?;
        let users: Vec<User> = cursor.try_collect().await?;
        Ok(users.into_iter().map(|u| (u.id, u.username)).collect())
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
    fn regex_metacharacters_are_escaped() {
        assert_eq!(escape_regex("hello"), "hello");
        assert_eq!(escape_regex("a.b"), "a\\.b");
        assert_eq!(escape_regex("(hi)*"), "\\(hi\\)\\*");
        assert_eq!(escape_regex("50$ [offer]"), "50\\$ \\[offer\\]");
    }
}
