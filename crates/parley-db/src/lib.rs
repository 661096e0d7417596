//! MongoDB client wrapper.
//!
//! Connects with the documented timeouts, verifies the server with a ping,
//! and exposes typed collection accessors plus index bootstrap. Failing to
//! connect at startup is fatal for every service.

use std::time::Duration;

use anyhow::{Context, Result};
use bson::doc;
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};

use parley_config::{MONGO_CONNECT_TIMEOUT_SECS, MONGO_OPERATION_TIMEOUT_SECS};
use parley_types::{Contact, Group, Message, User};

pub mod collections {
    pub const USERS: &str = "users";
    pub const MESSAGES: &str = "messages";
    pub const GROUPS: &str = "groups";
    pub const CONTACTS: &str = "contacts";
}

pub struct Database {
    db: mongodb::Database,
}

impl Database {
    /// Connect and ping. 10s connect timeout, 5s server selection so write
    /// paths fail fast when the primary is gone.
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .context("failed to parse MongoDB URI")?;
        options.connect_timeout = Some(Duration::from_secs(MONGO_CONNECT_TIMEOUT_SECS));
        options.server_selection_timeout = Some(Duration::from_secs(MONGO_OPERATION_TIMEOUT_SECS));

        let client = Client::with_options(options).context("failed to create MongoDB client")?;
        let db = client.database(database);

        db.run_command(doc! { "ping": 1 }, None)
            .await
            .context("failed to ping MongoDB")?;

        Ok(Self { db })
    }

    pub fn users(&self) -> Collection<User> {
        self.db.collection(collections::USERS)
    }

    pub fn messages(&self) -> Collection<Message> {
        self.db.collection(collections::MESSAGES)
    }

    pub fn groups(&self) -> Collection<Group> {
        self.db.collection(collections::GROUPS)
    }

    pub fn contacts(&self) -> Collection<Contact> {
        self.db.collection(collections::CONTACTS)
    }

    /// Create the indexes every service relies on. Safe to call from each
    /// service at startup; Mongo treats re-creation as a no-op.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let unique = |name: &str| {
            IndexOptions::builder()
                .unique(true)
                .name(Some(name.to_string()))
                .build()
        };

        self.users()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "username": 1 })
                    .options(unique("uniq_username"))
                    .build(),
                None,
            )
            .await?;
        self.users()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(unique("uniq_email"))
                    .build(),
                None,
            )
            .await?;

        self.messages()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "sender_id": 1, "receiver_id": 1, "created_at": -1 })
                    .options(
                        IndexOptions::builder()
                            .name(Some("idx_direct_thread".to_string()))
                            .build(),
                    )
                    .build(),
                None,
            )
            .await?;
        self.messages()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "group_id": 1, "created_at": -1 })
                    .options(
                        IndexOptions::builder()
                            .name(Some("idx_group_thread".to_string()))
                            .build(),
                    )
                    .build(),
                None,
            )
            .await?;

        self.groups()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "member_ids": 1 })
                    .options(
                        IndexOptions::builder()
                            .name(Some("idx_membership".to_string()))
                            .build(),
                    )
                    .build(),
                None,
            )
            .await?;

        self.contacts()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "contact_id": 1 })
                    .options(unique("uniq_contact_pair"))
                    .build(),
                None,
            )
            .await?;

        tracing::info!("database indexes ensured");
        Ok(())
    }
}

/// True when a write failed because it hit one of the unique indexes.
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(write_err)) => write_err.code == 11000,
        _ => false,
    }
}
