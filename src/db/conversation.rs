//! Conversation repository

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use super::{DbPool, conn};
use crate::store::{Conversation, ConversationStore};
use crate::{Error, Result};

/// Conversation repository
#[derive(Clone)]
pub struct ConversationRepo {
    pool: DbPool,
}

impl ConversationRepo {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a conversation with the given external uuid
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails or the uuid is taken
    pub fn create(&self, uuid: &str, user_id: &str) -> Result<Conversation> {
        let conn = conn(&self.pool)?;
        let id = Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO conversations (id, uuid, user_id) VALUES (?1, ?2, ?3)",
            [id.as_str(), uuid, user_id],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Conversation {
            id,
            uuid: uuid.to_string(),
            user_id: user_id.to_string(),
        })
    }

    /// Find a conversation by external uuid
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_by_uuid(&self, uuid: &str) -> Result<Option<Conversation>> {
        let conn = conn(&self.pool)?;
        conn.query_row(
            "SELECT id, uuid, user_id FROM conversations WHERE uuid = ?1",
            [uuid],
            |row| {
                Ok(Conversation {
                    id: row.get(0)?,
                    uuid: row.get(1)?,
                    user_id: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| Error::Database(e.to_string()))
    }
}

#[async_trait]
impl ConversationStore for ConversationRepo {
    async fn get_by_uuid(&self, uuid: &str) -> Result<Option<Conversation>> {
        self.find_by_uuid(uuid)
    }
}
