//! Message repository

use async_trait::async_trait;
use uuid::Uuid;

use super::{DbPool, conn};
use crate::store::{MessageStore, StoredMessage};
use crate::{Error, Result};

/// A message to persist
#[derive(Debug, Clone, Copy)]
pub struct NewMessage<'a> {
    pub conversation_uuid: &'a str,
    pub user_id: &'a str,
    pub message_type: &'a str,
    pub content: &'a str,
}

/// Message repository
#[derive(Clone)]
pub struct MessageRepo {
    pool: DbPool,
}

impl MessageRepo {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append a message, returning its id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn add(&self, message: NewMessage<'_>) -> Result<String> {
        let conn = conn(&self.pool)?;
        let id = Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO messages (id, conversation_uuid, user_id, type, content)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            [
                id.as_str(),
                message.conversation_uuid,
                message.user_id,
                message.message_type,
                message.content,
            ],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(id)
    }

    /// Soft-delete a message
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn mark_deleted(&self, id: &str) -> Result<bool> {
        let conn = conn(&self.pool)?;
        let changed = conn
            .execute("UPDATE messages SET deleted = 1 WHERE id = ?1", [id])
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Most recent messages of a conversation, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn recent(
        &self,
        user_id: &str,
        conversation_uuid: &str,
        include_deleted: bool,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let conn = conn(&self.pool)?;

        // Insertion order breaks ties between rows written in the same second
        let mut stmt = conn
            .prepare(
                "SELECT type, content FROM messages
                 WHERE conversation_uuid = ?1 AND user_id = ?2 AND (?3 OR deleted = 0)
                 ORDER BY rowid DESC LIMIT ?4",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        stmt.query_map(
            rusqlite::params![conversation_uuid, user_id, include_deleted, limit],
            |row| Ok(StoredMessage::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .map_err(|e| Error::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(e.to_string()))
    }
}

#[async_trait]
impl MessageStore for MessageRepo {
    async fn recent_messages(
        &self,
        user_id: &str,
        conversation_uuid: &str,
        include_deleted: bool,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        self.recent(user_id, conversation_uuid, include_deleted, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn add(repo: &MessageRepo, kind: &str, content: &str) -> String {
        repo.add(NewMessage {
            conversation_uuid: "c1",
            user_id: "u1",
            message_type: kind,
            content,
        })
        .unwrap()
    }

    #[test]
    fn test_recent_is_newest_first_and_limited() {
        let repo = MessageRepo::new(init_memory().unwrap());
        add(&repo, "human", "one");
        add(&repo, "ai", "two");
        add(&repo, "human", "three");

        let messages = repo.recent("u1", "c1", false, 2).unwrap();
        assert_eq!(
            messages,
            vec![StoredMessage::new("human", "three"), StoredMessage::new("ai", "two")]
        );
    }

    #[test]
    fn test_deleted_rows_excluded_unless_requested() {
        let repo = MessageRepo::new(init_memory().unwrap());
        add(&repo, "human", "kept");
        let gone = add(&repo, "ai", "gone");
        assert!(repo.mark_deleted(&gone).unwrap());

        assert_eq!(repo.recent("u1", "c1", false, 10).unwrap().len(), 1);
        assert_eq!(repo.recent("u1", "c1", true, 10).unwrap().len(), 2);
    }

    #[test]
    fn test_scoped_to_user_and_conversation() {
        let repo = MessageRepo::new(init_memory().unwrap());
        add(&repo, "human", "mine");
        repo.add(NewMessage {
            conversation_uuid: "c2",
            user_id: "u1",
            message_type: "human",
            content: "other conversation",
        })
        .unwrap();

        assert_eq!(repo.recent("u1", "c1", false, 10).unwrap().len(), 1);
        assert!(repo.recent("u2", "c1", false, 10).unwrap().is_empty());
    }
}
