//! Module set repository

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use super::{DbPool, conn};
use crate::store::{ModuleSet, ModuleSetStore};
use crate::{Error, Result};

/// Module set repository
#[derive(Clone)]
pub struct ModuleSetRepo {
    pool: DbPool,
}

impl ModuleSetRepo {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Attach a module set to a conversation
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create(
        &self,
        conversation_id: &str,
        user_id: &str,
        name: &str,
        bot_ids: &[String],
    ) -> Result<ModuleSet> {
        let conn = conn(&self.pool)?;
        let id = Uuid::new_v4().to_string();
        let bots = serde_json::to_string(bot_ids)?;

        conn.execute(
            "INSERT INTO module_sets (id, name, conversation_id, user_id, bot_ids)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            [id.as_str(), name, conversation_id, user_id, bots.as_str()],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(ModuleSet {
            id,
            name: name.to_string(),
            bot_ids: bot_ids.to_vec(),
        })
    }

    /// Module set of a conversation for a user
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails or `bot_ids` is not a JSON array
    pub fn find(&self, conversation_id: &str, user_id: &str) -> Result<Option<ModuleSet>> {
        let conn = conn(&self.pool)?;
        let row = conn
            .query_row(
                "SELECT id, name, bot_ids FROM module_sets
                 WHERE conversation_id = ?1 AND user_id = ?2
                 ORDER BY rowid DESC LIMIT 1",
                [conversation_id, user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;

        row.map(|(id, name, bots)| -> Result<ModuleSet> {
            Ok(ModuleSet {
                id,
                name,
                bot_ids: serde_json::from_str(&bots)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl ModuleSetStore for ModuleSetRepo {
    async fn get(&self, conversation_id: &str, user_id: &str) -> Result<Option<ModuleSet>> {
        self.find(conversation_id, user_id)
    }
}
