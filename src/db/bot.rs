//! Bot repository

use async_trait::async_trait;
use rusqlite::OptionalExtension;

use super::{DbPool, conn};
use crate::store::{Bot, BotStore};
use crate::{Error, Result};

/// Bot repository
#[derive(Clone)]
pub struct BotRepo {
    pool: DbPool,
}

impl BotRepo {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or replace a bot
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn upsert(&self, bot: &Bot) -> Result<()> {
        let conn = conn(&self.pool)?;
        conn.execute(
            "INSERT OR REPLACE INTO bots (id, organization_id, name, system_prompt)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![bot.id, bot.organization_id, bot.name, bot.system_prompt],
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    /// Find a bot by id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find(&self, bot_id: &str) -> Result<Option<Bot>> {
        let conn = conn(&self.pool)?;
        conn.query_row(
            "SELECT id, organization_id, name, system_prompt FROM bots WHERE id = ?1",
            [bot_id],
            |row| {
                Ok(Bot {
                    id: row.get(0)?,
                    organization_id: row.get(1)?,
                    name: row.get(2)?,
                    system_prompt: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|e| Error::Database(e.to_string()))
    }
}

#[async_trait]
impl BotStore for BotRepo {
    async fn get(&self, bot_id: &str) -> Result<Option<Bot>> {
        self.find(bot_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    #[test]
    fn test_upsert_and_find() {
        let repo = BotRepo::new(init_memory().unwrap());
        assert!(repo.find("b1").unwrap().is_none());

        let bot = Bot {
            id: "b1".to_string(),
            organization_id: "org".to_string(),
            name: "Tutor".to_string(),
            system_prompt: None,
        };
        repo.upsert(&bot).unwrap();
        assert_eq!(repo.find("b1").unwrap(), Some(bot.clone()));

        let updated = Bot {
            system_prompt: Some("Be kind.".to_string()),
            ..bot
        };
        repo.upsert(&updated).unwrap();
        assert_eq!(
            repo.find("b1").unwrap().unwrap().system_prompt.as_deref(),
            Some("Be kind.")
        );
    }
}
