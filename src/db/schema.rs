//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Bots
        CREATE TABLE IF NOT EXISTS bots (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            name TEXT NOT NULL,
            system_prompt TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Conversations, addressed externally by uuid
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            uuid TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Messages; type is 'human', 'ai' or provider specific
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_uuid TEXT NOT NULL,
            user_id TEXT NOT NULL,
            type TEXT NOT NULL,
            content TEXT NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_uuid, user_id);

        -- Module sets; bot_ids is a JSON array
        CREATE TABLE IF NOT EXISTS module_sets (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            bot_ids TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_module_sets_conversation
            ON module_sets(conversation_id, user_id);

        -- Document chunks; embedding is little-endian f32
        CREATE TABLE IF NOT EXISTS bot_documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bot_id TEXT NOT NULL,
            organization_id TEXT NOT NULL,
            user_id TEXT,
            document_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            prev_chunk INTEGER,
            next_chunk INTEGER,
            embedding BLOB NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_bot_documents_bot
            ON bot_documents(organization_id, bot_id);

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::debug!("migrated database to v1");
    Ok(())
}
