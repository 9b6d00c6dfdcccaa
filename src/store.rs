//! Data collaborators consumed by the completion pipeline
//!
//! Lookups return `Ok(None)` when the row does not exist so each call site decides
//! whether absence is fatal. Errors are reserved for the store itself failing.

use async_trait::async_trait;

use crate::Result;

/// A configured bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bot {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub system_prompt: Option<String>,
}

/// A conversation, addressed externally by its UUID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub uuid: String,
    pub user_id: String,
}

/// A persisted message row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// `human`, `ai` or a provider-specific type
    pub message_type: String,
    pub content: String,
}

impl StoredMessage {
    #[must_use]
    pub fn new(message_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            content: content.into(),
        }
    }
}

/// Named group of bots sharing a knowledge base
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleSet {
    pub id: String,
    pub name: String,
    pub bot_ids: Vec<String>,
}

/// A document chunk returned by similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub id: i64,
    pub bot_id: String,
    pub organization_id: String,
    pub document_id: i64,
    pub content: String,
    pub prev_chunk: Option<i64>,
    pub next_chunk: Option<i64>,
    pub similarity: f32,
}

/// Parameters for one bot's similarity search
#[derive(Debug, Clone, Copy)]
pub struct SimilarityQuery<'a> {
    pub organization_id: &'a str,
    pub bot_id: &'a str,
    pub user_id: &'a str,
    /// Embedding of recent history plus the new message
    pub whole_embedding: &'a [f32],
    /// Embedding of the new message alone
    pub narrow_embedding: &'a [f32],
}

#[async_trait]
pub trait BotStore: Send + Sync {
    /// Fetch a bot by id
    async fn get(&self, bot_id: &str) -> Result<Option<Bot>>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fetch a conversation by its external UUID
    async fn get_by_uuid(&self, uuid: &str) -> Result<Option<Conversation>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Most recent messages of a conversation, newest first
    async fn recent_messages(
        &self,
        user_id: &str,
        conversation_uuid: &str,
        include_deleted: bool,
        limit: usize,
    ) -> Result<Vec<StoredMessage>>;
}

#[async_trait]
pub trait ModuleSetStore: Send + Sync {
    /// Module set configured for a conversation and user
    async fn get(&self, conversation_id: &str, user_id: &str) -> Result<Option<ModuleSet>>;
}

#[async_trait]
pub trait DocumentSearch: Send + Sync {
    /// Chunks of one bot's documents ranked by similarity to the query embeddings
    async fn search(&self, query: SimilarityQuery<'_>) -> Result<Vec<RetrievedChunk>>;
}
