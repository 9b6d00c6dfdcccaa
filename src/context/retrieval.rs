//! Document context retrieval across a conversation's module set

use std::time::Duration;

use crate::embedding::EmbeddingProvider;
use crate::store::{ConversationStore, DocumentSearch, ModuleSetStore, RetrievedChunk, SimilarityQuery};
use crate::turn::Turn;
use crate::{Error, Result};

/// Number of recent turns folded into the whole-conversation probe
pub const PROBE_TURNS: usize = 4;

/// Inputs for one retrieval
#[derive(Debug, Clone, Copy)]
pub struct RetrievalQuery<'a> {
    pub organization_id: &'a str,
    pub user_id: &'a str,
    pub session_id: &'a str,
    pub message: &'a str,
    /// Windowed history, newest first
    pub history: &'a [Turn],
}

/// Builds the context block for a pending turn
pub struct ContextRetriever<'a> {
    conversations: &'a dyn ConversationStore,
    module_sets: &'a dyn ModuleSetStore,
    documents: &'a dyn DocumentSearch,
    embedder: &'a dyn EmbeddingProvider,
    search_timeout: Duration,
}

impl<'a> ContextRetriever<'a> {
    #[must_use]
    pub fn new(
        conversations: &'a dyn ConversationStore,
        module_sets: &'a dyn ModuleSetStore,
        documents: &'a dyn DocumentSearch,
        embedder: &'a dyn EmbeddingProvider,
        search_timeout: Duration,
    ) -> Self {
        Self {
            conversations,
            module_sets,
            documents,
            embedder,
            search_timeout,
        }
    }

    /// Retrieve and linearize document chunks relevant to the pending turn
    ///
    /// Each bot of the module set is searched concurrently; a failing or timed-out
    /// search only removes that bot's chunks.
    ///
    /// # Errors
    ///
    /// Returns error if embedding fails, or the conversation or its module set is missing
    pub async fn retrieve(&self, query: RetrievalQuery<'_>) -> Result<String> {
        let probe = embedding_probe(query.history, query.message);
        let (whole_embedding, narrow_embedding) = tokio::try_join!(
            self.embedder.embed(&probe),
            self.embedder.embed(query.message),
        )?;

        let conversation = self
            .conversations
            .get_by_uuid(query.session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conversation {}", query.session_id)))?;

        let module_set = self
            .module_sets
            .get(&conversation.id, query.user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("module set for conversation {}", conversation.id)))?;

        let searches = module_set.bot_ids.iter().map(|bot_id| {
            let search = self.documents.search(SimilarityQuery {
                organization_id: query.organization_id,
                bot_id,
                user_id: query.user_id,
                whole_embedding: &whole_embedding,
                narrow_embedding: &narrow_embedding,
            });
            async move { (bot_id, tokio::time::timeout(self.search_timeout, search).await) }
        });

        let mut chunks: Vec<RetrievedChunk> = Vec::new();
        for (bot_id, outcome) in futures::future::join_all(searches).await {
            match outcome {
                Ok(Ok(found)) => chunks.extend(found),
                Ok(Err(e)) => {
                    tracing::warn!(bot = %bot_id, error = %e, "similarity search failed, skipping bot");
                }
                Err(_) => {
                    tracing::warn!(
                        bot = %bot_id,
                        timeout_ms = self.search_timeout.as_millis(),
                        "similarity search timed out, skipping bot"
                    );
                }
            }
        }

        tracing::debug!(
            module_set = %module_set.id,
            bots = module_set.bot_ids.len(),
            chunks = chunks.len(),
            "context retrieved"
        );

        Ok(linearize(&chunks))
    }
}

/// Probe text embedding the conversational intent as a whole
///
/// The [`PROBE_TURNS`] newest turns in chronological order, then the new message.
#[must_use]
pub fn embedding_probe(history: &[Turn], message: &str) -> String {
    let recent: Vec<String> = history
        .iter()
        .take(PROBE_TURNS)
        .rev()
        .map(|t| format!("{} - {}", t.role, t.content))
        .collect();

    format!("{}\n\nuser - {message}", recent.join("\n"))
}

/// Join chunk contents in retrieval order
#[must_use]
pub fn linearize(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
