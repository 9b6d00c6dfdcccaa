//! Context builder for assembling the provider message list

use crate::Result;
use crate::config::PipelineSettings;
use crate::embedding::EmbeddingProvider;
use crate::prompt;
use crate::store::{ConversationStore, DocumentSearch, MessageStore, ModuleSetStore};
use crate::tokens::Encoding;
use crate::turn::Turn;

use super::history::HistoryWindower;
use super::retrieval::{ContextRetriever, RetrievalQuery};

/// Collaborators the builder reads from
#[derive(Clone, Copy)]
pub struct ContextSources<'a> {
    pub messages: &'a dyn MessageStore,
    pub conversations: &'a dyn ConversationStore,
    pub module_sets: &'a dyn ModuleSetStore,
    pub documents: &'a dyn DocumentSearch,
    pub embedder: &'a dyn EmbeddingProvider,
}

/// One pending turn to build a prompt for
#[derive(Debug, Clone, Copy)]
pub struct ContextRequest<'a> {
    /// Bot system prompt; empty when the bot has none
    pub system_prompt: &'a str,
    pub message: &'a str,
    pub model: &'a str,
    pub organization_id: &'a str,
    pub user_id: &'a str,
    pub session_id: &'a str,
    pub brevity: bool,
    pub exclude_history: bool,
}

/// Message list ready for the completion provider
#[derive(Debug, Clone)]
pub struct BuiltContext {
    /// System message, chronological history, user turn
    pub messages: Vec<Turn>,
    /// Linearized document context embedded in the system message
    pub context: String,
    /// History turns that survived windowing and the prompt budget
    pub history_turns: usize,
    /// Exact token count of `messages`
    pub estimated_tokens: usize,
}

/// Builds the prompt for a turn: history, retrieval, composition, budget fit
pub struct ContextBuilder<'a> {
    sources: ContextSources<'a>,
    settings: &'a PipelineSettings,
}

impl<'a> ContextBuilder<'a> {
    #[must_use]
    pub const fn new(sources: ContextSources<'a>, settings: &'a PipelineSettings) -> Self {
        Self { sources, settings }
    }

    /// Build the message list for `request`
    ///
    /// # Errors
    ///
    /// Returns error if history cannot be fetched, embedding fails, the conversation or
    /// its module set is missing, or the tokenizer cannot be loaded
    pub async fn build(&self, request: ContextRequest<'_>) -> Result<BuiltContext> {
        let encoding = Encoding::for_model(request.model);
        let budget = self.settings.budget;

        let history = HistoryWindower::new(
            self.sources.messages,
            budget.history_allowed,
            self.settings.history_limit,
            encoding,
        )
        .window(request.user_id, request.session_id, request.exclude_history)
        .await?;

        let retriever = ContextRetriever::new(
            self.sources.conversations,
            self.sources.module_sets,
            self.sources.documents,
            self.sources.embedder,
            self.settings.search_timeout,
        );
        let context = retriever
            .retrieve(RetrievalQuery {
                organization_id: request.organization_id,
                user_id: request.user_id,
                session_id: request.session_id,
                message: request.message,
                history: &history,
            })
            .await?;

        let mut messages = prompt::compose(
            request.system_prompt,
            &context,
            &history,
            request.message,
            request.brevity,
        );
        let estimated_tokens = prompt::fit_to_budget(&mut messages, budget.total_allowed, encoding)?;

        tracing::debug!(
            session = request.session_id,
            encoding = encoding.name(),
            messages = messages.len(),
            estimated_tokens,
            "prompt assembled"
        );

        Ok(BuiltContext {
            history_turns: messages.len().saturating_sub(2),
            messages,
            context,
            estimated_tokens,
        })
    }
}
