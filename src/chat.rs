//! Chat completion service
//!
//! Entry point tying the pipeline together: validate the request, resolve the bot,
//! assemble the prompt, stream the completion through the relay and optionally
//! reflect on the result with a second completion.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::completion::{CompletionOptions, CompletionProvider, CompletionStreamer};
use crate::config::PipelineSettings;
use crate::context::{BuiltContext, ContextBuilder, ContextRequest, ContextSources};
use crate::embedding::EmbeddingProvider;
use crate::relay::{self, Broadcaster};
use crate::store::{Bot, BotStore, ConversationStore, DocumentSearch, MessageStore, ModuleSetStore};
use crate::{Error, Result};

/// Shared collaborators of the chat service
#[derive(Clone)]
pub struct Collaborators {
    pub bots: Arc<dyn BotStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub messages: Arc<dyn MessageStore>,
    pub module_sets: Arc<dyn ModuleSetStore>,
    pub documents: Arc<dyn DocumentSearch>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub completions: Arc<dyn CompletionProvider>,
    pub broadcaster: Arc<dyn Broadcaster>,
}

/// A single completion for a bot within a conversation
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CompletionRequest {
    pub message: String,
    pub model: String,
    pub bot_id: String,
    /// Conversation UUID
    pub session_id: String,
    pub user_id: String,
    pub organization_id: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub brevity: bool,
    #[serde(default)]
    pub exclude_history: bool,
}

impl CompletionRequest {
    /// Check required fields
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the first missing field
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("bot_id", &self.bot_id),
            ("user_id", &self.user_id),
            ("session_id", &self.session_id),
            ("message", &self.message),
            ("model", &self.model),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("{field} is required")));
            }
        }
        Ok(())
    }
}

/// Body of `POST /api/bot-builder`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BotBuilderRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub bot_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub conversation_id: String,
    /// Defaults to the bot's organization
    #[serde(default)]
    pub organization_id: Option<String>,
    /// Prefix for a second, non-streamed completion over the first result
    #[serde(default)]
    pub reflect_message: Option<String>,
    /// Channel to relay the first completion on
    #[serde(default)]
    pub stream_channel: Option<String>,
    #[serde(default)]
    pub brevity: bool,
    #[serde(default)]
    pub exclude_history: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl BotBuilderRequest {
    fn completion_request(&self, organization_id: String) -> CompletionRequest {
        CompletionRequest {
            message: self.message.clone(),
            model: self.model.clone(),
            bot_id: self.bot_id.clone(),
            session_id: self.conversation_id.clone(),
            user_id: self.user_id.clone(),
            organization_id,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            brevity: self.brevity,
            exclude_history: self.exclude_history,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotBuilderResponse {
    pub message: String,
}

/// Runs chat completions against the configured collaborators
pub struct ChatService {
    sources: Collaborators,
    settings: PipelineSettings,
    default_max_tokens: Option<u32>,
}

impl ChatService {
    #[must_use]
    pub const fn new(sources: Collaborators, settings: PipelineSettings) -> Self {
        Self {
            sources,
            settings,
            default_max_tokens: None,
        }
    }

    /// Response length cap for requests that do not set one
    #[must_use]
    pub const fn with_default_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.default_max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub const fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    async fn bot(&self, bot_id: &str) -> Result<Bot> {
        self.sources
            .bots
            .get(bot_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("bot {bot_id}")))
    }

    /// Assemble the provider message list for `request`
    ///
    /// # Errors
    ///
    /// Returns error if any collaborator fails or the conversation is missing
    pub async fn build_messages(
        &self,
        request: &CompletionRequest,
        system_prompt: &str,
    ) -> Result<BuiltContext> {
        let sources = ContextSources {
            messages: self.sources.messages.as_ref(),
            conversations: self.sources.conversations.as_ref(),
            module_sets: self.sources.module_sets.as_ref(),
            documents: self.sources.documents.as_ref(),
            embedder: self.sources.embedder.as_ref(),
        };

        ContextBuilder::new(sources, &self.settings)
            .build(ContextRequest {
                system_prompt,
                message: &request.message,
                model: &request.model,
                organization_id: &request.organization_id,
                user_id: &request.user_id,
                session_id: &request.session_id,
                brevity: request.brevity,
                exclude_history: request.exclude_history,
            })
            .await
    }

    /// Run one completion, relayed on `stream_channel` when given
    ///
    /// # Errors
    ///
    /// Returns a validation error before any collaborator call if required fields are
    /// missing, `NotFound` if the bot does not exist, or the first pipeline failure
    pub async fn create_completion(
        &self,
        request: &CompletionRequest,
        stream_channel: Option<&str>,
    ) -> Result<String> {
        request.validate()?;
        let bot = self.bot(&request.bot_id).await?;
        self.complete(request, &bot, stream_channel).await
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        bot: &Bot,
        stream_channel: Option<&str>,
    ) -> Result<String> {
        let system_prompt = bot.system_prompt.as_deref().unwrap_or_default();

        let options = CompletionOptions {
            model: request.model.clone(),
            max_tokens: request.max_tokens.or(self.default_max_tokens),
            temperature: request.temperature,
        };
        let streamer = CompletionStreamer::new(self.sources.completions.as_ref())
            .with_idle_timeout(self.settings.stream_idle_timeout);

        // Built inside the relay so a failed build still closes the channel
        let prepare = async {
            let built = self.build_messages(request, system_prompt).await?;
            tracing::info!(
                bot = %bot.id,
                session = %request.session_id,
                model = %request.model,
                history_turns = built.history_turns,
                tokens = built.estimated_tokens,
                streamed = stream_channel.is_some(),
                "creating completion"
            );
            Ok::<_, Error>(built.messages)
        };

        relay::relay_completion(
            &streamer,
            self.sources.broadcaster.as_ref(),
            stream_channel,
            prepare,
            &options,
        )
        .await
    }

    /// Handle a bot-builder request
    ///
    /// # Errors
    ///
    /// Returns a validation error if required fields are missing, `NotFound` if the bot
    /// does not exist, or the first pipeline failure
    pub async fn handle(&self, request: &BotBuilderRequest) -> Result<BotBuilderResponse> {
        // Validate before touching any store; the organization is resolved from the bot later
        request
            .completion_request(request.organization_id.clone().unwrap_or_default())
            .validate()?;

        let bot = self.bot(&request.bot_id).await?;
        let organization_id = request
            .organization_id
            .clone()
            .filter(|o| !o.is_empty())
            .unwrap_or_else(|| bot.organization_id.clone());

        let completion = request.completion_request(organization_id);
        let mut message = self
            .complete(&completion, &bot, request.stream_channel.as_deref())
            .await?;

        if let Some(reflect) = request.reflect_message.as_deref().filter(|r| !r.is_empty()) {
            let reflection = CompletionRequest {
                message: format!("{reflect} {message}"),
                ..completion
            };
            message = self.complete(&reflection, &bot, None).await?;
        }

        Ok(BotBuilderResponse { message })
    }
}
