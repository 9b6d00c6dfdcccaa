//! Bot-builder prompt chains
//!
//! Each chain is a sequence of one-off completions against dedicated builder bots.
//! Every step goes through [`ChatService::handle`], so the usual validation, context
//! assembly and relay apply.

use crate::chat::{BotBuilderRequest, ChatService};
use crate::config::DEFAULT_MODEL;
use crate::store::StoredMessage;
use crate::{Error, Result};

/// Messages considered when generating an insight
pub const INSIGHT_WINDOW: usize = 6;

/// Bot ids used by the builder chains
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuilderBots {
    /// Drafts a system prompt from a topic
    pub prompt_bot_id: Option<String>,
    /// Parses the draft into structured form
    pub parser_bot_id: Option<String>,
    /// Refines the parsed prompt
    pub refiner_bot_id: Option<String>,
    /// Suggests reference links for a system prompt
    pub links_bot_id: Option<String>,
    /// Summarizes a tutoring exchange
    pub insight_bot_id: Option<String>,
}

/// Conversation the builder steps run in
#[derive(Debug, Clone)]
pub struct BuilderSession {
    pub user_id: String,
    pub conversation_id: String,
    pub model: String,
}

impl BuilderSession {
    #[must_use]
    pub fn new(user_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

/// Seed message for the prompt bot
#[must_use]
pub fn prompt_from_topic(topic: &str) -> String {
    format!("Subject matter expert specializing in {topic}")
}

/// Transcript of the latest exchange for the insight bot
///
/// Takes the last [`INSIGHT_WINDOW`] messages, drops leading messages not written by
/// the student and requires more than two to remain.
///
/// # Errors
///
/// Returns a validation error if there are not enough messages
pub fn insight_transcript(messages: &[StoredMessage]) -> Result<String> {
    let not_enough = || Error::Validation("not enough messages to generate insight".to_string());

    if messages.len() < INSIGHT_WINDOW {
        return Err(not_enough());
    }

    let recent = &messages[messages.len() - INSIGHT_WINDOW..];
    let first_human = recent
        .iter()
        .position(|m| m.message_type == "human")
        .unwrap_or(recent.len());
    let recent = &recent[first_human..];

    if recent.len() <= 2 {
        return Err(not_enough());
    }

    Ok(recent
        .iter()
        .filter_map(|m| match m.message_type.as_str() {
            "human" => Some(format!("# STUDENT:\n{}\n\n", m.content)),
            "ai" => Some(format!("# AI TUTOR:\n{}\n\n", m.content)),
            _ => None,
        })
        .collect())
}

/// Runs builder chains on behalf of one user and conversation
pub struct BotBuilder<'a> {
    chat: &'a ChatService,
    bots: &'a BuilderBots,
    session: BuilderSession,
}

impl<'a> BotBuilder<'a> {
    #[must_use]
    pub const fn new(chat: &'a ChatService, bots: &'a BuilderBots, session: BuilderSession) -> Self {
        Self { chat, bots, session }
    }

    /// One-off completion against `bot_id`
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty message, a completion error if the bot
    /// answers with nothing, or the first pipeline failure
    pub async fn singleton_chat(
        &self,
        bot_id: &str,
        message: &str,
        reflect_message: Option<&str>,
        stream_channel: Option<&str>,
    ) -> Result<String> {
        if message.trim().is_empty() {
            return Err(Error::Validation("no message provided".to_string()));
        }

        let response = self
            .chat
            .handle(&BotBuilderRequest {
                message: message.to_string(),
                model: self.session.model.clone(),
                bot_id: bot_id.to_string(),
                user_id: self.session.user_id.clone(),
                conversation_id: self.session.conversation_id.clone(),
                reflect_message: reflect_message.map(str::to_string),
                stream_channel: stream_channel.map(str::to_string),
                ..BotBuilderRequest::default()
            })
            .await?;

        if response.message.is_empty() {
            return Err(Error::Completion(format!("bot {bot_id} returned an empty message")));
        }
        Ok(response.message)
    }

    /// Draft, parse and refine a system prompt for `topic`; only the last step streams
    ///
    /// # Errors
    ///
    /// Returns a config error if a builder bot is not configured, or the first step failure
    pub async fn system_prompt_from_topic(
        &self,
        topic: &str,
        stream_channel: Option<&str>,
    ) -> Result<String> {
        let prompt_bot = required(self.bots.prompt_bot_id.as_deref(), "prompt")?;
        let parser_bot = required(self.bots.parser_bot_id.as_deref(), "parser")?;
        let refiner_bot = required(self.bots.refiner_bot_id.as_deref(), "refiner")?;

        let draft = self
            .singleton_chat(prompt_bot, &prompt_from_topic(topic), None, None)
            .await?;
        let parsed = self.singleton_chat(parser_bot, &draft, None, None).await?;
        tracing::debug!(topic, draft = draft.len(), parsed = parsed.len(), "system prompt drafted");

        self.singleton_chat(refiner_bot, &parsed, None, stream_channel)
            .await
    }

    /// Reference links suggested for a system prompt
    ///
    /// # Errors
    ///
    /// Returns a config error if the links bot is not configured, or the completion failure
    pub async fn links_from_system_prompt(
        &self,
        system_prompt: &str,
        stream_channel: Option<&str>,
    ) -> Result<String> {
        let links_bot = required(self.bots.links_bot_id.as_deref(), "links")?;
        self.singleton_chat(links_bot, system_prompt, None, stream_channel)
            .await
    }

    /// Insight on the latest tutoring exchange
    ///
    /// # Errors
    ///
    /// Returns a validation error if there are not enough messages, a config error if
    /// the insight bot is not configured, or the completion failure
    pub async fn insight_from_messages(&self, messages: &[StoredMessage]) -> Result<String> {
        let transcript = insight_transcript(messages)?;
        let insight_bot = required(self.bots.insight_bot_id.as_deref(), "insight")?;
        self.singleton_chat(insight_bot, &transcript, None, None).await
    }
}

fn required<'b>(bot_id: Option<&'b str>, role: &str) -> Result<&'b str> {
    bot_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Config(format!("{role} builder bot is not configured")))
}
