//! Bot-builder endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use super::{ApiError, ApiState};
use crate::builder::{BotBuilder, BuilderSession};
use crate::chat::{BotBuilderRequest, BotBuilderResponse};
use crate::store::StoredMessage;

/// Conversation scope shared by the chain endpoints
#[derive(Debug, Deserialize)]
pub struct SessionFields {
    pub user_id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stream_channel: Option<String>,
}

impl SessionFields {
    fn session(&self) -> BuilderSession {
        let mut session = BuilderSession::new(&self.user_id, &self.conversation_id);
        if let Some(model) = self.model.as_ref().filter(|m| !m.is_empty()) {
            session.model.clone_from(model);
        }
        session
    }
}

#[derive(Debug, Deserialize)]
pub struct SystemPromptRequest {
    pub topic: String,
    #[serde(flatten)]
    pub session: SessionFields,
}

#[derive(Debug, Deserialize)]
pub struct LinksRequest {
    pub system_prompt: String,
    #[serde(flatten)]
    pub session: SessionFields,
}

#[derive(Debug, Deserialize)]
pub struct InsightMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct InsightRequest {
    pub messages: Vec<InsightMessage>,
    #[serde(flatten)]
    pub session: SessionFields,
}

/// One completion for a bot, optionally relayed and reflected
async fn create_completion(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<BotBuilderRequest>,
) -> Result<Json<BotBuilderResponse>, ApiError> {
    Ok(Json(state.chat.handle(&req).await?))
}

/// Draft, parse and refine a system prompt for a topic
async fn system_prompt(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SystemPromptRequest>,
) -> Result<Json<BotBuilderResponse>, ApiError> {
    let builder = BotBuilder::new(&state.chat, &state.builder_bots, req.session.session());
    let message = builder
        .system_prompt_from_topic(&req.topic, req.session.stream_channel.as_deref())
        .await?;
    Ok(Json(BotBuilderResponse { message }))
}

/// Suggest reference links for a system prompt
async fn links(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<LinksRequest>,
) -> Result<Json<BotBuilderResponse>, ApiError> {
    let builder = BotBuilder::new(&state.chat, &state.builder_bots, req.session.session());
    let message = builder
        .links_from_system_prompt(&req.system_prompt, req.session.stream_channel.as_deref())
        .await?;
    Ok(Json(BotBuilderResponse { message }))
}

/// Summarize the latest tutoring exchange
async fn insight(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<InsightRequest>,
) -> Result<Json<BotBuilderResponse>, ApiError> {
    let messages: Vec<StoredMessage> = req
        .messages
        .into_iter()
        .map(|m| StoredMessage::new(m.message_type, m.content))
        .collect();

    let builder = BotBuilder::new(&state.chat, &state.builder_bots, req.session.session());
    let message = builder.insight_from_messages(&messages).await?;
    Ok(Json(BotBuilderResponse { message }))
}

/// Build the bot-builder router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", post(create_completion))
        .route("/system-prompt", post(system_prompt))
        .route("/links", post(links))
        .route("/insight", post(insight))
        .with_state(state)
}
