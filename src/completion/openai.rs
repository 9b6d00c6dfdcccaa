//! OpenAI-compatible `/chat/completions` streaming provider

use std::collections::HashMap;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::{CompletionOptions, CompletionProvider, PartStream, StreamPart};
use crate::turn::Turn;
use crate::{Error, Result};

/// Streams completions from any OpenAI-compatible endpoint (Together, Fireworks, `OpenAI`)
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    models: HashMap<String, String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// Create a provider
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty
    pub fn new(base_url: &str, api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("API key required for completions".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            models: HashMap::new(),
        })
    }

    /// Map request model names to provider model ids
    #[must_use]
    pub fn with_models(mut self, models: HashMap<String, String>) -> Self {
        self.models = models;
        self
    }

    fn resolve_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.models.get(model).map_or(model, String::as_str)
    }
}

/// Convert one SSE data payload into a part; `None` for the `[DONE]` sentinel
fn parse_chunk(data: &str) -> Result<Option<StreamPart>> {
    if data.trim() == "[DONE]" {
        return Ok(None);
    }

    let payload: ChunkPayload = serde_json::from_str(data)
        .map_err(|e| Error::Stream(format!("invalid completion chunk: {e}")))?;

    // A chunk without choices or without a delta object ends consumption downstream
    let part = payload
        .choices
        .into_iter()
        .next()
        .map_or_else(StreamPart::default, |choice| StreamPart {
            delta: choice.delta.map(|d| d.content.unwrap_or_default()),
            finish_reason: choice.finish_reason,
        });

    Ok(Some(part))
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    async fn stream(&self, messages: &[Turn], options: &CompletionOptions) -> Result<PartStream> {
        let model = self.resolve_model(&options.model);
        let request = ChatRequest {
            model,
            messages,
            stream: true,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        tracing::debug!(model, messages = messages.len(), "starting completion stream");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Completion(format!("completion API error {status}: {body}")));
        }

        let stream = response
            .bytes_stream()
            .eventsource()
            .map(|event| {
                let event = event.map_err(|e| Error::Stream(e.to_string()))?;
                parse_chunk(&event.data)
            })
            .take_while(|item| futures::future::ready(!matches!(item, Ok(None))))
            .filter_map(|item| async move {
                match item {
                    Ok(Some(part)) => Some(Ok(part)),
                    Ok(None) => None,
                    Err(e) => Some(Err(e)),
                }
            });

        Ok(Box::pin(stream))
    }
}
