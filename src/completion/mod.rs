//! Streaming chat completions
//!
//! A provider yields a lazy stream of [`StreamPart`]s. [`CompletionStreamer`] pulls
//! them one at a time, hands each delta to an optional [`DeltaSink`] and only asks
//! for the next part once the sink has finished.

mod openai;
mod streamer;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::turn::Turn;
use crate::Result;

pub use openai::OpenAiCompatibleProvider;
pub use streamer::CompletionStreamer;

/// One incremental part of a streamed completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamPart {
    /// Text of the delta; `None` when the part carried no delta at all
    pub delta: Option<String>,
    /// Set on the terminal part
    pub finish_reason: Option<String>,
}

impl StreamPart {
    /// A content delta
    #[must_use]
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: Some(text.into()),
            finish_reason: None,
        }
    }

    /// A terminal part
    #[must_use]
    pub fn finished(reason: impl Into<String>) -> Self {
        Self {
            delta: None,
            finish_reason: Some(reason.into()),
        }
    }
}

/// Boxed stream of completion parts
pub type PartStream = Pin<Box<dyn Stream<Item = Result<StreamPart>> + Send>>;

/// Per-request completion parameters
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionOptions {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Language model backend producing streamed completions
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Start a streamed completion for `messages`
    async fn stream(&self, messages: &[Turn], options: &CompletionOptions) -> Result<PartStream>;
}

/// Consumer of completion deltas, awaited once per delta in receipt order
#[async_trait]
pub trait DeltaSink: Send {
    async fn on_delta(&mut self, delta: &str) -> Result<()>;
}
