//! Sequential consumption of a provider stream

use std::time::Duration;

use futures::StreamExt;

use super::{CompletionOptions, CompletionProvider, DeltaSink};
use crate::turn::Turn;
use crate::{Error, Result};

/// Drives a provider stream to completion
pub struct CompletionStreamer<'a> {
    provider: &'a dyn CompletionProvider,
    idle_timeout: Option<Duration>,
}

impl<'a> CompletionStreamer<'a> {
    #[must_use]
    pub fn new(provider: &'a dyn CompletionProvider) -> Self {
        Self {
            provider,
            idle_timeout: None,
        }
    }

    /// Fail the stream if no part arrives within `timeout`
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Stream a completion and return the full text
    ///
    /// Stops at the first part with a finish reason or without a delta; that part's
    /// content is not emitted. The sink is awaited before the next part is pulled.
    ///
    /// # Errors
    ///
    /// Returns error if the provider fails, the stream stalls past the idle timeout,
    /// or the sink fails
    pub async fn run(
        &self,
        messages: &[Turn],
        options: &CompletionOptions,
        mut sink: Option<&mut dyn DeltaSink>,
    ) -> Result<String> {
        let mut stream = self.provider.stream(messages, options).await?;
        let mut response = String::new();
        let mut parts = 0_usize;

        loop {
            let next = match self.idle_timeout {
                Some(timeout) => tokio::time::timeout(timeout, stream.next())
                    .await
                    .map_err(|_| {
                        Error::Stream(format!("no completion data for {}s", timeout.as_secs()))
                    })?,
                None => stream.next().await,
            };

            let Some(part) = next else {
                break;
            };
            let part = part?;

            if part.finish_reason.is_some() {
                tracing::trace!(reason = ?part.finish_reason, "completion finished");
                break;
            }
            let Some(delta) = part.delta else {
                break;
            };

            parts += 1;
            response.push_str(&delta);
            if let Some(sink) = sink.as_deref_mut() {
                sink.on_delta(&delta).await?;
            }
        }

        tracing::debug!(model = %options.model, parts, chars = response.len(), "completion streamed");
        Ok(response)
    }
}
