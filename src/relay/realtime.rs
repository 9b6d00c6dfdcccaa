//! Supabase Realtime broadcast over its REST endpoint

use async_trait::async_trait;
use serde::Serialize;

use super::{BROADCAST_EVENT, BroadcastChannel, Broadcaster, StreamEvent};
use crate::{Error, Result};

/// Publishes stream events through `POST {url}/realtime/v1/api/broadcast`
#[derive(Debug, Clone)]
pub struct RealtimeBroadcaster {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Serialize)]
struct BroadcastRequest<'a> {
    messages: [BroadcastMessage<'a>; 1],
}

#[derive(Serialize)]
struct BroadcastMessage<'a> {
    topic: &'a str,
    event: &'a str,
    payload: &'a StreamEvent,
}

impl RealtimeBroadcaster {
    /// Create a broadcaster for a Supabase project
    ///
    /// # Errors
    ///
    /// Returns error if URL or API key is empty
    pub fn new(url: &str, api_key: String) -> Result<Self> {
        if url.is_empty() || api_key.is_empty() {
            return Err(Error::Config(
                "Supabase URL and API key required for realtime broadcast".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/realtime/v1/api/broadcast", url.trim_end_matches('/')),
            api_key,
        })
    }
}

impl Broadcaster for RealtimeBroadcaster {
    fn channel(&self, name: &str) -> Box<dyn BroadcastChannel> {
        Box::new(RealtimeChannel {
            name: name.to_string(),
            broadcaster: self.clone(),
        })
    }
}

struct RealtimeChannel {
    name: String,
    broadcaster: RealtimeBroadcaster,
}

#[async_trait]
impl BroadcastChannel for RealtimeChannel {
    fn name(&self) -> &str {
        &self.name
    }

    // The REST API is stateless; joining is only needed for receivers
    async fn subscribe(&self) -> Result<()> {
        tracing::debug!(channel = %self.name, "realtime channel ready");
        Ok(())
    }

    async fn send(&self, event: &StreamEvent) -> Result<()> {
        let request = BroadcastRequest {
            messages: [BroadcastMessage {
                topic: &self.name,
                event: BROADCAST_EVENT,
                payload: event,
            }],
        };

        let response = self
            .broadcaster
            .client
            .post(&self.broadcaster.endpoint)
            .header("apikey", &self.broadcaster.api_key)
            .bearer_auth(&self.broadcaster.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Broadcast(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Broadcast(format!("realtime API error {status}: {body}")));
        }

        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        tracing::debug!(channel = %self.name, "realtime channel released");
        Ok(())
    }
}
