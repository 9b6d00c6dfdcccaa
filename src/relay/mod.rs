//! Broadcast relay for streamed completions
//!
//! When a request names a channel, every completion delta is republished on it:
//! a single `start` before the first token, one `token` per delta and exactly one
//! `end` once the stream is over, whether it finished, broke off or failed.
//!
//! Publishing is best-effort: a failed send is logged and never aborts the completion.

mod local;
mod realtime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::completion::{CompletionOptions, CompletionStreamer, DeltaSink};
use crate::turn::Turn;

pub use local::{Listener, LocalBroadcaster};
pub use realtime::RealtimeBroadcaster;

/// Event name every stream event is published under
pub const BROADCAST_EVENT: &str = "publication";

/// Lifecycle event of a relayed completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Start,
    Token { content: String },
    End,
}

impl StreamEvent {
    #[must_use]
    pub fn token(content: impl Into<String>) -> Self {
        Self::Token {
            content: content.into(),
        }
    }
}

/// A named pub/sub channel
#[async_trait]
pub trait BroadcastChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn subscribe(&self) -> Result<()>;

    async fn send(&self, event: &StreamEvent) -> Result<()>;

    async fn unsubscribe(&self) -> Result<()>;
}

/// Factory for broadcast channels
pub trait Broadcaster: Send + Sync {
    fn channel(&self, name: &str) -> Box<dyn BroadcastChannel>;
}

/// Delta sink that republishes deltas as stream events
pub struct RelaySink<'a> {
    channel: &'a dyn BroadcastChannel,
    started: bool,
}

impl<'a> RelaySink<'a> {
    #[must_use]
    pub fn new(channel: &'a dyn BroadcastChannel) -> Self {
        Self {
            channel,
            started: false,
        }
    }

    /// Whether a `start` event has been published
    #[must_use]
    pub const fn started(&self) -> bool {
        self.started
    }

    async fn publish(&self, event: &StreamEvent) {
        if let Err(e) = self.channel.send(event).await {
            tracing::warn!(channel = %self.channel.name(), error = %e, "failed to publish stream event");
        }
    }
}

#[async_trait]
impl DeltaSink for RelaySink<'_> {
    async fn on_delta(&mut self, delta: &str) -> Result<()> {
        if !self.started {
            self.started = true;
            self.publish(&StreamEvent::Start).await;
        }
        self.publish(&StreamEvent::token(delta)).await;
        Ok(())
    }
}

/// Prepare the prompt with `prepare`, then stream a completion for it, relaying on
/// `channel_name` when one is given
///
/// The channel is subscribed before `prepare` runs. `end` is published and the channel
/// unsubscribed on every exit path, including a failed `prepare`, before any error is
/// returned.
///
/// # Errors
///
/// Returns the error of `prepare` or of the completion stream
pub async fn relay_completion<F>(
    streamer: &CompletionStreamer<'_>,
    broadcaster: &dyn Broadcaster,
    channel_name: Option<&str>,
    prepare: F,
    options: &CompletionOptions,
) -> Result<String>
where
    F: Future<Output = Result<Vec<Turn>>> + Send,
{
    let Some(name) = channel_name.filter(|n| !n.is_empty()) else {
        let messages = prepare.await?;
        return streamer.run(&messages, options, None).await;
    };

    let channel = broadcaster.channel(name);
    if let Err(e) = channel.subscribe().await {
        tracing::warn!(channel = %name, error = %e, "failed to subscribe to broadcast channel");
    }

    let mut sink = RelaySink::new(channel.as_ref());
    let result = async {
        let messages = prepare.await?;
        streamer.run(&messages, options, Some(&mut sink)).await
    }
    .await;

    sink.publish(&StreamEvent::End).await;
    if let Err(e) = channel.unsubscribe().await {
        tracing::warn!(channel = %name, error = %e, "failed to unsubscribe from broadcast channel");
    }

    match &result {
        Ok(text) => tracing::debug!(channel = %name, chars = text.len(), "completion relayed"),
        Err(e) => tracing::warn!(channel = %name, error = %e, "relayed completion failed"),
    }

    result
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::Error;
    use crate::completion::{CompletionProvider, PartStream, StreamPart};

    #[derive(Default, Clone)]
    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
        fail_sends: bool,
    }

    struct RecordingChannel {
        name: String,
        recorder: Recorder,
    }

    #[async_trait]
    impl BroadcastChannel for RecordingChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn subscribe(&self) -> Result<()> {
            self.recorder.events.lock().unwrap().push("subscribe".to_string());
            Ok(())
        }

        async fn send(&self, event: &StreamEvent) -> Result<()> {
            let label = match event {
                StreamEvent::Start => "start".to_string(),
                StreamEvent::Token { content } => format!("token:{content}"),
                StreamEvent::End => "end".to_string(),
            };
            self.recorder.events.lock().unwrap().push(label);
            if self.recorder.fail_sends {
                return Err(Error::Broadcast("offline".to_string()));
            }
            Ok(())
        }

        async fn unsubscribe(&self) -> Result<()> {
            self.recorder.events.lock().unwrap().push("unsubscribe".to_string());
            Ok(())
        }
    }

    impl Broadcaster for Recorder {
        fn channel(&self, name: &str) -> Box<dyn BroadcastChannel> {
            Box::new(RecordingChannel {
                name: name.to_string(),
                recorder: self.clone(),
            })
        }
    }

    struct Parts(Vec<Result<StreamPart>>);

    #[async_trait]
    impl CompletionProvider for Parts {
        async fn stream(&self, _: &[Turn], _: &CompletionOptions) -> Result<PartStream> {
            let parts: Vec<Result<StreamPart>> = self
                .0
                .iter()
                .map(|p| match p {
                    Ok(part) => Ok(part.clone()),
                    Err(e) => Err(Error::Stream(e.to_string())),
                })
                .collect();
            Ok(Box::pin(futures::stream::iter(parts)))
        }
    }

    fn no_prompt() -> futures::future::Ready<Result<Vec<Turn>>> {
        futures::future::ready(Ok(Vec::new()))
    }

    fn events(recorder: &Recorder) -> Vec<String> {
        recorder.events.lock().unwrap().clone()
    }

    #[test]
    fn events_serialize_with_type_tag() {
        assert_eq!(
            serde_json::to_string(&StreamEvent::Start).unwrap(),
            r#"{"type":"start"}"#
        );
        assert_eq!(
            serde_json::to_string(&StreamEvent::token("hi")).unwrap(),
            r#"{"type":"token","content":"hi"}"#
        );
        assert_eq!(serde_json::to_string(&StreamEvent::End).unwrap(), r#"{"type":"end"}"#);
    }

    #[tokio::test]
    async fn relays_in_order() {
        let provider = Parts(vec![
            Ok(StreamPart::delta("Hel")),
            Ok(StreamPart::delta("lo")),
            Ok(StreamPart::finished("stop")),
        ]);
        let recorder = Recorder::default();
        let streamer = CompletionStreamer::new(&provider);

        let text = relay_completion(&streamer, &recorder, Some("room"), no_prompt(), &CompletionOptions::new("m"))
            .await
            .unwrap();

        assert_eq!(text, "Hello");
        assert_eq!(
            events(&recorder),
            vec!["subscribe", "start", "token:Hel", "token:lo", "end", "unsubscribe"]
        );
    }

    #[tokio::test]
    async fn end_sent_once_when_stream_fails() {
        let provider = Parts(vec![
            Ok(StreamPart::delta("partial")),
            Err(Error::Stream("reset".to_string())),
        ]);
        let recorder = Recorder::default();
        let streamer = CompletionStreamer::new(&provider);

        let result =
            relay_completion(&streamer, &recorder, Some("room"), no_prompt(), &CompletionOptions::new("m")).await;

        assert!(matches!(result, Err(Error::Stream(_))));
        let events = events(&recorder);
        assert_eq!(events.iter().filter(|e| *e == "start").count(), 1);
        assert_eq!(events.iter().filter(|e| *e == "end").count(), 1);
        assert_eq!(events.last().map(String::as_str), Some("unsubscribe"));
    }

    #[tokio::test]
    async fn empty_stream_sends_end_without_start() {
        let provider = Parts(vec![Ok(StreamPart::finished("stop"))]);
        let recorder = Recorder::default();
        let streamer = CompletionStreamer::new(&provider);

        relay_completion(&streamer, &recorder, Some("room"), no_prompt(), &CompletionOptions::new("m"))
            .await
            .unwrap();

        assert_eq!(events(&recorder), vec!["subscribe", "end", "unsubscribe"]);
    }

    #[tokio::test]
    async fn end_sent_when_prompt_preparation_fails() {
        let provider = Parts(vec![Ok(StreamPart::delta("never"))]);
        let recorder = Recorder::default();
        let streamer = CompletionStreamer::new(&provider);

        let result = relay_completion(
            &streamer,
            &recorder,
            Some("room"),
            futures::future::ready(Err(Error::NotFound("conversation c9".to_string()))),
            &CompletionOptions::new("m"),
        )
        .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(events(&recorder), vec!["subscribe", "end", "unsubscribe"]);
    }

    #[tokio::test]
    async fn failed_sends_do_not_abort() {
        let provider = Parts(vec![Ok(StreamPart::delta("a")), Ok(StreamPart::delta("b"))]);
        let recorder = Recorder {
            fail_sends: true,
            ..Recorder::default()
        };
        let streamer = CompletionStreamer::new(&provider);

        let text = relay_completion(&streamer, &recorder, Some("room"), no_prompt(), &CompletionOptions::new("m"))
            .await
            .unwrap();
        assert_eq!(text, "ab");
    }

    #[tokio::test]
    async fn no_channel_means_no_events() {
        let provider = Parts(vec![Ok(StreamPart::delta("a"))]);
        let recorder = Recorder::default();
        let streamer = CompletionStreamer::new(&provider);

        let text = relay_completion(&streamer, &recorder, None, no_prompt(), &CompletionOptions::new("m"))
            .await
            .unwrap();

        assert_eq!(text, "a");
        assert!(events(&recorder).is_empty());
    }
}
