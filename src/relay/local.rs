//! In-process broadcast hub

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::{BroadcastChannel, Broadcaster, StreamEvent};
use crate::Result;

/// Events buffered per channel before slow listeners start lagging
const CHANNEL_CAPACITY: usize = 256;

/// One named channel and the number of relays holding it open
#[derive(Debug)]
struct Slot {
    tx: broadcast::Sender<StreamEvent>,
    relays: usize,
}

impl Slot {
    fn new() -> Self {
        Self {
            tx: broadcast::channel(CHANNEL_CAPACITY).0,
            relays: 0,
        }
    }

    fn is_idle(&self) -> bool {
        self.relays == 0 && self.tx.receiver_count() == 0
    }
}

type Channels = Arc<RwLock<HashMap<String, Slot>>>;

/// Remove `name` once neither a relay nor a listener holds it
fn prune(channels: &Channels, name: &str) {
    let mut map = channels.write().unwrap_or_else(PoisonError::into_inner);
    if map.get(name).is_some_and(Slot::is_idle) {
        map.remove(name);
        tracing::trace!(channel = %name, "local channel pruned");
    }
}

/// Broadcaster backed by tokio broadcast channels, one per channel name
///
/// Listeners attach with [`LocalBroadcaster::listen`]; the HTTP API exposes them as SSE.
/// A channel lives while a relay or a listener holds it.
#[derive(Debug, Clone, Default)]
pub struct LocalBroadcaster {
    channels: Channels,
}

impl LocalBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event published on `name` from now on
    #[must_use]
    pub fn listen(&self, name: &str) -> Listener {
        let rx = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(Slot::new)
            .tx
            .subscribe();

        Listener {
            stream: Some(BroadcastStream::new(rx)),
            name: name.to_string(),
            channels: Arc::clone(&self.channels),
        }
    }

    /// Number of open channels
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Broadcaster for LocalBroadcaster {
    fn channel(&self, name: &str) -> Box<dyn BroadcastChannel> {
        let tx = {
            let mut map = self.channels.write().unwrap_or_else(PoisonError::into_inner);
            let slot = map.entry(name.to_string()).or_insert_with(Slot::new);
            slot.relays += 1;
            slot.tx.clone()
        };

        Box::new(LocalChannel {
            name: name.to_string(),
            tx,
            channels: Arc::clone(&self.channels),
        })
    }
}

/// Stream of events on one channel; the channel is pruned when the last holder drops
pub struct Listener {
    stream: Option<BroadcastStream<StreamEvent>>,
    name: String,
    channels: Channels,
}

impl Stream for Listener {
    type Item = std::result::Result<StreamEvent, BroadcastStreamRecvError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => stream.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        // Release the receiver first so it no longer counts
        self.stream.take();
        prune(&self.channels, &self.name);
    }
}

struct LocalChannel {
    name: String,
    tx: broadcast::Sender<StreamEvent>,
    channels: Channels,
}

#[async_trait]
impl BroadcastChannel for LocalChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self) -> Result<()> {
        tracing::debug!(channel = %self.name, listeners = self.tx.receiver_count(), "local channel opened");
        Ok(())
    }

    async fn send(&self, event: &StreamEvent) -> Result<()> {
        // No listeners is not an error
        if self.tx.send(event.clone()).is_err() {
            tracing::trace!(channel = %self.name, "no listeners for stream event");
        }
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        tracing::debug!(channel = %self.name, "local channel closed");
        Ok(())
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        {
            let mut map = self.channels.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = map.get_mut(&self.name) {
                slot.relays = slot.relays.saturating_sub(1);
            }
        }
        prune(&self.channels, &self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listener_receives_events() {
        let hub = LocalBroadcaster::new();
        let mut events = hub.listen("room");

        let channel = hub.channel("room");
        channel.subscribe().await.unwrap();
        channel.send(&StreamEvent::Start).await.unwrap();
        channel.send(&StreamEvent::token("hi")).await.unwrap();
        channel.send(&StreamEvent::End).await.unwrap();

        assert_eq!(events.next().await.unwrap().unwrap(), StreamEvent::Start);
        assert_eq!(events.next().await.unwrap().unwrap(), StreamEvent::token("hi"));
        assert_eq!(events.next().await.unwrap().unwrap(), StreamEvent::End);
    }

    #[tokio::test]
    async fn send_without_listeners_is_ok() {
        let hub = LocalBroadcaster::new();
        let channel = hub.channel("empty");
        assert!(channel.send(&StreamEvent::Start).await.is_ok());
    }

    #[test]
    fn dropped_relay_prunes_unlistened_channel() {
        let hub = LocalBroadcaster::new();
        let channel = hub.channel("gone");
        assert_eq!(hub.channel_count(), 1);

        drop(channel);
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn dropped_listeners_prune_their_channels() {
        let hub = LocalBroadcaster::new();
        for i in 0..1000 {
            let _events = hub.listen(&format!("room-{i}"));
        }
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn channel_lives_while_any_holder_remains() {
        let hub = LocalBroadcaster::new();
        let events = hub.listen("kept");
        let channel = hub.channel("kept");

        drop(events);
        assert_eq!(hub.channel_count(), 1);

        let late = hub.listen("kept");
        drop(channel);
        assert_eq!(hub.channel_count(), 1);

        drop(late);
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn late_listener_shares_the_relay_channel() {
        let hub = LocalBroadcaster::new();
        let channel = hub.channel("room");
        let mut events = hub.listen("room");

        channel.send(&StreamEvent::token("late")).await.unwrap();
        assert_eq!(events.next().await.unwrap().unwrap(), StreamEvent::token("late"));
    }
}
