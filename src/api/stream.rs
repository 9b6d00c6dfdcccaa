//! Server-sent events over the local broadcast hub

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::{Stream, StreamExt};

use crate::relay::{BROADCAST_EVENT, LocalBroadcaster, StreamEvent};

/// Render a stream event as an SSE frame
fn sse_event(event: &StreamEvent) -> Event {
    Event::default()
        .event(BROADCAST_EVENT)
        .json_data(event)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// Subscribe to a channel's stream events
async fn subscribe(
    State(hub): State<LocalBroadcaster>,
    Path(channel): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!(channel = %channel, "SSE listener attached");

    // Dropping the response drops the listener, which prunes an idle channel
    let events = hub.listen(&channel).filter_map(move |item| {
        let channel = channel.clone();
        async move {
            match item {
                Ok(event) => Some(Ok(sse_event(&event))),
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "SSE listener lagged");
                    None
                }
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Build the stream router
pub fn router(hub: LocalBroadcaster) -> Router {
    Router::new()
        .route("/{channel}", get(subscribe))
        .with_state(hub)
}

