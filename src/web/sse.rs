//! `GET /admin/events` — a single coarse-grained SSE feed of job, sweep,
//! deal, and worker events (SPEC_FULL "admin SSE stream"). Backed by
//! `EventBuffer`'s cursor-addressed ring buffer rather than a broadcast
//! channel, so a reconnecting client never misses an event that was still in
//! the buffer when it dropped.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use futures::stream::{self, Stream};

use crate::app_state::AppState;

pub async fn stream_events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (cursor, head_rx) = state.events.subscribe();
    let stream = stream::unfold((state, cursor, head_rx), |(state, mut cursor, mut head_rx)| async move {
        loop {
            if let Some(event) = state.events.read(cursor) {
                cursor += 1;
                let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
                return Some((Ok(Event::default().data(payload)), (state, cursor, head_rx)));
            }
            if head_rx.changed().await.is_err() {
                return None;
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
}
