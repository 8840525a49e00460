//! `GET /logs/stream`: server-sent events from the active tunnel.
//!
//! The first event is an `info` describing the current tunnel state. After that
//! every hub event is forwarded with its kind as the SSE event name and
//! `{timestamp, message}` as data. There is no replay. The stream ends when
//! the server shuts down.

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use xs_core::LogEvent;

use crate::server::ApiState;

fn to_sse(event: &LogEvent) -> Event {
    let sse = Event::default().event(event.kind.as_str());
    match sse.clone().json_data(event) {
        Ok(with_data) => with_data,
        Err(_) => sse.data(event.message.clone()),
    }
}

pub async fn log_stream(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let supervisor = state.orchestrator.supervisor();
    // Subscribe before reading the status so nothing falls in between.
    let rx = supervisor.log_hub().subscribe();
    let greeting = LogEvent::info(supervisor.status().describe());
    tracing::debug!(observers = supervisor.log_hub().subscriber_count(), "log stream opened");

    let live = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(event) => Some((event, rx)),
            Err(RecvError::Lagged(skipped)) => Some((LogEvent::skipped(skipped), rx)),
            Err(RecvError::Closed) => None,
        }
    });
    let shutdown = state.shutdown.clone();
    let events = stream::once(async move { greeting })
        .chain(live)
        .take_until(async move { shutdown.cancelled().await })
        .map(|event| Ok(to_sse(&event)));

    Sse::new(events).keep_alive(KeepAlive::default())
}
