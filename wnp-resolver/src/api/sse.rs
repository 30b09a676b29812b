//! GET /events: SSE stream of every bus event
//!
//! New clients first receive a `NowPlaying` event per source with a current
//! record, then live events.

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use chrono::Utc;
use futures::stream::Stream;
use std::convert::Infallible;
use wnp_common::events::WnpEvent;

pub async fn event_stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let initial = state
        .coordinator
        .current_records()
        .await
        .iter()
        .map(|record| WnpEvent::NowPlaying {
            record: record.to_now_playing(),
            timestamp: Utc::now(),
        })
        .collect();

    wnp_common::sse::create_event_sse_stream(&state.event_bus, initial)
}
