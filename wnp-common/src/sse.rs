//! Server-Sent Events (SSE) utilities
//!
//! Turns the event bus into an SSE stream for overlay clients.

use crate::events::{EventBus, WnpEvent};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Heartbeat interval for SSE keep-alive comments
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Convert a bus event into an SSE event named after its variant
pub fn to_sse_event(event: &WnpEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.event_type()).data(json)),
        Err(e) => {
            warn!("SSE: Failed to serialize {}: {}", event.event_type(), e);
            None
        }
    }
}

/// Create an SSE stream forwarding every bus event
///
/// Optionally prefixed with `initial` events (e.g. the current now-playing
/// records) so a freshly connected overlay renders immediately. A lagging
/// client skips the missed events and keeps streaming.
///
/// # Example
/// ```rust,ignore
/// pub async fn event_stream(
///     State(state): State<AppState>,
/// ) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
///     wnp_common::sse::create_event_sse_stream(&state.event_bus, Vec::new())
/// }
/// ```
pub fn create_event_sse_stream(
    event_bus: &EventBus,
    initial: Vec<WnpEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = event_bus.subscribe();
    info!("New SSE client connected ({} subscribers)", event_bus.subscriber_count());

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        for event in initial {
            if let Some(sse) = to_sse_event(&event) {
                yield Ok(sse);
            }
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(sse) = to_sse_event(&event) {
                        yield Ok(sse);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("SSE: Client lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => {
                    info!("SSE: Event bus closed, ending stream");
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
