//! Event types for the WNP event system
//!
//! Provides the `WnpEvent` enum and the broadcast `EventBus` shared by the
//! resolver pipeline, the overlay server and SSE clients.

mod shared_types;

pub use shared_types::{NowPlayingInfo, ResolutionStage};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// WNP event types
///
/// Events are broadcast via `EventBus` and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WnpEvent {
    /// Source watcher observed a track change
    TrackDetected {
        source_id: String,
        /// Track file path or stream reference
        track_ref: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Resolution of the latest track for a source moved to a new stage
    ResolutionStateChanged {
        source_id: String,
        /// Generation of the track event being resolved
        generation: u64,
        stage: ResolutionStage,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A resolved record was published for a source
    ///
    /// Triggers:
    /// - Overlay server: update `/now-playing`
    /// - SSE: push to connected overlays
    NowPlaying {
        record: NowPlayingInfo,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A watched path disappeared or reappeared
    SourceStatusChanged {
        source_id: String,
        path: String,
        available: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A sink failed or timed out for a published record
    SinkFailed {
        sink: String,
        source_id: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl WnpEvent {
    /// Get event type as string for filtering and SSE event names
    pub fn event_type(&self) -> &str {
        match self {
            WnpEvent::TrackDetected { .. } => "TrackDetected",
            WnpEvent::ResolutionStateChanged { .. } => "ResolutionStateChanged",
            WnpEvent::NowPlaying { .. } => "NowPlaying",
            WnpEvent::SourceStatusChanged { .. } => "SourceStatusChanged",
            WnpEvent::SinkFailed { .. } => "SinkFailed",
        }
    }

    /// Source the event relates to, if any
    pub fn source_id(&self) -> Option<&str> {
        match self {
            WnpEvent::TrackDetected { source_id, .. }
            | WnpEvent::ResolutionStateChanged { source_id, .. }
            | WnpEvent::SourceStatusChanged { source_id, .. }
            | WnpEvent::SinkFailed { source_id, .. } => Some(source_id),
            WnpEvent::NowPlaying { record, .. } => Some(&record.source_id),
        }
    }
}

/// Central event distribution bus
///
/// Cloning an `EventBus` yields another handle onto the same channel.
/// Slow subscribers lag and lose the oldest events rather than blocking emitters.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WnpEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use wnp_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<WnpEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: WnpEvent) -> Result<usize, broadcast::error::SendError<WnpEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: WnpEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
