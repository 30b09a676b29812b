//! Overlay sink: publishes `NowPlaying` on the event bus for the HTTP server

use super::Sink;
use crate::error::SinkError;
use crate::types::ResolvedRecord;
use async_trait::async_trait;
use chrono::Utc;
use wnp_common::events::{EventBus, WnpEvent};

pub struct OverlaySink {
    event_bus: EventBus,
}

impl OverlaySink {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

#[async_trait]
impl Sink for OverlaySink {
    async fn accept(&self, record: &ResolvedRecord) -> Result<(), SinkError> {
        // No subscribers is not a failure; the overlay may simply be closed
        self.event_bus.emit_lossy(WnpEvent::NowPlaying {
            record: record.to_now_playing(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
