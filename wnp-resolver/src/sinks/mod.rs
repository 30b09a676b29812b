//! Sink dispatcher
//!
//! Each publish spawns one task per sink. Every `accept` call is bounded by
//! the sink's timeout; a sink that errors or times out is skipped for that
//! record and reported as a `SinkFailed` event. Nothing is propagated to the
//! caller beyond the per-sink outcome list.
//!
//! Delivery of a record stops as soon as its cancellation token fires: a
//! record superseded mid-flight never reaches sinks that have not finished
//! accepting it.

pub mod history;
pub mod overlay;
pub mod text_file;
pub mod webhook;

pub use history::HistorySink;
pub use overlay::OverlaySink;
pub use text_file::TextFileSink;
pub use webhook::WebhookSink;

use crate::config::{SinkConfig, SinkKind};
use crate::error::SinkError;
use crate::types::ResolvedRecord;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wnp_common::events::{EventBus, WnpEvent};

/// Downstream consumer of resolved records
#[async_trait]
pub trait Sink: Send + Sync {
    async fn accept(&self, record: &ResolvedRecord) -> Result<(), SinkError>;
}

/// Result of handing one record to one sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    Delivered,
    Failed(String),
    TimedOut,
    /// A newer record replaced this one before delivery finished
    Superseded,
}

struct RegisteredSink {
    name: String,
    sink: Arc<dyn Sink>,
    timeout: Duration,
}

/// Fans records out to every registered sink
pub struct SinkDispatcher {
    sinks: Vec<RegisteredSink>,
    event_bus: EventBus,
}

impl SinkDispatcher {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            sinks: Vec::new(),
            event_bus,
        }
    }

    pub fn register(&mut self, name: impl Into<String>, sink: Arc<dyn Sink>, timeout: Duration) {
        let name = name.into();
        debug!(sink = %name, timeout_ms = timeout.as_millis() as u64, "Registered sink");
        self.sinks.push(RegisteredSink { name, sink, timeout });
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Build every configured sink
    pub async fn from_config(configs: &[SinkConfig], event_bus: EventBus) -> Result<Self, SinkError> {
        let mut dispatcher = Self::new(event_bus.clone());
        for config in configs {
            let sink: Arc<dyn Sink> = match &config.kind {
                SinkKind::TextFile { path, template } => Arc::new(TextFileSink::new(path.clone(), template)?),
                SinkKind::Overlay => Arc::new(OverlaySink::new(event_bus.clone())),
                SinkKind::Webhook { url } => Arc::new(WebhookSink::new(url.clone(), config.timeout())?),
                SinkKind::History { path } => Arc::new(HistorySink::open(path).await?),
            };
            dispatcher.register(config.display_name(), sink, config.timeout());
        }
        info!(sinks = dispatcher.len(), "Sink dispatcher ready");
        Ok(dispatcher)
    }

    /// Deliver `record` to every sink concurrently until `cancel` fires
    pub async fn publish(&self, record: Arc<ResolvedRecord>, cancel: &CancellationToken) -> Vec<(String, SinkOutcome)> {
        let handles: Vec<_> = self
            .sinks
            .iter()
            .map(|registered| {
                let sink = Arc::clone(&registered.sink);
                let record = Arc::clone(&record);
                let timeout = registered.timeout;
                let cancel = cancel.clone();
                let handle = tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => SinkOutcome::Superseded,
                        result = tokio::time::timeout(timeout, sink.accept(&record)) => match result {
                            Ok(Ok(())) => SinkOutcome::Delivered,
                            Ok(Err(e)) => SinkOutcome::Failed(e.to_string()),
                            Err(_) => SinkOutcome::TimedOut,
                        },
                    }
                });
                (registered.name.clone(), handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let outcome = handle
                .await
                .unwrap_or_else(|e| SinkOutcome::Failed(format!("sink task failed: {}", e)));
            self.report(&name, &record.source_id, &outcome);
            outcomes.push((name, outcome));
        }
        outcomes
    }

    fn report(&self, name: &str, source_id: &str, outcome: &SinkOutcome) {
        let reason = match outcome {
            SinkOutcome::Delivered => {
                debug!(sink = name, source_id, "Record delivered");
                return;
            }
            SinkOutcome::Superseded => {
                debug!(sink = name, source_id, "Delivery abandoned for a newer record");
                return;
            }
            SinkOutcome::Failed(reason) => reason.clone(),
            SinkOutcome::TimedOut => "timed out".to_string(),
        };
        warn!(sink = name, source_id, "Sink delivery failed: {}", reason);
        self.event_bus.emit_lossy(WnpEvent::SinkFailed {
            sink: name.to_string(),
            source_id: source_id.to_string(),
            reason,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Provenance;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        delivered: AtomicUsize,
    }

    #[async_trait]
    impl Sink for CountingSink {
        async fn accept(&self, _record: &ResolvedRecord) -> Result<(), SinkError> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl Sink for FailingSink {
        async fn accept(&self, _record: &ResolvedRecord) -> Result<(), SinkError> {
            Err(SinkError::Http("connection refused".to_string()))
        }
    }

    struct StuckSink;

    #[async_trait]
    impl Sink for StuckSink {
        async fn accept(&self, _record: &ResolvedRecord) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn record() -> Arc<ResolvedRecord> {
        Arc::new(ResolvedRecord {
            source_id: "deck".to_string(),
            artist: "Daft Punk".to_string(),
            title: "One More Time".to_string(),
            album: Some("Discovery".to_string()),
            release_year: Some(2000),
            cover_art_ref: None,
            source_confidence: 0.9,
            provenance: Provenance::Registry("musicbrainz".to_string()),
            resolved_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let counting = Arc::new(CountingSink {
            delivered: AtomicUsize::new(0),
        });

        let mut dispatcher = SinkDispatcher::new(bus);
        dispatcher.register("failing", Arc::new(FailingSink), Duration::from_secs(1));
        dispatcher.register("stuck", Arc::new(StuckSink), Duration::from_millis(50));
        dispatcher.register("counting", counting.clone(), Duration::from_secs(1));

        let outcomes = dispatcher.publish(record(), &CancellationToken::new()).await;

        assert_eq!(counting.delivered.load(Ordering::SeqCst), 1);
        assert!(matches!(outcomes[0].1, SinkOutcome::Failed(_)));
        assert_eq!(outcomes[1].1, SinkOutcome::TimedOut);
        assert_eq!(outcomes[2].1, SinkOutcome::Delivered);

        let mut failed = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let WnpEvent::SinkFailed { sink, .. } = event {
                failed.push(sink);
            }
        }
        assert_eq!(failed, vec!["failing".to_string(), "stuck".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_dispatcher() {
        let dispatcher = SinkDispatcher::new(EventBus::new(4));
        assert!(dispatcher.is_empty());
        assert!(dispatcher.publish(record(), &CancellationToken::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_delivery_is_abandoned() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let mut dispatcher = SinkDispatcher::new(bus);
        dispatcher.register("stuck", Arc::new(StuckSink), Duration::from_secs(30));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcomes = dispatcher.publish(record(), &cancel).await;

        assert_eq!(outcomes[0].1, SinkOutcome::Superseded);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(rx.try_recv().is_err());
    }
}
