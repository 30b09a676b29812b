//! Resolution coordinator
//!
//! Drives one resolution task per `TrackEvent` through
//! `Extracting → (Fingerprinting) → Normalizing → LookingUp` and settles it as
//! `Resolved`, `Fallback` or `Cancelled`.
//!
//! # Supersession
//! Each source has a generation counter and a cancellation token. Submitting
//! an event bumps the generation and cancels the previous token, so the older
//! task stops at its next suspension point. The current record is replaced
//! under a per-source lock and only if the task's generation is still the
//! latest, so a stale result that slips past cancellation is discarded. Sink
//! delivery runs outside the lock and is abandoned once a newer event
//! arrives.
//!
//! # Deadline
//! Every event has a wall-clock budget. When it expires the task falls back
//! to whatever metadata it has gathered so far.

use crate::config::PipelineConfig;
use crate::error::ResolveError;
use crate::extractors::TagExtractor;
use crate::fingerprint::TrackIdentifier;
use crate::normalizer::normalize;
use crate::registry::{Candidate, LookupQuery, RegistryLookup};
use crate::sinks::SinkDispatcher;
use crate::types::{Provenance, RawMetadata, ResolvedRecord, TrackEvent, FILE_STEM_CONFIDENCE};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wnp_common::events::{EventBus, ResolutionStage, WnpEvent};

/// Components the coordinator orchestrates
pub struct PipelineComponents {
    pub extractor: Arc<dyn TagExtractor>,
    /// `None` when fingerprinting is disabled
    pub identifier: Option<Arc<dyn TrackIdentifier>>,
    pub lookup: Arc<RegistryLookup>,
    pub dispatcher: Arc<SinkDispatcher>,
}

struct SourceSlot {
    generation: AtomicU64,
    cancel: Mutex<CancellationToken>,
    publish_lock: tokio::sync::Mutex<()>,
}

impl SourceSlot {
    fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            cancel: Mutex::new(CancellationToken::new()),
            publish_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Start a new generation, cancelling the previous one
    fn advance(&self) -> (u64, CancellationToken) {
        let token = CancellationToken::new();
        let previous = {
            let mut guard = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *guard, token.clone())
        };
        previous.cancel();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        (generation, token)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

/// Metadata gathered so far by one resolution task
#[derive(Debug, Default)]
struct Partial {
    raw: RawMetadata,
}

enum Settled {
    Finished(Result<Candidate, ResolveError>),
    DeadlineExpired,
    Cancelled,
}

struct Inner {
    components: PipelineComponents,
    event_bus: EventBus,
    config: PipelineConfig,
    slots: Mutex<HashMap<String, Arc<SourceSlot>>>,
    current: RwLock<HashMap<String, Arc<ResolvedRecord>>>,
}

/// Per-source resolution coordinator
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(components: PipelineComponents, event_bus: EventBus, config: PipelineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                components,
                event_bus,
                config,
                slots: Mutex::new(HashMap::new()),
                current: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Start resolving `event`, superseding any in-flight resolution for the
    /// same source. The handle yields the published record, if any.
    pub fn submit(&self, event: TrackEvent) -> JoinHandle<Option<Arc<ResolvedRecord>>> {
        let slot = self.inner.slot(&event.source_id);
        let (generation, token) = slot.advance();

        info!(
            source_id = %event.source_id,
            generation,
            track = %event.track_ref.display(),
            "Track detected"
        );
        self.inner.event_bus.emit_lossy(WnpEvent::TrackDetected {
            source_id: event.source_id.clone(),
            track_ref: event.track_ref.display().to_string(),
            timestamp: Utc::now(),
        });

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run(event, slot, generation, token).await })
    }

    /// Current record of one source
    pub async fn current(&self, source_id: &str) -> Option<Arc<ResolvedRecord>> {
        self.inner.current.read().await.get(source_id).cloned()
    }

    /// Current record of every source, ordered by source id
    pub async fn current_records(&self) -> Vec<Arc<ResolvedRecord>> {
        let current = self.inner.current.read().await;
        let mut records: Vec<_> = current.values().cloned().collect();
        records.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        records
    }
}

impl Inner {
    fn slot(&self, source_id: &str) -> Arc<SourceSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            slots
                .entry(source_id.to_string())
                .or_insert_with(|| Arc::new(SourceSlot::new())),
        )
    }

    fn stage(&self, source_id: &str, generation: u64, stage: ResolutionStage) {
        debug!(source_id, generation, stage = %stage, "Resolution stage");
        self.event_bus.emit_lossy(WnpEvent::ResolutionStateChanged {
            source_id: source_id.to_string(),
            generation,
            stage,
            timestamp: Utc::now(),
        });
    }

    async fn run(
        &self,
        event: TrackEvent,
        slot: Arc<SourceSlot>,
        generation: u64,
        token: CancellationToken,
    ) -> Option<Arc<ResolvedRecord>> {
        let deadline = Instant::now() + self.config.deadline();
        let mut partial = Partial::default();

        let settled = {
            let work = self.resolve(&event, generation, &mut partial);
            tokio::select! {
                biased;
                _ = token.cancelled() => Settled::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Settled::DeadlineExpired,
                result = work => Settled::Finished(result),
            }
        };

        let (record, stage) = match settled {
            Settled::Cancelled => {
                debug!(source_id = %event.source_id, generation, "Superseded by newer track event");
                self.stage(&event.source_id, generation, ResolutionStage::Cancelled);
                return None;
            }
            Settled::Finished(Ok(candidate)) => (self.registry_record(&event, candidate), ResolutionStage::Resolved),
            Settled::Finished(Err(e)) => {
                info!(source_id = %event.source_id, generation, "Falling back: {}", e);
                (self.fallback_record(&event, &partial.raw), ResolutionStage::Fallback)
            }
            Settled::DeadlineExpired => {
                warn!(
                    source_id = %event.source_id,
                    generation,
                    deadline_ms = self.config.deadline_ms,
                    "Resolution deadline expired, falling back to partial metadata"
                );
                (self.fallback_record(&event, &partial.raw), ResolutionStage::Fallback)
            }
        };

        let Some(record) = record else {
            warn!(
                source_id = %event.source_id,
                track = %event.track_ref.display(),
                "No metadata obtainable, nothing published"
            );
            self.stage(&event.source_id, generation, ResolutionStage::Fallback);
            return None;
        };

        self.publish(slot, generation, &token, stage, Arc::new(record)).await
    }

    async fn resolve(
        &self,
        event: &TrackEvent,
        generation: u64,
        partial: &mut Partial,
    ) -> Result<Candidate, ResolveError> {
        let source_id = event.source_id.as_str();

        self.stage(source_id, generation, ResolutionStage::Extracting);
        match self.components.extractor.extract(&event.track_ref).await {
            Ok(raw) => partial.raw = raw,
            Err(e) => warn!(source_id, track = %event.track_ref.display(), "Tag extraction failed: {}", e),
        }

        if !partial.raw.has_identity() {
            if let Some(identifier) = &self.components.identifier {
                self.stage(source_id, generation, ResolutionStage::Fingerprinting);
                match identifier.identify_track(&event.track_ref).await {
                    Ok(Some(mut identified)) => {
                        // Identification wins over partial tags
                        identified.fill_from(&partial.raw);
                        partial.raw = identified;
                    }
                    Ok(None) => debug!(source_id, "Fingerprint not identified"),
                    Err(e) => warn!(source_id, "Fingerprinting failed: {}", e),
                }
            }
        }

        self.stage(source_id, generation, ResolutionStage::Normalizing);
        let key = normalize(&partial.raw).ok_or(ResolveError::InsufficientMetadata)?;

        self.stage(source_id, generation, ResolutionStage::LookingUp);
        let query = LookupQuery {
            key,
            artist: partial.raw.artist.clone().unwrap_or_default(),
            title: partial.raw.title.clone().unwrap_or_default(),
        };
        self.components.lookup.lookup(&query).await
    }

    fn registry_record(&self, event: &TrackEvent, candidate: Candidate) -> Option<ResolvedRecord> {
        let matched = candidate.matched;
        Some(ResolvedRecord {
            source_id: event.source_id.clone(),
            artist: matched.artist,
            title: matched.title,
            album: matched.album,
            release_year: matched.release_year,
            cover_art_ref: matched.cover_art_ref,
            source_confidence: matched.score.clamp(0.0, 1.0),
            provenance: Provenance::Registry(candidate.registry),
            resolved_at: Utc::now(),
        })
    }

    /// Raw values verbatim with lowered confidence; the file stem stands in
    /// for a missing title.
    fn fallback_record(&self, event: &TrackEvent, raw: &RawMetadata) -> Option<ResolvedRecord> {
        // Raw values are published verbatim; blank ones count as absent
        let present = |field: &Option<String>| field.clone().filter(|s| !s.trim().is_empty());

        let (title, confidence) = match present(&raw.title) {
            Some(title) => (title, raw.embedded_tag_confidence * self.config.fallback_confidence_factor),
            None => (event.file_stem()?, FILE_STEM_CONFIDENCE),
        };

        Some(ResolvedRecord {
            source_id: event.source_id.clone(),
            artist: present(&raw.artist).unwrap_or_default(),
            title,
            album: present(&raw.album),
            release_year: raw.release_year,
            cover_art_ref: None,
            source_confidence: confidence.clamp(0.0, 1.0),
            provenance: Provenance::Fallback,
            resolved_at: Utc::now(),
        })
    }

    async fn publish(
        &self,
        slot: Arc<SourceSlot>,
        generation: u64,
        token: &CancellationToken,
        stage: ResolutionStage,
        record: Arc<ResolvedRecord>,
    ) -> Option<Arc<ResolvedRecord>> {
        {
            let _guard = slot.publish_lock.lock().await;
            if token.is_cancelled() || !slot.is_current(generation) {
                debug!(source_id = %record.source_id, generation, "Discarding stale result");
                self.stage(&record.source_id, generation, ResolutionStage::Cancelled);
                return None;
            }
            self.current
                .write()
                .await
                .insert(record.source_id.clone(), Arc::clone(&record));
        }

        self.stage(&record.source_id, generation, stage);
        info!(
            source_id = %record.source_id,
            artist = %record.artist,
            title = %record.title,
            provenance = %record.provenance,
            confidence = record.source_confidence,
            "Now playing"
        );

        self.components.dispatcher.publish(Arc::clone(&record), token).await;
        if token.is_cancelled() {
            debug!(source_id = %record.source_id, generation, "Superseded during delivery");
            self.stage(&record.source_id, generation, ResolutionStage::Cancelled);
            return None;
        }
        Some(record)
    }
}
