//! Test helpers: fake pipeline components and audio fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wnp_common::events::EventBus;
use wnp_resolver::config::{ArbitrationPolicy, PipelineConfig};
use wnp_resolver::error::{RemoteError, ResolveError, SinkError};
use wnp_resolver::extractors::TagExtractor;
use wnp_resolver::fingerprint::TrackIdentifier;
use wnp_resolver::registry::{LookupQuery, Registry, RegistryCache, RegistryLookup, RegistryMatch};
use wnp_resolver::sinks::{Sink, SinkDispatcher};
use wnp_resolver::types::{RawMetadata, ResolvedRecord};
use wnp_resolver::{Coordinator, PipelineComponents};

/// Tags keyed by file name; unknown files are unreadable
#[derive(Default)]
pub struct FakeExtractor {
    tags: HashMap<String, (RawMetadata, Duration)>,
}

impl FakeExtractor {
    pub fn with(mut self, file_name: &str, raw: RawMetadata) -> Self {
        self.tags.insert(file_name.to_string(), (raw, Duration::ZERO));
        self
    }

    pub fn with_delay(mut self, file_name: &str, raw: RawMetadata, delay: Duration) -> Self {
        self.tags.insert(file_name.to_string(), (raw, delay));
        self
    }
}

#[async_trait]
impl TagExtractor for FakeExtractor {
    async fn extract(&self, path: &Path) -> Result<RawMetadata, ResolveError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        match self.tags.get(&name) {
            Some((raw, delay)) => {
                tokio::time::sleep(*delay).await;
                Ok(raw.clone())
            }
            None => Err(ResolveError::UnreadableMedia(name)),
        }
    }
}

/// Registry answering from a fixed table keyed by folded title
pub struct FakeRegistry {
    pub name: String,
    pub matches: HashMap<String, Vec<RegistryMatch>>,
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl FakeRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            matches: HashMap::new(),
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn with(mut self, title_key: &str, matched: RegistryMatch) -> Self {
        self.matches.entry(title_key.to_string()).or_default().push(matched);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &LookupQuery) -> Result<Vec<RegistryMatch>, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.fail {
            return Err(RemoteError::Status(503));
        }
        Ok(self.matches.get(&query.key.title_key).cloned().unwrap_or_default())
    }
}

/// Identifier that never answers in time
pub struct SlowIdentifier {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

#[async_trait]
impl TrackIdentifier for SlowIdentifier {
    async fn identify_track(&self, _path: &Path) -> Result<Option<RawMetadata>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(None)
    }
}

/// Sink that keeps every record it receives
#[derive(Default)]
pub struct RecordingSink {
    pub records: Mutex<Vec<ResolvedRecord>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<ResolvedRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn accept(&self, record: &ResolvedRecord) -> Result<(), SinkError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Sink that takes `delay` to accept each record
pub struct SlowSink {
    pub delay: Duration,
    pub inner: RecordingSink,
}

impl SlowSink {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: RecordingSink::default(),
        }
    }

    pub fn records(&self) -> Vec<ResolvedRecord> {
        self.inner.records()
    }
}

#[async_trait]
impl Sink for SlowSink {
    async fn accept(&self, record: &ResolvedRecord) -> Result<(), SinkError> {
        tokio::time::sleep(self.delay).await;
        self.inner.accept(record).await
    }
}

/// Sink that always errors
pub struct FailingSink;

#[async_trait]
impl Sink for FailingSink {
    async fn accept(&self, _record: &ResolvedRecord) -> Result<(), SinkError> {
        Err(SinkError::Http("HTTP 500".to_string()))
    }
}

pub fn raw(artist: Option<&str>, title: Option<&str>) -> RawMetadata {
    RawMetadata {
        artist: artist.map(String::from),
        title: title.map(String::from),
        embedded_tag_confidence: 0.6,
        ..Default::default()
    }
}

pub fn registry_match(artist: &str, title: &str, album: Option<&str>, year: Option<i32>, score: f64) -> RegistryMatch {
    RegistryMatch {
        artist: artist.to_string(),
        title: title.to_string(),
        album: album.map(String::from),
        release_year: year,
        cover_art_ref: None,
        score,
    }
}

pub fn registry_lookup(registries: Vec<(Arc<dyn Registry>, u32)>) -> Arc<RegistryLookup> {
    let cache = Arc::new(RegistryCache::new(64, 4, Duration::from_secs(3600)));
    let lookup = registries
        .into_iter()
        .fold(RegistryLookup::new(cache, ArbitrationPolicy::default(), 0.9), |lookup, (registry, priority)| {
            lookup.with_registry(registry, priority)
        });
    Arc::new(lookup)
}

pub fn coordinator(
    extractor: Arc<dyn TagExtractor>,
    identifier: Option<Arc<dyn TrackIdentifier>>,
    lookup: Arc<RegistryLookup>,
    dispatcher: SinkDispatcher,
    event_bus: EventBus,
    config: PipelineConfig,
) -> Coordinator {
    Coordinator::new(
        PipelineComponents {
            extractor,
            identifier,
            lookup,
            dispatcher: Arc::new(dispatcher),
        },
        event_bus,
        config,
    )
}

/// Write a mono 440 Hz tone as 16-bit WAV (no tags)
pub fn generate_test_wav(path: &Path, duration_seconds: f64, sample_rate: u32) -> PathBuf {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let total_samples = (duration_seconds * sample_rate as f64) as usize;
    for i in 0..total_samples {
        let t = i as f32 / sample_rate as f32;
        let sample = (0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin() * i16::MAX as f32) as i16;
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
    path.to_path_buf()
}
