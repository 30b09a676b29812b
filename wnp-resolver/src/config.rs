//! Configuration for wnp-resolver
//!
//! Loaded from `wnp.toml` (see `wnp_common::config` for path resolution).
//! Every section has compiled defaults; a missing file yields a resolver
//! with no sources that only serves the overlay API.
//!
//! Credentials resolve with ENV → TOML priority.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use wnp_common::config::LoggingConfig;
use wnp_common::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "WNP_CONFIG";
/// Environment variable holding the AcoustID API key
pub const ACOUSTID_KEY_ENV_VAR: &str = "WNP_ACOUSTID_API_KEY";
/// Environment variable holding the Discogs personal access token
pub const DISCOGS_TOKEN_ENV_VAR: &str = "WNP_DISCOGS_TOKEN";

/// Top-level `wnp.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub logging: LoggingConfig,
    pub watcher: WatcherConfig,
    pub fingerprint: FingerprintConfig,
    pub registries: Vec<RegistryConfig>,
    pub cache: CacheConfig,
    pub pipeline: PipelineConfig,
    pub sinks: Vec<SinkConfig>,
    pub image_cache: ImageCacheConfig,
    pub remote: RemoteConfig,
    pub server: ServerConfig,
}

/// `[watcher]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub sources: Vec<SourceConfig>,
}

/// How a source detects changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    /// File-system notifications
    #[default]
    Notify,
    /// Modification-time polling every `poll_interval_ms`
    Poll,
}

/// `[[watcher.sources]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub mode: WatchMode,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl SourceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_debounce_ms() -> u64 {
    500
}

/// `[fingerprint]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    pub enabled: bool,
    pub acoustid_api_key: Option<String>,
    pub endpoint: String,
    /// Requests per second (AcoustID allows 3)
    pub rate_per_second: u32,
    pub timeout_ms: u64,
    /// Minimum AcoustID result score accepted
    pub min_score: f64,
    /// Seconds of audio fingerprinted from the start of the track
    pub max_seconds: u32,
    /// Lifetime of fingerprint → identity cache entries
    pub cache_ttl_secs: u64,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            acoustid_api_key: None,
            endpoint: "https://api.acoustid.org/v2/lookup".to_string(),
            rate_per_second: 3,
            timeout_ms: 10_000,
            min_score: 0.8,
            max_seconds: 120,
            cache_ttl_secs: 7 * 24 * 3600,
        }
    }
}

/// Supported metadata registries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    Musicbrainz,
    Discogs,
}

impl std::fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryKind::Musicbrainz => f.write_str("musicbrainz"),
            RegistryKind::Discogs => f.write_str("discogs"),
        }
    }
}

/// `[[registries]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub kind: RegistryKind,
    /// Higher value is queried first and wins arbitration ties
    pub priority: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_registry_rate")]
    pub rate_per_second: u32,
    #[serde(default = "default_registry_timeout_ms")]
    pub timeout_ms: u64,
    /// Discogs token (ENV overrides)
    #[serde(default)]
    pub token: Option<String>,
    /// Base URL override
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_registry_rate() -> u32 {
    1
}

fn default_registry_timeout_ms() -> u64 {
    5000
}

/// `[cache]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries per cache (split across shards)
    pub capacity: usize,
    pub shards: usize,
    /// Registry result lifetime
    pub ttl_secs: u64,
    /// SQLite file for persistence; in-memory only when absent
    pub persist_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            shards: 16,
            ttl_secs: 30 * 24 * 3600,
            persist_path: None,
        }
    }
}

/// `[image_cache]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageCacheConfig {
    pub enabled: bool,
    /// SQLite file; `<data dir>/images.db` when absent
    pub path: Option<PathBuf>,
    /// Upper bound on stored image bytes
    pub max_bytes: u64,
    /// Concurrent downloads
    pub workers: usize,
    pub timeout_ms: u64,
}

impl Default for ImageCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            max_bytes: 256 * 1024 * 1024,
            workers: 5,
            timeout_ms: 5_000,
        }
    }
}

/// `[remote]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Contact URL or e-mail sent in the User-Agent (MusicBrainz asks for one)
    pub contact: Option<String>,
}

/// Tie-break order when several registries return a match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrationPolicy {
    /// Higher priority wins; completeness breaks ties
    #[default]
    PriorityThenCompleteness,
    /// More populated fields wins; priority breaks ties
    CompletenessThenPriority,
}

/// `[pipeline]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Wall-clock budget per track event
    pub deadline_ms: u64,
    /// Registry score that stops querying lower-priority registries
    pub high_confidence: f64,
    pub arbitration: ArbitrationPolicy,
    /// Confidence of a fully tagged file
    pub tag_confidence: f64,
    /// Multiplier applied to raw confidence when falling back
    pub fallback_confidence_factor: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 15_000,
            high_confidence: 0.9,
            arbitration: ArbitrationPolicy::default(),
            tag_confidence: 0.6,
            fallback_confidence_factor: 0.5,
        }
    }
}

impl PipelineConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Sink variant and its settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkKind {
    /// Render a `{{field}}` template into a text file
    TextFile { path: PathBuf, template: String },
    /// Publish on the event bus for the overlay server and SSE clients
    Overlay,
    /// POST the record as JSON
    Webhook { url: String },
    /// Append to the SQLite history database
    History { path: PathBuf },
}

/// `[[sinks]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Display name; defaults to the kind
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_sink_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(flatten)]
    pub kind: SinkKind,
}

fn default_sink_timeout_ms() -> u64 {
    2000
}

impl SinkConfig {
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.kind {
            SinkKind::TextFile { .. } => "text_file".to_string(),
            SinkKind::Overlay => "overlay".to_string(),
            SinkKind::Webhook { .. } => "webhook".to_string(),
            SinkKind::History { .. } => "history".to_string(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// `[server]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1".to_string(),
            port: 8899,
            event_capacity: 256,
        }
    }
}

impl ResolverConfig {
    /// Registries that are enabled, highest priority first
    pub fn active_registries(&self) -> Vec<RegistryConfig> {
        let mut active: Vec<RegistryConfig> =
            self.registries.iter().filter(|r| r.enabled).cloned().collect();
        active.sort_by(|a, b| b.priority.cmp(&a.priority));
        active
    }

    /// Overlay credentials from the environment onto the TOML values.
    pub fn apply_env_credentials(&mut self) {
        if let Some(key) = resolve_credential(
            "AcoustID API key",
            ACOUSTID_KEY_ENV_VAR,
            self.fingerprint.acoustid_api_key.as_deref(),
        ) {
            self.fingerprint.acoustid_api_key = Some(key);
        }

        for registry in self.registries.iter_mut() {
            if registry.kind == RegistryKind::Discogs {
                registry.token =
                    resolve_credential("Discogs token", DISCOGS_TOKEN_ENV_VAR, registry.token.as_deref());
            }
        }
    }

    /// Startup validation; every error here is fatal.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for source in &self.watcher.sources {
            if source.id.trim().is_empty() {
                return Err(Error::Config("Source id must not be empty".to_string()));
            }
            if !ids.insert(source.id.as_str()) {
                return Err(Error::Config(format!("Duplicate source id '{}'", source.id)));
            }
            if source.paths.is_empty() {
                return Err(Error::Config(format!("Source '{}' has no paths", source.id)));
            }
            if source.mode == WatchMode::Poll && source.poll_interval_ms == 0 {
                return Err(Error::Config(format!(
                    "Source '{}' uses poll mode with a zero poll interval",
                    source.id
                )));
            }
        }

        if self.fingerprint.enabled && self.fingerprint.rate_per_second == 0 {
            return Err(Error::Config("fingerprint.rate_per_second must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.fingerprint.min_score) {
            return Err(Error::Config("fingerprint.min_score must be within 0.0..=1.0".to_string()));
        }

        let mut kinds = HashSet::new();
        for registry in self.registries.iter().filter(|r| r.enabled) {
            if !kinds.insert(registry.kind) {
                return Err(Error::Config(format!("Registry '{}' configured twice", registry.kind)));
            }
            if registry.rate_per_second == 0 {
                return Err(Error::Config(format!(
                    "Registry '{}' rate_per_second must be > 0",
                    registry.kind
                )));
            }
            if registry.kind == RegistryKind::Discogs
                && !registry.token.as_deref().map(is_valid_key).unwrap_or(false)
            {
                return Err(Error::Config(format!(
                    "Discogs registry enabled but no token configured.\n\
                     Set {} or `token` in the [[registries]] entry.",
                    DISCOGS_TOKEN_ENV_VAR
                )));
            }
        }

        if self.cache.capacity == 0 || self.cache.shards == 0 {
            return Err(Error::Config("cache.capacity and cache.shards must be > 0".to_string()));
        }

        if self.image_cache.enabled && (self.image_cache.max_bytes == 0 || self.image_cache.workers == 0) {
            return Err(Error::Config("image_cache.max_bytes and image_cache.workers must be > 0".to_string()));
        }

        if self.pipeline.deadline_ms == 0 {
            return Err(Error::Config("pipeline.deadline_ms must be > 0".to_string()));
        }

        for sink in &self.sinks {
            match &sink.kind {
                SinkKind::TextFile { path, template } => {
                    if path.as_os_str().is_empty() || template.is_empty() {
                        return Err(Error::Config(format!(
                            "Sink '{}' needs a path and a template",
                            sink.display_name()
                        )));
                    }
                    crate::sinks::text_file::validate_template(template).map_err(|e| {
                        Error::Config(format!("Sink '{}': {}", sink.display_name(), e))
                    })?;
                }
                SinkKind::Webhook { url } => {
                    if !(url.starts_with("http://") || url.starts_with("https://")) {
                        return Err(Error::Config(format!(
                            "Sink '{}' has invalid webhook url '{}'",
                            sink.display_name(),
                            url
                        )));
                    }
                }
                SinkKind::History { path } => {
                    if path.as_os_str().is_empty() {
                        return Err(Error::Config(format!(
                            "Sink '{}' needs a database path",
                            sink.display_name()
                        )));
                    }
                }
                SinkKind::Overlay => {}
            }
            if sink.timeout_ms == 0 {
                return Err(Error::Config(format!(
                    "Sink '{}' timeout must be > 0",
                    sink.display_name()
                )));
            }
        }

        Ok(())
    }
}

/// Resolve a credential with ENV → TOML priority
fn resolve_credential(label: &str, env_var: &str, toml_value: Option<&str>) -> Option<String> {
    let env_value = std::env::var(env_var).ok().filter(|k| is_valid_key(k));
    let toml_value = toml_value.filter(|k| is_valid_key(k));

    if env_value.is_some() && toml_value.is_some() {
        warn!("{} found in environment and TOML config. Using environment.", label);
    }

    if let Some(key) = env_value {
        info!("{} loaded from environment variable", label);
        return Some(key);
    }
    if let Some(key) = toml_value {
        info!("{} loaded from TOML config", label);
        return Some(key.to_string());
    }
    None
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
