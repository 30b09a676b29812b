//! Fingerprint resolution
//!
//! `FingerprintResolver` decodes a track, computes its chromaprint
//! fingerprint locally and asks a remote `Identifier` (AcoustID) who it is.
//! Identities are cached by fingerprint digest, "no match" included, and
//! concurrent identifications of the same fingerprint share one remote call.
//! Every remote call is bounded by a timeout.

pub mod acoustid;
pub mod chromaprint;
pub mod decoder;

pub use acoustid::AcoustIdClient;
pub use decoder::AudioSamples;

use crate::cache::ShardedCache;
use crate::error::ResolveError;
use crate::types::{Fingerprint, RawMetadata};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Namespace of the fingerprint cache in the persistent store
pub const CACHE_NAMESPACE: &str = "fingerprint";

/// Remote identification service
#[async_trait]
pub trait Identifier: Send + Sync {
    /// `Ok(None)` when the service answered but nothing matched
    async fn identify(&self, fingerprint: &Fingerprint) -> Result<Option<RawMetadata>, ResolveError>;
}

/// What the coordinator calls when tags are insufficient
#[async_trait]
pub trait TrackIdentifier: Send + Sync {
    async fn identify_track(&self, path: &Path) -> Result<Option<RawMetadata>, ResolveError>;
}

/// Fingerprint → identity cache
pub type FingerprintCache = ShardedCache<String, Option<RawMetadata>>;

/// Local fingerprinting plus cached, time-bounded remote identification
pub struct FingerprintResolver {
    identifier: Arc<dyn Identifier>,
    cache: Arc<FingerprintCache>,
    timeout: Duration,
    max_seconds: u32,
}

impl FingerprintResolver {
    pub fn new(
        identifier: Arc<dyn Identifier>,
        cache: Arc<FingerprintCache>,
        timeout: Duration,
        max_seconds: u32,
    ) -> Self {
        Self {
            identifier,
            cache,
            timeout,
            max_seconds,
        }
    }

    pub fn cache(&self) -> &Arc<FingerprintCache> {
        &self.cache
    }

    /// Compute the fingerprint of decoded samples on the blocking pool
    pub async fn resolve(&self, audio: AudioSamples) -> Result<Fingerprint, ResolveError> {
        tokio::task::spawn_blocking(move || chromaprint::fingerprint_samples(&audio))
            .await
            .map_err(|e| ResolveError::IdentificationUnavailable(format!("fingerprint task failed: {}", e)))?
    }

    /// Decode a file on the blocking pool, then fingerprint its samples
    pub async fn fingerprint_file(&self, path: &Path) -> Result<Fingerprint, ResolveError> {
        let path: PathBuf = path.to_path_buf();
        let max_seconds = self.max_seconds;
        let audio = tokio::task::spawn_blocking(move || decoder::decode_file(&path, max_seconds))
            .await
            .map_err(|e| ResolveError::UnreadableMedia(format!("decoder task failed: {}", e)))??;
        self.resolve(audio).await
    }

    /// Identify a fingerprint, consulting the cache first
    pub async fn identify(&self, fingerprint: &Fingerprint) -> Result<Option<RawMetadata>, ResolveError> {
        let identifier = Arc::clone(&self.identifier);
        let timeout = self.timeout;
        self.cache
            .get_or_try_insert_with(fingerprint.hash_digest.clone(), || async move {
                match tokio::time::timeout(timeout, identifier.identify(fingerprint)).await {
                    Ok(result) => result,
                    Err(_) => Err(ResolveError::IdentificationUnavailable(format!(
                        "identification timed out after {:?}",
                        timeout
                    ))),
                }
            })
            .await
    }
}

#[async_trait]
impl TrackIdentifier for FingerprintResolver {
    async fn identify_track(&self, path: &Path) -> Result<Option<RawMetadata>, ResolveError> {
        let fingerprint = self.fingerprint_file(path).await?;
        debug!(path = %path.display(), digest = %fingerprint.hash_digest, "Computed fingerprint");
        let identity = self.identify(&fingerprint).await?;
        info!(path = %path.display(), identified = identity.is_some(), "Fingerprint identification finished");
        Ok(identity)
    }
}
