//! Tag extraction
//!
//! `TagExtractor` is the seam the coordinator calls; `LoftyTagExtractor` reads
//! embedded tags with `lofty`.

pub mod tag_extractor;

pub use tag_extractor::LoftyTagExtractor;

use crate::error::ResolveError;
use crate::types::RawMetadata;
use async_trait::async_trait;
use std::path::Path;

/// Reads embedded metadata from a media file
///
/// Deterministic for given file contents. Corrupt or unsupported containers
/// fail with `ResolveError::UnreadableMedia`.
#[async_trait]
pub trait TagExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<RawMetadata, ResolveError>;
}
