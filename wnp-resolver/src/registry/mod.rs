//! Metadata registries
//!
//! A `Registry` maps a normalized artist/title query to candidate records.
//! `RegistryLookup` queries registries in priority order, arbitrates between
//! their answers and caches the winner by `NormalizedKey`.

pub mod discogs;
pub mod lookup;
pub mod musicbrainz;

pub use discogs::DiscogsRegistry;
pub use lookup::{arbitrate, Arbitration, Candidate, RegistryCache, RegistryLookup};
pub use musicbrainz::MusicBrainzRegistry;

use crate::error::RemoteError;
use crate::types::NormalizedKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Namespace of the registry cache in the persistent store
pub const CACHE_NAMESPACE: &str = "registry";

/// What a registry is asked for
#[derive(Debug, Clone, PartialEq)]
pub struct LookupQuery {
    pub key: NormalizedKey,
    /// Display artist as tagged (may be empty)
    pub artist: String,
    /// Display title as tagged (may be empty)
    pub title: String,
}

/// One registry answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryMatch {
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub release_year: Option<i32>,
    pub cover_art_ref: Option<String>,
    /// Registry's own relevance in [0.0, 1.0]
    pub score: f64,
}

impl RegistryMatch {
    /// Number of populated fields; artist and title count only when non-blank
    pub fn completeness(&self) -> usize {
        [
            !self.artist.trim().is_empty(),
            !self.title.trim().is_empty(),
            self.album.as_deref().is_some_and(|a| !a.trim().is_empty()),
            self.release_year.is_some(),
            self.cover_art_ref.is_some(),
        ]
        .iter()
        .filter(|&&present| present)
        .count()
    }
}

/// External metadata registry
#[async_trait]
pub trait Registry: Send + Sync {
    fn name(&self) -> &str;

    /// Candidate matches, best first; empty when nothing matched
    async fn search(&self, query: &LookupQuery) -> Result<Vec<RegistryMatch>, RemoteError>;
}

/// First four-digit year in a date string like "2000-11-30"
pub(crate) fn parse_year(date: &str) -> Option<i32> {
    date.get(..4).and_then(|y| y.parse::<i32>().ok()).filter(|y| *y > 0)
}
