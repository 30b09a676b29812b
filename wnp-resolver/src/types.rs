//! Core data model of the resolution pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use wnp_common::events::NowPlayingInfo;

/// Confidence assigned to a fallback record titled from the file name
pub const FILE_STEM_CONFIDENCE: f64 = 0.05;

/// A track change observed by a source watcher
///
/// Immutable; consumed once by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackEvent {
    pub source_id: String,
    /// Media file path (playlists are resolved by the watcher)
    pub track_ref: PathBuf,
    pub observed_at: DateTime<Utc>,
}

impl TrackEvent {
    pub fn new(source_id: impl Into<String>, track_ref: impl Into<PathBuf>) -> Self {
        Self {
            source_id: source_id.into(),
            track_ref: track_ref.into(),
            observed_at: Utc::now(),
        }
    }

    /// File stem of the track, if it has a usable one
    pub fn file_stem(&self) -> Option<String> {
        self.track_ref
            .file_stem()
            .map(|s| s.to_string_lossy().trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// Metadata as read from tags or returned by identification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMetadata {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    #[serde(with = "opt_duration_ms")]
    pub duration: Option<Duration>,
    pub release_year: Option<i32>,
    /// MusicBrainz recording id when a tag or identification supplied one
    pub recording_mbid: Option<String>,
    /// Confidence in [0.0, 1.0]
    pub embedded_tag_confidence: f64,
}

impl RawMetadata {
    /// Artist and title both present and non-blank
    pub fn has_identity(&self) -> bool {
        is_present(&self.artist) && is_present(&self.title)
    }

    /// Fill fields missing here from `other`, keeping present values.
    ///
    /// Confidence becomes the higher of the two.
    pub fn fill_from(&mut self, other: &RawMetadata) {
        fn fill<T: Clone>(dst: &mut Option<T>, src: &Option<T>, present: bool) {
            if !present {
                if let Some(v) = src {
                    *dst = Some(v.clone());
                }
            }
        }
        let (artist, title, album) = (
            is_present(&self.artist),
            is_present(&self.title),
            is_present(&self.album),
        );
        let (duration, year, mbid) = (
            self.duration.is_some(),
            self.release_year.is_some(),
            self.recording_mbid.is_some(),
        );
        fill(&mut self.artist, &other.artist, artist);
        fill(&mut self.title, &other.title, title);
        fill(&mut self.album, &other.album, album);
        fill(&mut self.duration, &other.duration, duration);
        fill(&mut self.release_year, &other.release_year, year);
        fill(&mut self.recording_mbid, &other.recording_mbid, mbid);
        self.embedded_tag_confidence = self.embedded_tag_confidence.max(other.embedded_tag_confidence);
    }
}

fn is_present(field: &Option<String>) -> bool {
    field.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

/// Acoustic fingerprint of a track
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// SHA-256 hex digest of the raw fingerprint words; cache key
    pub hash_digest: String,
    pub duration: Duration,
    /// Compressed, base64url-encoded fingerprint as sent to AcoustID
    pub encoded: String,
}

/// Canonical artist/title pair used for cache and registry lookups
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedKey {
    pub artist_key: String,
    pub title_key: String,
}

impl std::fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.artist_key, self.title_key)
    }
}

/// Which stage produced a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Registry match (registry name)
    Registry(String),
    /// Raw tag/identification values
    Fallback,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Registry(name) => f.write_str(name),
            Provenance::Fallback => f.write_str("fallback"),
        }
    }
}

/// Final now-playing record; immutable once constructed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRecord {
    pub source_id: String,
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub release_year: Option<i32>,
    pub cover_art_ref: Option<String>,
    pub source_confidence: f64,
    pub provenance: Provenance,
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedRecord {
    /// Event/overlay representation
    pub fn to_now_playing(&self) -> NowPlayingInfo {
        NowPlayingInfo {
            source_id: self.source_id.clone(),
            artist: self.artist.clone(),
            title: self.title.clone(),
            album: self.album.clone(),
            release_year: self.release_year,
            cover_art_ref: self.cover_art_ref.clone(),
            confidence: self.source_confidence,
            provenance: self.provenance.to_string(),
            resolved_at: self.resolved_at,
        }
    }

    /// Value of a template field by name
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "source_id" => Some(self.source_id.clone()),
            "artist" => Some(self.artist.clone()),
            "title" => Some(self.title.clone()),
            "album" => Some(self.album.clone().unwrap_or_default()),
            "release_year" | "year" => Some(self.release_year.map(|y| y.to_string()).unwrap_or_default()),
            "cover_art_ref" | "cover_art" => Some(self.cover_art_ref.clone().unwrap_or_default()),
            "confidence" => Some(format!("{:.2}", self.source_confidence)),
            "provenance" => Some(self.provenance.to_string()),
            "resolved_at" => Some(self.resolved_at.to_rfc3339()),
            _ => None,
        }
    }
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_identity_ignores_blank_fields() {
        let raw = RawMetadata {
            artist: Some("  ".to_string()),
            title: Some("Song".to_string()),
            ..Default::default()
        };
        assert!(!raw.has_identity());
    }

    #[test]
    fn test_fill_from_keeps_present_values() {
        let mut tags = RawMetadata {
            artist: Some("Tag Artist".to_string()),
            title: None,
            embedded_tag_confidence: 0.3,
            ..Default::default()
        };
        let identified = RawMetadata {
            artist: Some("Other".to_string()),
            title: Some("Identified".to_string()),
            release_year: Some(1999),
            embedded_tag_confidence: 0.9,
            ..Default::default()
        };
        tags.fill_from(&identified);
        assert_eq!(tags.artist.as_deref(), Some("Tag Artist"));
        assert_eq!(tags.title.as_deref(), Some("Identified"));
        assert_eq!(tags.release_year, Some(1999));
        assert_eq!(tags.embedded_tag_confidence, 0.9);
    }

    #[test]
    fn test_file_stem() {
        let event = TrackEvent::new("deck", "/music/Artist - Song.mp3");
        assert_eq!(event.file_stem().as_deref(), Some("Artist - Song"));
        let event = TrackEvent::new("deck", "/");
        assert_eq!(event.file_stem(), None);
    }

    #[test]
    fn test_template_fields() {
        let record = ResolvedRecord {
            source_id: "deck".to_string(),
            artist: "Daft Punk".to_string(),
            title: "One More Time".to_string(),
            album: None,
            release_year: Some(2000),
            cover_art_ref: None,
            source_confidence: 0.5,
            provenance: Provenance::Registry("musicbrainz".to_string()),
            resolved_at: Utc::now(),
        };
        assert_eq!(record.field("year").as_deref(), Some("2000"));
        assert_eq!(record.field("album").as_deref(), Some(""));
        assert_eq!(record.field("provenance").as_deref(), Some("musicbrainz"));
        assert_eq!(record.field("bogus"), None);
    }
}
