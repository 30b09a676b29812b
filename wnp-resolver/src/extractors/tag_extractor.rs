//! Embedded tag extraction using `lofty`

use super::TagExtractor;
use crate::error::ResolveError;
use crate::types::RawMetadata;
use async_trait::async_trait;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Tag extractor backed by `lofty`
///
/// Confidence is the fraction of canonical fields (artist, title, album,
/// duration) present, scaled by `base_confidence`.
#[derive(Debug, Clone)]
pub struct LoftyTagExtractor {
    base_confidence: f64,
}

impl LoftyTagExtractor {
    pub fn new(base_confidence: f64) -> Self {
        Self {
            base_confidence: base_confidence.clamp(0.0, 1.0),
        }
    }

    /// Blocking read of tags and audio properties
    pub fn read(&self, path: &Path) -> Result<RawMetadata, ResolveError> {
        let tagged_file = Probe::open(path)
            .map_err(|e| ResolveError::UnreadableMedia(format!("{}: {}", path.display(), e)))?
            .read()
            .map_err(|e| ResolveError::UnreadableMedia(format!("{}: {}", path.display(), e)))?;

        let duration = Some(tagged_file.properties().duration()).filter(|d| !d.is_zero());

        let mut raw = RawMetadata {
            duration,
            ..Default::default()
        };

        match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
            Some(tag) => {
                raw.artist = text(tag.artist().as_deref());
                raw.title = text(tag.title().as_deref());
                raw.album = text(tag.album().as_deref());
                raw.release_year = tag.year().and_then(|y| i32::try_from(y).ok()).filter(|y| *y > 0);
                raw.recording_mbid = recording_mbid(tag);
            }
            None => debug!(file = %path.display(), "No tags found in audio file"),
        }

        raw.embedded_tag_confidence = self.confidence(&raw);

        debug!(
            file = %path.display(),
            artist = ?raw.artist,
            title = ?raw.title,
            confidence = raw.embedded_tag_confidence,
            "Extracted tags"
        );
        Ok(raw)
    }

    fn confidence(&self, raw: &RawMetadata) -> f64 {
        let present = [
            raw.artist.is_some(),
            raw.title.is_some(),
            raw.album.is_some(),
            raw.duration.is_some(),
        ]
        .iter()
        .filter(|&&p| p)
        .count();
        self.base_confidence * present as f64 / 4.0
    }
}

impl Default for LoftyTagExtractor {
    fn default() -> Self {
        Self::new(0.6)
    }
}

#[async_trait]
impl TagExtractor for LoftyTagExtractor {
    async fn extract(&self, path: &Path) -> Result<RawMetadata, ResolveError> {
        let extractor = self.clone();
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || extractor.read(&path))
            .await
            .map_err(|e| ResolveError::UnreadableMedia(format!("tag reader task failed: {}", e)))?
    }
}

fn text(value: Option<&str>) -> Option<String> {
    value
        .map(|s| s.trim_matches(char::from(0)).trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn recording_mbid(tag: &Tag) -> Option<String> {
    let keys = [
        ItemKey::MusicBrainzRecordingId,
        ItemKey::Unknown("MUSICBRAINZ_TRACKID".to_string()),
        ItemKey::Unknown("MusicBrainz Recording Id".to_string()),
    ];

    for key in &keys {
        if let Some(mbid) = tag.get_string(key) {
            if is_valid_mbid(mbid) {
                return Some(mbid.to_lowercase());
            }
            warn!(mbid = %mbid, "Ignoring malformed MusicBrainz recording id tag");
        }
    }
    None
}

/// MusicBrainz ids are 8-4-4-4-12 hex UUIDs
pub fn is_valid_mbid(mbid: &str) -> bool {
    let parts: Vec<&str> = mbid.split('-').collect();
    parts.len() == 5
        && parts.iter().map(|p| p.len()).eq([8, 4, 4, 4, 12])
        && parts.iter().all(|p| p.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write_silent_wav(path: &Path, seconds: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..(8000 * seconds) {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_is_unreadable() {
        let extractor = LoftyTagExtractor::default();
        let result = extractor.extract(Path::new("/nonexistent/file.mp3")).await;
        assert!(matches!(result, Err(ResolveError::UnreadableMedia(_))));
    }

    #[tokio::test]
    async fn test_garbage_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.mp3");
        std::fs::write(&path, b"definitely not audio").unwrap();

        let result = LoftyTagExtractor::default().extract(&path).await;
        assert!(matches!(result, Err(ResolveError::UnreadableMedia(_))));
    }

    #[tokio::test]
    async fn test_untagged_wav_has_duration_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");
        write_silent_wav(&path, 2);

        let raw = LoftyTagExtractor::new(0.8).extract(&path).await.unwrap();
        assert!(raw.artist.is_none());
        assert!(raw.title.is_none());
        assert!(!raw.has_identity());
        let duration = raw.duration.unwrap();
        assert!(duration >= Duration::from_millis(1900) && duration <= Duration::from_millis(2100));
        assert!((raw.embedded_tag_confidence - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_valid_mbid_format() {
        assert!(is_valid_mbid("b1a9c0e9-d987-4042-ae91-78d6a3267d69"));
        assert!(!is_valid_mbid("b1a9c0e9d9874042ae9178d6a3267d69"));
        assert!(!is_valid_mbid("zzzzzzzz-d987-4042-ae91-78d6a3267d69"));
    }

    #[test]
    fn test_text_trims_nul_and_blank() {
        assert_eq!(text(Some("  Title\0")), Some("Title".to_string()));
        assert_eq!(text(Some("   ")), None);
        assert_eq!(text(None), None);
    }
}
