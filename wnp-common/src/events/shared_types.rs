//! Shared data types carried by WNP events

use serde::{Deserialize, Serialize};

/// Resolution progress of a single track event
///
/// `Resolved`, `Fallback` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionStage {
    Idle,
    Extracting,
    Fingerprinting,
    Normalizing,
    LookingUp,
    Resolved,
    Fallback,
    Cancelled,
}

impl ResolutionStage {
    /// Whether no further transition can follow this stage
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResolutionStage::Resolved | ResolutionStage::Fallback | ResolutionStage::Cancelled
        )
    }
}

impl std::fmt::Display for ResolutionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResolutionStage::Idle => "idle",
            ResolutionStage::Extracting => "extracting",
            ResolutionStage::Fingerprinting => "fingerprinting",
            ResolutionStage::Normalizing => "normalizing",
            ResolutionStage::LookingUp => "looking_up",
            ResolutionStage::Resolved => "resolved",
            ResolutionStage::Fallback => "fallback",
            ResolutionStage::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Now-playing record as exposed to overlays and SSE clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlayingInfo {
    /// Source that produced the track event
    pub source_id: String,
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub release_year: Option<i32>,
    /// Cover art URL or file path
    pub cover_art_ref: Option<String>,
    /// Confidence in [0.0, 1.0]
    pub confidence: f64,
    /// Stage/registry that produced the record (e.g. "musicbrainz", "fallback")
    pub provenance: String,
    pub resolved_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_stages() {
        assert!(ResolutionStage::Resolved.is_terminal());
        assert!(ResolutionStage::Fallback.is_terminal());
        assert!(ResolutionStage::Cancelled.is_terminal());
        assert!(!ResolutionStage::LookingUp.is_terminal());
        assert!(!ResolutionStage::Idle.is_terminal());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(ResolutionStage::LookingUp.to_string(), "looking_up");
        assert_eq!(ResolutionStage::Fingerprinting.to_string(), "fingerprinting");
    }
}
