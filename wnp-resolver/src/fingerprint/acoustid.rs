//! AcoustID lookup client
//!
//! Looks up a compressed fingerprint and maps the best recording with a score
//! at or above `min_score` to `RawMetadata`. Requests go through a
//! process-wide token bucket. A rate-limit reply (AcoustID error code 14, or
//! HTTP 429/503) is retried once after one second.

use super::Identifier;
use crate::error::{RemoteError, ResolveError};
use crate::remote::{http_client, rate_limiter, DirectRateLimiter};
use crate::types::{Fingerprint, RawMetadata};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// AcoustID error code for "too many requests"
const RATE_LIMIT_ERROR_CODE: i64 = 14;

/// Delay before the single rate-limit retry
const RATE_LIMIT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Confidence given to identification results
const IDENTIFICATION_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, Deserialize)]
pub struct AcoustIdResponse {
    pub status: String,
    #[serde(default)]
    pub results: Vec<AcoustIdResult>,
    pub error: Option<AcoustIdError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcoustIdError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcoustIdResult {
    pub id: String,
    pub score: f64,
    #[serde(default)]
    pub recordings: Vec<AcoustIdRecording>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcoustIdRecording {
    pub id: String,
    pub title: Option<String>,
    #[serde(default)]
    pub artists: Vec<AcoustIdArtist>,
    /// Seconds
    pub duration: Option<f64>,
    #[serde(default)]
    pub releases: Vec<AcoustIdRelease>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcoustIdArtist {
    pub name: String,
    pub joinphrase: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcoustIdRelease {
    pub title: Option<String>,
    pub date: Option<AcoustIdDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcoustIdDate {
    pub year: Option<i32>,
}

/// AcoustID API client
pub struct AcoustIdClient {
    http_client: reqwest::Client,
    rate_limiter: Arc<DirectRateLimiter>,
    endpoint: String,
    api_key: String,
    min_score: f64,
}

impl AcoustIdClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        rate_per_second: u32,
        timeout: Duration,
        min_score: f64,
    ) -> Result<Self, RemoteError> {
        Ok(Self {
            http_client: http_client(timeout)?,
            rate_limiter: rate_limiter(rate_per_second),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            min_score,
        })
    }

    /// One rate-limited lookup call
    async fn lookup_once(&self, fingerprint: &Fingerprint) -> Result<AcoustIdResponse, RemoteError> {
        self.rate_limiter.until_ready().await;

        let duration = fingerprint.duration.as_secs().to_string();
        let params = [
            ("client", self.api_key.as_str()),
            ("meta", "recordings releases"),
            ("format", "json"),
            ("duration", duration.as_str()),
            ("fingerprint", fingerprint.encoded.as_str()),
        ];

        debug!(digest = %fingerprint.hash_digest, duration = %duration, "Querying AcoustID");

        let response = self
            .http_client
            .post(&self.endpoint)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 || status.as_u16() == 503 {
            return Err(RemoteError::RateLimited);
        }

        // AcoustID reports API errors with a JSON body and a 4xx status
        let body: AcoustIdResponse = match response.json().await {
            Ok(body) => body,
            Err(_) if !status.is_success() => return Err(RemoteError::Status(status.as_u16())),
            Err(e) => return Err(RemoteError::Parse(e.to_string())),
        };

        if let Some(error) = &body.error {
            if error.code == RATE_LIMIT_ERROR_CODE || error.message.contains("rate limit") {
                return Err(RemoteError::RateLimited);
            }
            return Err(RemoteError::Service(format!("{} (code {})", error.message, error.code)));
        }
        if body.status != "ok" {
            return Err(RemoteError::Service(format!("status {}", body.status)));
        }
        Ok(body)
    }

    /// Lookup with a single retry on rate limiting
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Result<AcoustIdResponse, RemoteError> {
        match self.lookup_once(fingerprint).await {
            Err(RemoteError::RateLimited) => {
                info!("AcoustID rate limited, retrying once in {:?}", RATE_LIMIT_RETRY_DELAY);
                tokio::time::sleep(RATE_LIMIT_RETRY_DELAY).await;
                self.lookup_once(fingerprint).await
            }
            other => other,
        }
    }
}

/// Best recording at or above `min_score`, as `RawMetadata`
pub fn best_match(response: &AcoustIdResponse, min_score: f64) -> Option<RawMetadata> {
    let mut results: Vec<&AcoustIdResult> = response
        .results
        .iter()
        .filter(|r| r.score >= min_score)
        .collect();
    results.sort_by(|a, b| b.score.total_cmp(&a.score));

    results.into_iter().find_map(|result| {
        let recording = result
            .recordings
            .iter()
            .find(|r| r.title.as_deref().is_some_and(|t| !t.trim().is_empty()))?;

        let artist = join_artists(&recording.artists);
        let release = recording.releases.first();

        Some(RawMetadata {
            artist,
            title: recording.title.clone(),
            album: release.and_then(|r| r.title.clone()),
            duration: recording.duration.map(Duration::from_secs_f64),
            release_year: release.and_then(|r| r.date.as_ref()).and_then(|d| d.year),
            recording_mbid: Some(recording.id.clone()),
            embedded_tag_confidence: IDENTIFICATION_CONFIDENCE * result.score,
        })
    })
}

fn join_artists(artists: &[AcoustIdArtist]) -> Option<String> {
    if artists.is_empty() {
        return None;
    }
    let mut joined = String::new();
    for (i, artist) in artists.iter().enumerate() {
        joined.push_str(&artist.name);
        if i + 1 < artists.len() {
            joined.push_str(artist.joinphrase.as_deref().unwrap_or("; "));
        }
    }
    Some(joined)
}

#[async_trait]
impl Identifier for AcoustIdClient {
    async fn identify(&self, fingerprint: &Fingerprint) -> Result<Option<RawMetadata>, ResolveError> {
        let response = self.lookup(fingerprint).await.map_err(|e| {
            warn!(digest = %fingerprint.hash_digest, "AcoustID lookup failed: {}", e);
            ResolveError::IdentificationUnavailable(e.to_string())
        })?;

        let matched = best_match(&response, self.min_score);
        match &matched {
            Some(raw) => info!(
                artist = ?raw.artist,
                title = ?raw.title,
                mbid = ?raw.recording_mbid,
                "AcoustID identified recording"
            ),
            None => info!(
                digest = %fingerprint.hash_digest,
                results = response.results.len(),
                "AcoustID returned no match above threshold"
            ),
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "status": "ok",
        "results": [
            {"id": "low", "score": 0.5, "recordings": [
                {"id": "rec-low", "title": "Wrong Song", "artists": [{"name": "Nobody"}]}
            ]},
            {"id": "high", "score": 0.93, "recordings": [
                {"id": "9f1c0a64-1111-2222-3333-444455556666", "title": "One More Time",
                 "duration": 320.0,
                 "artists": [{"name": "Daft Punk"}],
                 "releases": [{"title": "Discovery", "date": {"year": 2001, "month": 3}}]}
            ]}
        ]
    }"#;

    #[test]
    fn test_best_match_respects_threshold() {
        let response: AcoustIdResponse = serde_json::from_str(RESPONSE).unwrap();
        let raw = best_match(&response, 0.8).unwrap();
        assert_eq!(raw.artist.as_deref(), Some("Daft Punk"));
        assert_eq!(raw.title.as_deref(), Some("One More Time"));
        assert_eq!(raw.album.as_deref(), Some("Discovery"));
        assert_eq!(raw.release_year, Some(2001));
        assert_eq!(raw.duration, Some(Duration::from_secs(320)));
        assert!((raw.embedded_tag_confidence - 0.8 * 0.93).abs() < 1e-9);

        assert!(best_match(&response, 0.95).is_none());
    }

    #[test]
    fn test_result_without_titled_recording_skipped() {
        let json = r#"{"status":"ok","results":[{"id":"x","score":0.99,"recordings":[{"id":"r"}]}]}"#;
        let response: AcoustIdResponse = serde_json::from_str(json).unwrap();
        assert!(best_match(&response, 0.8).is_none());
    }

    #[test]
    fn test_error_body_parses() {
        let json = r#"{"status":"error","error":{"code":14,"message":"rate limit exceeded"}}"#;
        let response: AcoustIdResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.error.unwrap().code, RATE_LIMIT_ERROR_CODE);
        assert!(response.results.is_empty());
    }

    #[test]
    fn test_join_artists_uses_joinphrase() {
        let artists = vec![
            AcoustIdArtist {
                name: "A".to_string(),
                joinphrase: Some(" feat. ".to_string()),
            },
            AcoustIdArtist {
                name: "B".to_string(),
                joinphrase: None,
            },
        ];
        assert_eq!(join_artists(&artists).as_deref(), Some("A feat. B"));
        assert_eq!(join_artists(&[]), None);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let client = AcoustIdClient::new(
            "http://127.0.0.1:9/v2/lookup",
            "key",
            10,
            Duration::from_millis(500),
            0.8,
        )
        .unwrap();
        let fp = Fingerprint {
            hash_digest: "d".to_string(),
            duration: Duration::from_secs(10),
            encoded: "AQAA".to_string(),
        };
        let result = client.identify(&fp).await;
        assert!(matches!(result, Err(ResolveError::IdentificationUnavailable(_))));
    }
}
