//! MusicBrainz recording search
//!
//! - Endpoint: `{base}/recording?query=...&fmt=json`
//! - Rate limit: 1 request/second (MusicBrainz terms of service)
//! - Cover art: Cover Art Archive front image of the first release

use super::{parse_year, LookupQuery, Registry, RegistryMatch};
use crate::error::RemoteError;
use crate::remote::{http_client, rate_limiter, DirectRateLimiter};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// MusicBrainz API base URL
pub const MUSICBRAINZ_API_URL: &str = "https://musicbrainz.org/ws/2";

/// Cover Art Archive base URL
const COVER_ART_ARCHIVE_URL: &str = "https://coverartarchive.org/release";

const SEARCH_LIMIT: u32 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct MbSearchResponse {
    #[serde(default)]
    pub recordings: Vec<MbRecording>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MbRecording {
    pub id: String,
    /// Search relevance 0..=100
    #[serde(default)]
    pub score: u32,
    pub title: String,
    #[serde(rename = "artist-credit", default)]
    pub artist_credit: Vec<MbArtistCredit>,
    #[serde(default)]
    pub releases: Vec<MbRelease>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MbArtistCredit {
    pub name: String,
    #[serde(default)]
    pub joinphrase: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MbRelease {
    pub id: String,
    pub title: String,
    pub date: Option<String>,
    pub status: Option<String>,
}

/// MusicBrainz registry client
pub struct MusicBrainzRegistry {
    http_client: reqwest::Client,
    rate_limiter: Arc<DirectRateLimiter>,
    base_url: String,
}

impl MusicBrainzRegistry {
    pub fn new(base_url: Option<String>, rate_per_second: u32, timeout: Duration) -> Result<Self, RemoteError> {
        Ok(Self {
            http_client: http_client(timeout)?,
            rate_limiter: rate_limiter(rate_per_second),
            base_url: base_url.unwrap_or_else(|| MUSICBRAINZ_API_URL.to_string()),
        })
    }
}

/// Lucene query for a recording search
pub fn build_query(query: &LookupQuery) -> String {
    let mut parts = Vec::new();
    if !query.key.title_key.is_empty() {
        parts.push(format!("recording:\"{}\"", escape_lucene(&query.key.title_key)));
    }
    if !query.key.artist_key.is_empty() {
        parts.push(format!("artist:\"{}\"", escape_lucene(&query.key.artist_key)));
    }
    parts.join(" AND ")
}

fn escape_lucene(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Map a search response to matches, best first
pub fn parse_search_response(response: MbSearchResponse) -> Vec<RegistryMatch> {
    let mut matches: Vec<RegistryMatch> = response
        .recordings
        .into_iter()
        .map(|recording| {
            let artist = recording
                .artist_credit
                .iter()
                .map(|credit| format!("{}{}", credit.name, credit.joinphrase))
                .collect::<String>();

            // Prefer official releases for album/year
            let release = recording
                .releases
                .iter()
                .find(|r| r.status.as_deref() == Some("Official"))
                .or_else(|| recording.releases.first());

            RegistryMatch {
                artist: artist.trim().to_string(),
                title: recording.title,
                album: release.map(|r| r.title.clone()),
                release_year: release.and_then(|r| r.date.as_deref()).and_then(parse_year),
                cover_art_ref: release.map(|r| format!("{}/{}/front", COVER_ART_ARCHIVE_URL, r.id)),
                score: (recording.score.min(100) as f64) / 100.0,
            }
        })
        .collect();
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    matches
}

#[async_trait]
impl Registry for MusicBrainzRegistry {
    fn name(&self) -> &str {
        "musicbrainz"
    }

    async fn search(&self, query: &LookupQuery) -> Result<Vec<RegistryMatch>, RemoteError> {
        let lucene = build_query(query);
        if lucene.is_empty() {
            return Ok(Vec::new());
        }

        self.rate_limiter.until_ready().await;

        let url = format!("{}/recording", self.base_url);
        debug!(query = %lucene, "Querying MusicBrainz");

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("query", lucene.as_str()),
                ("fmt", "json"),
                ("limit", &SEARCH_LIMIT.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 503 || status.as_u16() == 429 {
            return Err(RemoteError::RateLimited);
        }
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }

        let body: MbSearchResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))?;
        Ok(parse_search_response(body))
    }
}
