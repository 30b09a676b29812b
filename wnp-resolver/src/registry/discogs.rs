//! Discogs database search
//!
//! Searches releases by artist and track. Discogs titles releases as
//! "Artist - Album" and does not score results, so every hit gets a fixed
//! relevance decreasing with its position. The search does not return the
//! matched track, so each hit is confirmed against the release tracklist and
//! the canonical track title taken from there; hits whose tracklist has no
//! matching track are dropped. Requires a personal access token.

use super::{parse_year, LookupQuery, Registry, RegistryMatch};
use crate::error::RemoteError;
use crate::normalizer::fold;
use crate::remote::{http_client, rate_limiter, DirectRateLimiter};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Discogs API base URL
pub const DISCOGS_API_URL: &str = "https://api.discogs.com";

/// Relevance of the first search hit
const TOP_HIT_SCORE: f64 = 0.75;

const SEARCH_LIMIT: u32 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct DiscogsSearchResponse {
    #[serde(default)]
    pub results: Vec<DiscogsResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscogsResult {
    /// Release id
    pub id: u64,
    /// "Artist - Album"
    pub title: String,
    pub year: Option<String>,
    pub cover_image: Option<String>,
}

/// `/releases/{id}` response, reduced to the tracklist
#[derive(Debug, Clone, Deserialize)]
pub struct DiscogsRelease {
    #[serde(default)]
    pub tracklist: Vec<DiscogsTrack>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscogsTrack {
    pub title: String,
    /// "track", "heading" or "index"
    #[serde(default, rename = "type_")]
    pub kind: Option<String>,
}

/// A search hit awaiting tracklist confirmation
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseHit {
    pub release_id: u64,
    pub artist: String,
    pub album: Option<String>,
    pub release_year: Option<i32>,
    pub cover_art_ref: Option<String>,
    pub score: f64,
}

/// Discogs registry client
pub struct DiscogsRegistry {
    http_client: reqwest::Client,
    rate_limiter: Arc<DirectRateLimiter>,
    base_url: String,
    token: String,
}

impl DiscogsRegistry {
    pub fn new(
        base_url: Option<String>,
        token: impl Into<String>,
        rate_per_second: u32,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        Ok(Self {
            http_client: http_client(timeout)?,
            rate_limiter: rate_limiter(rate_per_second),
            base_url: base_url.unwrap_or_else(|| DISCOGS_API_URL.to_string()),
            token: token.into(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<T, RemoteError> {
        self.rate_limiter.until_ready().await;

        let response = self
            .http_client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, format!("Discogs token={}", self.token))
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(RemoteError::RateLimited);
        }
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }

        response.json().await.map_err(|e| RemoteError::Parse(e.to_string()))
    }
}

/// Map a search response to release hits in ranked order
pub fn parse_search_response(response: DiscogsSearchResponse, query: &LookupQuery) -> Vec<ReleaseHit> {
    response
        .results
        .into_iter()
        .enumerate()
        .map(|(i, result)| {
            let (artist, album) = match result.title.split_once(" - ") {
                Some((artist, album)) => (artist.trim().to_string(), Some(album.trim().to_string())),
                None => (query.artist.clone(), Some(result.title.trim().to_string())),
            };
            ReleaseHit {
                release_id: result.id,
                artist: strip_disambiguation(&artist),
                album: album.filter(|a| !a.is_empty()),
                release_year: result.year.as_deref().and_then(parse_year),
                cover_art_ref: result.cover_image.filter(|u| !u.is_empty()),
                score: TOP_HIT_SCORE - 0.05 * i as f64,
            }
        })
        .collect()
}

/// Confirm a hit against its release tracklist.
///
/// Returns the match carrying the tracklist's title for the first track
/// whose folded title equals the query's title key, or `None`.
pub fn confirm_track(hit: ReleaseHit, release: &DiscogsRelease, query: &LookupQuery) -> Option<RegistryMatch> {
    if query.key.title_key.is_empty() {
        return None;
    }
    let track = release.tracklist.iter().find(|track| {
        track.kind.as_deref().map_or(true, |kind| kind == "track") && fold(&track.title) == query.key.title_key
    })?;
    Some(RegistryMatch {
        artist: hit.artist,
        title: track.title.trim().to_string(),
        album: hit.album,
        release_year: hit.release_year,
        cover_art_ref: hit.cover_art_ref,
        score: hit.score,
    })
}

/// Discogs appends " (2)" style numbers to ambiguous artist names
fn strip_disambiguation(artist: &str) -> String {
    match artist.rsplit_once(" (") {
        Some((name, rest)) if rest.ends_with(')') && rest[..rest.len() - 1].chars().all(|c| c.is_ascii_digit()) => {
            name.to_string()
        }
        _ => artist.to_string(),
    }
}

#[async_trait]
impl Registry for DiscogsRegistry {
    fn name(&self) -> &str {
        "discogs"
    }

    async fn search(&self, query: &LookupQuery) -> Result<Vec<RegistryMatch>, RemoteError> {
        if query.title.trim().is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/database/search", self.base_url);
        debug!(artist = %query.artist, title = %query.title, "Querying Discogs");

        let body: DiscogsSearchResponse = self
            .get_json(
                &url,
                &[
                    ("type", "release"),
                    ("artist", query.artist.as_str()),
                    ("track", query.title.as_str()),
                    ("per_page", &SEARCH_LIMIT.to_string()),
                ],
            )
            .await?;

        // Ranked order: the first confirmed release is the answer
        for hit in parse_search_response(body, query) {
            let url = format!("{}/releases/{}", self.base_url, hit.release_id);
            let release: DiscogsRelease = match self.get_json(&url, &[]).await {
                Ok(release) => release,
                Err(RemoteError::Status(404)) => continue,
                Err(e) => return Err(e),
            };
            let release_id = hit.release_id;
            if let Some(matched) = confirm_track(hit, &release, query) {
                debug!(release_id, title = %matched.title, "Discogs track confirmed");
                return Ok(vec![matched]);
            }
            debug!(release_id, "Track not on Discogs release");
        }
        warn!(artist = %query.artist, title = %query.title, "No Discogs release confirms the track");
        Ok(Vec::new())
    }
}
