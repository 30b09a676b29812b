//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Build metadata embedded by build.rs
#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub git_hash: &'static str,
    pub timestamp: &'static str,
    pub profile: &'static str,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub build: BuildInfo,
    pub uptime_seconds: u64,
    /// Sources with a current record
    pub sources_playing: usize,
    /// Connected SSE clients and other bus subscribers
    pub subscribers: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "wnp-resolver".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: BuildInfo {
            git_hash: env!("WNP_GIT_HASH"),
            timestamp: env!("WNP_BUILD_TIMESTAMP"),
            profile: env!("WNP_BUILD_PROFILE"),
        },
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        sources_playing: state.coordinator.current_records().await.len(),
        subscribers: state.event_bus.subscriber_count(),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
