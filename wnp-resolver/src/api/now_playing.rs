//! Current now-playing records

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use tracing::warn;
use wnp_common::events::NowPlayingInfo;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// GET /now-playing
///
/// Current record of every source that has one, ordered by source id.
pub async fn list_now_playing(State(state): State<AppState>) -> Json<Vec<NowPlayingInfo>> {
    let records = state.coordinator.current_records().await;
    Json(records.iter().map(|r| r.to_now_playing()).collect())
}

/// GET /now-playing/:source_id
pub async fn get_now_playing(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> ApiResult<Json<NowPlayingInfo>> {
    state
        .coordinator
        .current(&source_id)
        .await
        .map(|record| Json(record.to_now_playing()))
        .ok_or_else(|| ApiError::NotFound(format!("Nothing playing on source '{}'", source_id)))
}

/// GET /now-playing/:source_id/cover
///
/// Serves the cover art from the local image cache. While the image is not
/// cached yet the client is redirected to the remote URL.
pub async fn get_cover(State(state): State<AppState>, Path(source_id): Path<String>) -> ApiResult<Response> {
    let record = state
        .coordinator
        .current(&source_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Nothing playing on source '{}'", source_id)))?;
    let url = record
        .cover_art_ref
        .as_deref()
        .ok_or_else(|| ApiError::NotFound(format!("No cover art for source '{}'", source_id)))?;

    if let Some(cache) = &state.image_cache {
        match cache.get(url).await {
            Ok(Some(image)) => return Ok(([(header::CONTENT_TYPE, image.content_type)], image.data).into_response()),
            Ok(None) => {}
            Err(e) => warn!(url, "Image cache read failed: {}", e),
        }
    }
    Ok(Redirect::temporary(url).into_response())
}

pub fn now_playing_routes() -> Router<AppState> {
    Router::new()
        .route("/now-playing", get(list_now_playing))
        .route("/now-playing/:source_id", get(get_now_playing))
        .route("/now-playing/:source_id/cover", get(get_cover))
}
