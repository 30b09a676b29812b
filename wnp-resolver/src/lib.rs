//! wnp-resolver library interface
//!
//! Resolution pipeline for "what's now playing": source watchers feed track
//! events to the coordinator, which extracts tags, fingerprints when needed,
//! normalizes, looks the track up in metadata registries and publishes the
//! result to every configured sink.

pub mod api;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod extractors;
pub mod fingerprint;
pub mod image_cache;
pub mod normalizer;
pub mod registry;
pub mod remote;
pub mod sinks;
pub mod types;
pub mod watcher;

pub use crate::coordinator::{Coordinator, PipelineComponents};
pub use crate::error::{ApiError, ApiResult, ResolveError};

use crate::image_cache::ImageCache;
use axum::Router;
use chrono::{DateTime, Utc};
use wnp_common::events::EventBus;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub event_bus: EventBus,
    /// Source of current now-playing records
    pub coordinator: Coordinator,
    /// Locally cached cover art, when enabled
    pub image_cache: Option<ImageCache>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(event_bus: EventBus, coordinator: Coordinator) -> Self {
        Self {
            event_bus,
            coordinator,
            image_cache: None,
            startup_time: Utc::now(),
        }
    }

    pub fn with_image_cache(mut self, image_cache: ImageCache) -> Self {
        self.image_cache = Some(image_cache);
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::health_routes())
        .merge(api::now_playing_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
}
