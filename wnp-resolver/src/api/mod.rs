//! HTTP API for overlays and monitoring
//!
//! - `GET /health`
//! - `GET /now-playing`, `GET /now-playing/:source_id`
//! - `GET /events` (SSE)

pub mod health;
pub mod now_playing;
pub mod sse;

pub use health::health_routes;
pub use now_playing::now_playing_routes;
pub use sse::event_stream;
