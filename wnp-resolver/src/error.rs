//! Error types for wnp-resolver
//!
//! Pipeline failures (`ResolveError`) are recoverable and routed to fallback by
//! the coordinator. Remote call failures (`RemoteError`) are mapped into the
//! pipeline taxonomy by the component that made the call. Sink failures
//! (`SinkError`) stay inside the dispatcher. `ApiError` is the HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Pipeline error taxonomy
///
/// Clone so a single in-flight result can be shared with every waiter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    /// Watched target disappeared
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Corrupt or unsupported media container
    #[error("Unreadable media: {0}")]
    UnreadableMedia(String),

    /// Nothing left to look up after normalization
    #[error("Insufficient metadata for lookup")]
    InsufficientMetadata,

    /// Fingerprint identification failed (timeout, remote error, no key)
    #[error("Identification unavailable: {0}")]
    IdentificationUnavailable(String),

    /// Every registry failed or none matched
    #[error("Resolution failed: {0}")]
    ResolutionFailed(String),

    /// Superseded by a newer track event
    #[error("Cancelled")]
    Cancelled,
}

/// Failure of a single remote HTTP call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    #[error("request timed out")]
    Timeout,

    /// Service asked us to slow down
    #[error("rate limited by remote service")]
    RateLimited,

    #[error("HTTP {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    Parse(String),

    #[error("service error: {0}")]
    Service(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if e.is_decode() {
            RemoteError::Parse(e.to_string())
        } else if let Some(status) = e.status() {
            RemoteError::Status(status.as_u16())
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}

/// Sink delivery failure
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Template error: {0}")]
    Template(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        SinkError::Http(e.to_string())
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
