//! Shared plumbing for remote services: HTTP client construction and
//! process-wide rate limiting.

use crate::error::RemoteError;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use once_cell::sync::OnceCell;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

const PRODUCT: &str = concat!("wnp-resolver/", env!("CARGO_PKG_VERSION"));

/// Contact for the User-Agent, set once at startup from `[remote].contact`
static CONTACT: OnceCell<String> = OnceCell::new();

/// Record the operator's contact; only the first call takes effect
pub fn set_contact(contact: &str) -> bool {
    CONTACT.set(contact.trim().to_string()).is_ok()
}

/// `product/version ( contact )` as MusicBrainz asks for
pub fn format_user_agent(contact: Option<&str>) -> String {
    match contact.map(str::trim).filter(|c| !c.is_empty()) {
        Some(contact) => format!("{} ( {} )", PRODUCT, contact),
        None => PRODUCT.to_string(),
    }
}

/// User-Agent sent to every remote service
pub fn user_agent() -> String {
    format_user_agent(CONTACT.get().map(String::as_str))
}

/// Token-bucket limiter shared by every caller of one service
pub type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Limiter allowing `per_second` requests per second (minimum 1)
pub fn rate_limiter(per_second: u32) -> Arc<DirectRateLimiter> {
    let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_second(rate)))
}

/// HTTP client with the shared user agent and a bounded timeout
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, RemoteError> {
    reqwest::Client::builder()
        .user_agent(user_agent())
        .timeout(timeout)
        .build()
        .map_err(|e| RemoteError::Network(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_rate_limiter_spaces_calls() {
        let limiter = rate_limiter(2);
        let start = Instant::now();

        // Burst capacity equals the per-second rate; the third call waits
        for _ in 0..3 {
            limiter.until_ready().await;
        }

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(400), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_user_agent_contact() {
        assert_eq!(
            format_user_agent(Some("mailto:ops@example.org")),
            format!("wnp-resolver/{} ( mailto:ops@example.org )", env!("CARGO_PKG_VERSION"))
        );
        assert_eq!(format_user_agent(Some("  ")), format!("wnp-resolver/{}", env!("CARGO_PKG_VERSION")));
        assert_eq!(format_user_agent(None), format!("wnp-resolver/{}", env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_zero_rate_is_clamped() {
        let limiter = rate_limiter(0);
        assert!(limiter.check().is_ok());
    }

    #[test]
    fn test_client_builds() {
        assert!(http_client(Duration::from_secs(1)).is_ok());
    }
}
