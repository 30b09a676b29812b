//! Timestamp and TTL utilities

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Whether an entry inserted at `inserted_at` with the given `ttl` has expired at `at`.
///
/// A zero TTL never expires. Timestamps in the future (clock skew) count as fresh.
pub fn is_expired(inserted_at: DateTime<Utc>, ttl: Duration, at: DateTime<Utc>) -> bool {
    if ttl.is_zero() {
        return false;
    }
    let age = at.signed_duration_since(inserted_at);
    match age.to_std() {
        Ok(age) => age >= ttl,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_boundary() {
        let inserted = Utc::now();
        let ttl = Duration::from_secs(60);

        assert!(!is_expired(inserted, ttl, inserted + chrono::Duration::seconds(59)));
        assert!(is_expired(inserted, ttl, inserted + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let inserted = Utc::now() - chrono::Duration::days(3650);
        assert!(!is_expired(inserted, Duration::ZERO, Utc::now()));
    }

    #[test]
    fn test_future_insert_counts_as_fresh() {
        let inserted = Utc::now() + chrono::Duration::seconds(30);
        assert!(!is_expired(inserted, Duration::from_secs(1), Utc::now()));
    }
}
