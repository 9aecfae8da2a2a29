use crate::types::CacheEntry;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// What a request should do given the cache entry it found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessAction {
    /// Entry is younger than the TTL.
    ServeFresh,
    /// Entry exists but is older than the TTL: answer with it, refresh behind the response.
    ServeStaleAndRefresh,
    /// Nothing cached: the request has to wait for the upstream.
    FetchBlocking,
}

/// Age of an entry at `now`. Entries stamped in the future (clock skew) count as brand new.
pub fn age_of(entry: &CacheEntry, now: DateTime<Utc>) -> Duration {
    (now - entry.written_at).to_std().unwrap_or(Duration::ZERO)
}

pub fn decide(entry: Option<&CacheEntry>, ttl: Duration, now: DateTime<Utc>) -> FreshnessAction {
    match entry {
        None => FreshnessAction::FetchBlocking,
        Some(entry) if age_of(entry, now) < ttl => FreshnessAction::ServeFresh,
        Some(_) => FreshnessAction::ServeStaleAndRefresh,
    }
}
