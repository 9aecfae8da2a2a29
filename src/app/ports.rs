use crate::error::Result;
use crate::types::{CacheEntry, CameraViews, HistoryPoint, NormalizedRecord, WeatherSample, WeatherSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

// Upstream-side ports
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str) -> std::result::Result<HttpGetResult, String>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl HttpGetResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Error pages from government hosts come back as HTML, sometimes with a 200.
    pub fn looks_like_html(&self) -> bool {
        if self.content_type.to_ascii_lowercase().contains("text/html") {
            return true;
        }
        let head = String::from_utf8_lossy(&self.bytes[..self.bytes.len().min(256)]).to_ascii_lowercase();
        let head = head.trim_start_matches('\u{feff}').trim_start();
        head.starts_with("<!doctype html") || head.starts_with("<html")
    }
}

// Cache-side ports

/// One tier of the cache store. Writes replace the whole entry for a key.
#[async_trait]
pub trait CacheTier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;
    async fn put(&self, entry: &CacheEntry) -> Result<()>;

    /// Write `entry` only when the tier has nothing for its key or holds an
    /// older `written_at`. Returns whether the write happened.
    ///
    /// The default is a read followed by a write; tiers that can do the
    /// comparison atomically should override it.
    async fn put_if_newer(&self, entry: &CacheEntry) -> Result<bool> {
        match self.get(&entry.key).await? {
            Some(current) if current.written_at >= entry.written_at => Ok(false),
            _ => {
                self.put(entry).await?;
                Ok(true)
            }
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

// Collaborator: "most viewed camera" statistics
#[async_trait]
pub trait CounterStorePort: Send + Sync {
    async fn increment(&self, camera_id: &str) -> Result<i64>;
    async fn top_n(&self, limit: usize) -> Result<Vec<CameraViews>>;
}

// Collaborator: per-station weather history
#[async_trait]
pub trait HistoryStorePort: Send + Sync {
    /// Store one reading per sample at `at`; a second reading for the same
    /// station and instant is ignored. Returns rows written.
    async fn record(&self, at: DateTime<Utc>, samples: &[WeatherSample]) -> Result<usize>;
    /// Delete readings older than `before`. Returns rows removed.
    async fn prune(&self, before: DateTime<Utc>) -> Result<usize>;
    /// Every reading of one station, oldest first.
    async fn station_series(&self, station_id: &str) -> Result<Vec<HistoryPoint>>;
    /// Hourly averages across all stations since `since`, oldest first.
    async fn hourly_series(&self, since: DateTime<Utc>) -> Result<Vec<HistoryPoint>>;
    async fn summary(&self, since: DateTime<Utc>) -> Result<WeatherSummary>;
}

/// Told about every successful refresh, after the cache write.
#[async_trait]
pub trait RefreshObserver: Send + Sync {
    async fn on_refresh(&self, key: &str, written_at: DateTime<Utc>, records: &[NormalizedRecord]);
}
