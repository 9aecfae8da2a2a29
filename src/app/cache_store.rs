//! Two-tier cache: a fast in-process tier in front of a durable one.
//!
//! Reads try the fast tier first and promote durable hits, never over a newer
//! entry. Writes go to both.
//! Every tier call is bounded by a timeout so a wedged tier degrades to a
//! cache miss instead of hanging the request.

use crate::app::ports::CacheTier;
use crate::error::{ProxyError, Result};
use crate::types::CacheEntry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_TIER_TIMEOUT: Duration = Duration::from_secs(2);

pub struct CacheStore {
    fast: Arc<dyn CacheTier>,
    durable: Option<Arc<dyn CacheTier>>,
    tier_timeout: Duration,
}

impl CacheStore {
    pub fn new(fast: Arc<dyn CacheTier>, durable: Option<Arc<dyn CacheTier>>) -> Self {
        Self {
            fast,
            durable,
            tier_timeout: DEFAULT_TIER_TIMEOUT,
        }
    }

    pub fn with_tier_timeout(mut self, tier_timeout: Duration) -> Self {
        self.tier_timeout = tier_timeout;
        self
    }

    /// Latest entry for `key`, or `None` when no tier has one.
    ///
    /// Only fails when every tier failed; a failing fast tier falls through
    /// to the durable one.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let fast_err = match self.bounded(self.fast.name(), self.fast.get(key)).await {
            Ok(Some(entry)) => return Ok(Some(entry)),
            Ok(None) => None,
            Err(e) => {
                warn!(tier = self.fast.name(), key, error = %e, "cache tier read failed");
                Some(e)
            }
        };

        let Some(durable) = &self.durable else {
            return fast_err.map_or(Ok(None), Err);
        };

        match self.bounded(durable.name(), durable.get(key)).await {
            Ok(Some(entry)) => Ok(Some(self.promote(entry).await)),
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(tier = durable.name(), key, error = %e, "cache tier read failed");
                Err(e)
            }
        }
    }

    /// Copy a durable hit into the fast tier unless a newer write landed
    /// there while the durable read was in flight; in that case the newer
    /// entry wins.
    async fn promote(&self, entry: CacheEntry) -> CacheEntry {
        match self.bounded(self.fast.name(), self.fast.put_if_newer(&entry)).await {
            Ok(true) => {
                debug!(key = %entry.key, "promoted durable cache entry");
                entry
            }
            Ok(false) => match self.bounded(self.fast.name(), self.fast.get(&entry.key)).await {
                Ok(Some(newer)) if newer.written_at > entry.written_at => newer,
                _ => entry,
            },
            Err(e) => {
                warn!(tier = self.fast.name(), key = %entry.key, error = %e, "cache promotion failed");
                entry
            }
        }
    }

    /// Write `entry` to every tier. Succeeds if at least one tier took it.
    pub async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let fast = self.bounded(self.fast.name(), self.fast.put(entry)).await;
        if let Err(e) = &fast {
            warn!(tier = self.fast.name(), key = %entry.key, error = %e, "cache tier write failed");
        }

        let Some(durable) = &self.durable else {
            return fast;
        };
        match self.bounded(durable.name(), durable.put(entry)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(tier = durable.name(), key = %entry.key, error = %e, "cache tier write failed");
                if fast.is_ok() {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn bounded<T>(&self, tier: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.tier_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(ProxyError::Timeout {
                operation: format!("cache tier {tier}"),
                millis: self.tier_timeout.as_millis() as u64,
            }),
        }
    }
}
