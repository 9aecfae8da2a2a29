//! One handler per upstream resource: consult the cache, apply the freshness
//! policy, and refresh through the adapter when needed.

use crate::apis::SourceAdapter;
use crate::app::cache_store::CacheStore;
use crate::app::freshness::{decide, FreshnessAction};
use crate::app::ports::{Clock, RefreshObserver};
use crate::constants::ResourcePolicy;
use crate::error::Result;
use crate::metrics::ProxyMetrics;
use crate::tasks::BackgroundTasks;
use crate::types::CacheEntry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// How a response was produced, reported to clients as `X-Cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Stale,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Stale => "STALE",
            CacheStatus::Miss => "MISS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Served {
    pub entry: CacheEntry,
    pub status: CacheStatus,
}

/// Holds the refresh flag; clearing happens on drop so a panicking refresh
/// cannot wedge the resource.
struct RefreshTicket(Arc<AtomicBool>);

impl RefreshTicket {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshTicket(flag.clone()))
    }
}

impl Drop for RefreshTicket {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ProxyHandler {
    policy: ResourcePolicy,
    adapter: Arc<dyn SourceAdapter>,
    store: Arc<CacheStore>,
    clock: Arc<dyn Clock>,
    tasks: BackgroundTasks,
    refreshing: Arc<AtomicBool>,
    miss_lock: Mutex<()>,
    observer: Option<Arc<dyn RefreshObserver>>,
}

impl ProxyHandler {
    pub fn new(
        policy: ResourcePolicy,
        adapter: Arc<dyn SourceAdapter>,
        store: Arc<CacheStore>,
        clock: Arc<dyn Clock>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            policy,
            adapter,
            store,
            clock,
            tasks,
            refreshing: Arc::new(AtomicBool::new(false)),
            miss_lock: Mutex::new(()),
            observer: None,
        }
    }

    /// Notify `observer` after every successful refresh.
    pub fn with_observer(mut self, observer: Arc<dyn RefreshObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn policy(&self) -> &ResourcePolicy {
        &self.policy
    }

    pub fn key(&self) -> &'static str {
        self.policy.key
    }

    /// Answer one request for this resource.
    ///
    /// Only a cache miss whose upstream fetch fails produces an error; a stale
    /// entry is always served even when the upstream is down.
    #[instrument(skip(self), fields(resource = self.policy.key))]
    pub async fn serve(&self) -> Result<Served> {
        let cached = self.read_cache().await;
        let action = decide(cached.as_ref(), self.policy.ttl, self.clock.now());
        match (action, cached) {
            (FreshnessAction::ServeFresh, Some(entry)) => {
                ProxyMetrics::record_cache_hit(self.key());
                Ok(Served {
                    entry,
                    status: CacheStatus::Hit,
                })
            }
            (FreshnessAction::ServeStaleAndRefresh, Some(entry)) => {
                ProxyMetrics::record_cache_stale(self.key());
                self.spawn_refresh();
                Ok(Served {
                    entry,
                    status: CacheStatus::Stale,
                })
            }
            _ => self.fetch_blocking().await,
        }
    }

    /// Fetch from upstream now and store the result, bypassing freshness.
    pub async fn refresh_now(&self) -> Result<CacheEntry> {
        refresh(
            self.adapter.as_ref(),
            &self.store,
            self.clock.as_ref(),
            self.observer.as_deref(),
        )
        .await
    }

    async fn read_cache(&self) -> Option<CacheEntry> {
        match self.store.get(self.key()).await {
            Ok(entry) => entry,
            Err(e) => {
                // An unreadable cache is treated as empty.
                warn!(resource = self.key(), error = %e, "cache read failed");
                None
            }
        }
    }

    async fn fetch_blocking(&self) -> Result<Served> {
        let _guard = self.miss_lock.lock().await;

        // A request that held the lock before us may have filled the cache.
        if let Some(entry) = self.read_cache().await {
            debug!(resource = self.key(), "cache filled while waiting");
            ProxyMetrics::record_refresh_coalesced(self.key());
            return Ok(Served {
                entry,
                status: CacheStatus::Hit,
            });
        }

        ProxyMetrics::record_cache_miss(self.key());
        match self.refresh_now().await {
            Ok(entry) => Ok(Served {
                entry,
                status: CacheStatus::Miss,
            }),
            Err(e) => {
                error!(resource = self.key(), kind = e.kind(), error = %e, "no cached data and upstream failed");
                Err(e)
            }
        }
    }

    fn spawn_refresh(&self) {
        let Some(ticket) = RefreshTicket::acquire(&self.refreshing) else {
            debug!(resource = self.key(), "refresh already in flight");
            ProxyMetrics::record_refresh_coalesced(self.key());
            return;
        };

        let adapter = self.adapter.clone();
        let store = self.store.clone();
        let clock = self.clock.clone();
        let ttl = self.policy.ttl;
        let observer = self.observer.clone();
        self.tasks.spawn(async move {
            let _ticket = ticket;
            // Another writer may have refreshed the key since the stale read.
            if let Ok(current) = store.get(adapter.source_key()).await {
                if decide(current.as_ref(), ttl, clock.now()) == FreshnessAction::ServeFresh {
                    debug!(resource = adapter.source_key(), "entry already fresh, skipping refresh");
                    return;
                }
            }
            // Failure leaves the stale entry in place for the next request.
            if let Err(e) = refresh(adapter.as_ref(), &store, clock.as_ref(), observer.as_deref()).await {
                warn!(
                    resource = adapter.source_key(),
                    kind = e.kind(),
                    error = %e,
                    "background refresh failed, keeping stale entry"
                );
            }
        });
    }
}

/// Fetch, serialize and store one resource. The cache is only written when
/// the adapter produced at least one record.
async fn refresh(
    adapter: &dyn SourceAdapter,
    store: &CacheStore,
    clock: &dyn Clock,
    observer: Option<&dyn RefreshObserver>,
) -> Result<CacheEntry> {
    let key = adapter.source_key();
    let records = match adapter.fetch().await.into_result(key) {
        Ok(records) => records,
        Err(e) => {
            ProxyMetrics::record_refresh_failure(key, e.kind());
            return Err(e);
        }
    };

    let payload = serde_json::to_string(&records)?;
    let entry = CacheEntry::new(key, payload, clock.now());
    if let Err(e) = store.put(&entry).await {
        // The fresh data is still good for this response.
        warn!(resource = key, error = %e, "could not store refreshed entry");
    }
    ProxyMetrics::record_refresh_success(key);
    info!(resource = key, records = records.len(), "cache refreshed");
    if let Some(observer) = observer {
        observer.on_refresh(key, entry.written_at, &records).await;
    }
    Ok(entry)
}
