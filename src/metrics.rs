//! Proxy metrics
//!
//! Thin facade over the `metrics` macros so call sites stay one line, plus the
//! Prometheus recorder that backs `GET /metrics`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::{info, warn};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub const CACHE_HIT: &str = "rcp_cache_hit_total";
pub const CACHE_STALE: &str = "rcp_cache_stale_total";
pub const CACHE_MISS: &str = "rcp_cache_miss_total";
pub const REFRESH_SUCCESS: &str = "rcp_refresh_success_total";
pub const REFRESH_FAILURE: &str = "rcp_refresh_failure_total";
pub const REFRESH_COALESCED: &str = "rcp_refresh_coalesced_total";
pub const GATE_REJECTED: &str = "rcp_gate_rejected_total";
pub const RECORDS_DROPPED: &str = "rcp_records_dropped_total";
pub const UPSTREAM_FETCH_SECONDS: &str = "rcp_upstream_fetch_duration_seconds";

/// Install the global Prometheus recorder. Idempotent.
pub fn init_metrics() {
    if HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = HANDLE.set(handle);
            info!("Prometheus recorder installed");
        }
        Err(e) => warn!("Failed to install Prometheus recorder: {}", e),
    }
}

/// Prometheus text exposition, empty when no recorder is installed.
pub fn render() -> String {
    HANDLE.get().map(|h| h.render()).unwrap_or_default()
}

pub struct ProxyMetrics;

impl ProxyMetrics {
    pub fn record_cache_hit(key: &str) {
        ::metrics::counter!(CACHE_HIT, "resource" => key.to_string()).increment(1);
    }

    pub fn record_cache_stale(key: &str) {
        ::metrics::counter!(CACHE_STALE, "resource" => key.to_string()).increment(1);
    }

    pub fn record_cache_miss(key: &str) {
        ::metrics::counter!(CACHE_MISS, "resource" => key.to_string()).increment(1);
    }

    pub fn record_refresh_success(key: &str) {
        ::metrics::counter!(REFRESH_SUCCESS, "resource" => key.to_string()).increment(1);
    }

    pub fn record_refresh_failure(key: &str, kind: &'static str) {
        ::metrics::counter!(REFRESH_FAILURE, "resource" => key.to_string(), "kind" => kind).increment(1);
    }

    pub fn record_refresh_coalesced(key: &str) {
        ::metrics::counter!(REFRESH_COALESCED, "resource" => key.to_string()).increment(1);
    }

    pub fn record_gate_rejected() {
        ::metrics::counter!(GATE_REJECTED).increment(1);
    }

    pub fn record_dropped(key: &str, count: usize) {
        ::metrics::counter!(RECORDS_DROPPED, "resource" => key.to_string()).increment(count as u64);
    }

    pub fn record_fetch_duration(key: &str, secs: f64) {
        ::metrics::histogram!(UPSTREAM_FETCH_SECONDS, "resource" => key.to_string()).record(secs);
    }
}
