//! Source adapters: one per upstream feed.
//!
//! Each adapter makes one outbound call, parses the body, and returns a
//! [`FetchOutcome`]. Record-level problems are absorbed here (the record is
//! dropped and logged); only whole-call failures leave the adapter.

pub mod air_quality;
pub mod cwa_dataset;
pub mod earthquake;
pub mod freeway;
pub mod geo;
pub mod provincial;
pub mod radar;
pub mod sentinel;
pub mod water;
pub mod weather;
pub mod xml;

use crate::app::ports::{HttpClientPort, HttpGetResult};
use crate::config::UpstreamConfig;
use crate::constants::{
    dataset_by_id, Secret, AIR_QUALITY_KEY, EARTHQUAKE_MINOR_DATASET, EARTHQUAKE_MINOR_KEY,
    EARTHQUAKE_SIGNIFICANT_DATASET, EARTHQUAKE_SIGNIFICANT_KEY, FREEWAY_CCTV_KEY, PROVINCIAL_CCTV_KEY,
    RADAR_KEY, WATER_CCTV_KEY, WEATHER_STATIONS_KEY,
};
use crate::error::{ProxyError, Result};
use crate::metrics::ProxyMetrics;
use crate::types::{NormalizedRecord, SourceTag};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Why a single record was dropped during normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    MissingField(&'static str),
    BadNumber { field: &'static str, value: String },
    OutOfEnvelope { lat: f64, lon: f64 },
    NoMeasurement(&'static str),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingField(field) => write!(f, "missing field {field}"),
            SkipReason::BadNumber { field, value } => {
                write!(f, "field {field} is not a number: {value:?}")
            }
            SkipReason::OutOfEnvelope { lat, lon } => {
                write!(f, "coordinates ({lat}, {lon}) outside envelope")
            }
            SkipReason::NoMeasurement(field) => write!(f, "no {field} reading"),
        }
    }
}

/// Records that survived normalization plus what was dropped on the way.
#[derive(Debug, Default)]
pub struct ParseReport {
    pub records: Vec<NormalizedRecord>,
    pub skipped: Vec<SkipReason>,
}

impl ParseReport {
    pub fn push(&mut self, item: std::result::Result<NormalizedRecord, SkipReason>) {
        match item {
            Ok(record) => self.records.push(record),
            Err(reason) => self.skipped.push(reason),
        }
    }
}

/// Result of one adapter call.
///
/// `Empty` is its own case: a parse that kept zero records must not replace a
/// good cache entry, so callers treat it as a failure.
#[derive(Debug)]
pub enum FetchOutcome {
    Records(Vec<NormalizedRecord>),
    Empty { skipped: usize },
    Failed(ProxyError),
}

impl FetchOutcome {
    pub fn from_report(source_key: &str, report: ParseReport) -> Self {
        if !report.skipped.is_empty() {
            warn!(
                source = source_key,
                kept = report.records.len(),
                dropped = report.skipped.len(),
                "dropped malformed records"
            );
            ProxyMetrics::record_dropped(source_key, report.skipped.len());
        }
        if report.records.is_empty() {
            FetchOutcome::Empty {
                skipped: report.skipped.len(),
            }
        } else {
            FetchOutcome::Records(report.records)
        }
    }

    pub fn into_result(self, source_key: &str) -> Result<Vec<NormalizedRecord>> {
        match self {
            FetchOutcome::Records(records) => Ok(records),
            FetchOutcome::Empty { skipped } => Err(ProxyError::malformed(
                source_key,
                format!("no valid records after parsing ({skipped} dropped)"),
            )),
            FetchOutcome::Failed(err) => Err(err),
        }
    }
}

/// Adapter plumbing: a whole-body parse error becomes `Failed`, otherwise the
/// report decides between `Records` and `Empty`.
pub fn outcome_of(source_key: &str, parsed: Result<ParseReport>) -> FetchOutcome {
    match parsed {
        Ok(report) => FetchOutcome::from_report(source_key, report),
        Err(err) => FetchOutcome::Failed(err),
    }
}

/// Core trait every upstream adapter implements.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Cache key this adapter fills.
    fn source_key(&self) -> &'static str;

    fn source_tag(&self) -> SourceTag;

    /// Fetch and normalize the upstream once.
    async fn fetch(&self) -> FetchOutcome;
}

/// Adapter filling the cache key `key`, or `None` for an unknown key.
pub fn build_adapter(
    key: &str,
    http: Arc<dyn HttpClientPort>,
    upstream: &UpstreamConfig,
) -> Option<Arc<dyn SourceAdapter>> {
    let cwa = upstream.secret(Secret::Cwa).map(str::to_string);
    let moenv = upstream.secret(Secret::Moenv).map(str::to_string);
    let adapter: Arc<dyn SourceAdapter> = match key {
        FREEWAY_CCTV_KEY => Arc::new(freeway::FreewayCctvAdapter::new(http)),
        PROVINCIAL_CCTV_KEY => Arc::new(provincial::ProvincialCctvAdapter::new(http)),
        WEATHER_STATIONS_KEY => Arc::new(weather::WeatherStationsAdapter::new(http, cwa)),
        WATER_CCTV_KEY => Arc::new(water::WaterCctvAdapter::new(http)),
        AIR_QUALITY_KEY => Arc::new(air_quality::AirQualityAdapter::new(http, moenv)),
        RADAR_KEY => Arc::new(radar::RadarAdapter::new(http, cwa)),
        EARTHQUAKE_SIGNIFICANT_KEY => Arc::new(earthquake::EarthquakeAdapter::new(
            http,
            cwa,
            EARTHQUAKE_SIGNIFICANT_KEY,
            EARTHQUAKE_SIGNIFICANT_DATASET,
        )),
        EARTHQUAKE_MINOR_KEY => Arc::new(earthquake::EarthquakeAdapter::new(
            http,
            cwa,
            EARTHQUAKE_MINOR_KEY,
            EARTHQUAKE_MINOR_DATASET,
        )),
        other => Arc::new(cwa_dataset::CwaDatasetAdapter::new(http, cwa, dataset_by_id(other)?)),
    };
    Some(adapter)
}

/// GET `url`, rejecting transport errors, non-2xx replies and HTML error pages.
pub async fn fetch_body(
    http: &dyn HttpClientPort,
    source_key: &str,
    url: &str,
) -> Result<HttpGetResult> {
    let started = Instant::now();
    let result = http.get(url).await;
    ProxyMetrics::record_fetch_duration(source_key, started.elapsed().as_secs_f64());

    let resp = result.map_err(|e| ProxyError::unavailable(source_key, e))?;
    if !resp.is_success() {
        return Err(ProxyError::UpstreamUnavailable {
            source_key: source_key.to_string(),
            message: format!("upstream answered HTTP {}", resp.status),
            status: Some(resp.status),
        });
    }
    if resp.looks_like_html() {
        return Err(ProxyError::malformed(
            source_key,
            "upstream returned an HTML page instead of data",
        ));
    }
    debug!(
        source = source_key,
        url = %redact(url),
        bytes = resp.bytes.len(),
        "upstream body received"
    );
    Ok(resp)
}

/// Decode a JSON body, turning anything that is not JSON into a typed error.
pub fn parse_json_body(source_key: &str, resp: &HttpGetResult) -> Result<Value> {
    let text = String::from_utf8_lossy(&resp.bytes);
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with('<') {
        return Err(ProxyError::malformed(source_key, "expected JSON, got markup"));
    }
    serde_json::from_str(trimmed)
        .map_err(|e| ProxyError::malformed(source_key, format!("invalid JSON: {e}")))
}

/// URL without its query string, safe to log when the query carries a key.
pub fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Shared field helpers for JSON adapters.
pub(crate) mod fields {
    use super::SkipReason;
    use serde_json::Value;

    /// Non-empty string at `key` (numbers are rendered as text).
    pub fn text(obj: &Value, key: &str) -> Option<String> {
        match obj.get(key)? {
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    None
                } else {
                    Some(s.to_string())
                }
            }
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// First non-empty string among `keys`.
    pub fn first_text(obj: &Value, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| text(obj, k))
    }

    /// Optional number, given either as a JSON number or numeric text.
    pub fn number(value: Option<&Value>) -> Option<f64> {
        match value? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|f| f.is_finite())
    }

    /// Required coordinate: present and numeric.
    pub fn coordinate(value: Option<&Value>, field: &'static str) -> Result<f64, SkipReason> {
        let value = value.ok_or(SkipReason::MissingField(field))?;
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) if s.trim().is_empty() => {
                return Err(SkipReason::MissingField(field))
            }
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Null => return Err(SkipReason::MissingField(field)),
            _ => None,
        };
        parsed
            .filter(|f| f.is_finite())
            .ok_or_else(|| SkipReason::BadNumber {
                field,
                value: value.to_string(),
            })
    }

    /// Coordinate parsed from XML text.
    pub fn coordinate_text(value: Option<&str>, field: &'static str) -> Result<f64, SkipReason> {
        let raw = value.ok_or(SkipReason::MissingField(field))?;
        raw.trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .ok_or_else(|| SkipReason::BadNumber {
                field,
                value: raw.to_string(),
            })
    }
}
