use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which adapter produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceTag {
    #[serde(rename = "FREEWAY")]
    Freeway,
    #[serde(rename = "THB")]
    Thb,
    #[serde(rename = "WRA")]
    Wra,
    #[serde(rename = "MOENV")]
    Moenv,
    #[serde(rename = "CWA")]
    Cwa,
    #[serde(rename = "CWA_RADAR")]
    CwaRadar,
}

/// Freeway camera from the highway bureau CCTV feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreewayCamera {
    pub id: String,
    pub name: String,
    pub url: String,
    pub lat: f64,
    pub lon: f64,
    pub road: Option<String>,
    pub mile: Option<String>,
    pub direction: Option<String>,
    pub description: Option<String>,
    /// Road class label, always `國道`; the map groups markers by it.
    #[serde(rename = "type")]
    pub road_type: String,
    pub source: SourceTag,
}

/// Provincial-road camera from the THB feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvincialCamera {
    pub id: String,
    pub name: String,
    pub url: String,
    pub lat: f64,
    pub lon: f64,
    pub direction: Option<String>,
    #[serde(rename = "type")]
    pub road_type: String,
    pub source: SourceTag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Management {
    Direct,
    Local,
}

/// River-monitoring camera from the water agency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterCamera {
    pub id: String,
    pub name: String,
    pub city: Option<String>,
    pub river: Option<String>,
    pub url: String,
    pub lat: f64,
    pub lon: f64,
    pub time: Option<String>,
    /// Unknown unless the upstream says who operates the camera.
    pub management: Option<Management>,
    pub source: SourceTag,
}

/// Air-quality monitoring station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQualityStation {
    pub id: String,
    pub name: String,
    pub county: Option<String>,
    pub aqi: u32,
    pub status: Option<String>,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub lat: f64,
    pub lon: f64,
    pub time: Option<String>,
    pub source: SourceTag,
}

/// Manned weather-station observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherStation {
    pub id: String,
    pub name: String,
    pub city: Option<String>,
    pub town: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub temp: Option<f64>,
    pub humid: Option<f64>,
    pub pressure: Option<f64>,
    pub wind_speed: Option<f64>,
    /// Degrees; 990 means "variable" and is kept as-is.
    pub wind_dir: Option<f64>,
    pub rain: Option<f64>,
    pub uvi: Option<f64>,
    pub time: Option<String>,
    pub source: SourceTag,
}

/// Latest image of one radar product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarImage {
    pub id: String,
    pub name: String,
    pub dataset: String,
    pub url: String,
    pub lat: f64,
    pub lon: f64,
    pub time: Option<String>,
    pub source: SourceTag,
}

/// Earthquake report from the CWA seismology feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarthquakeReport {
    pub id: String,
    pub time: Option<String>,
    pub magnitude: Option<f64>,
    /// Focal depth in km.
    pub depth: Option<f64>,
    pub location: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub report: Option<String>,
    pub image_url: Option<String>,
    pub web: Option<String>,
    pub source: SourceTag,
}

/// Latest image of a CWA weather chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherChart {
    pub id: String,
    pub name: String,
    pub url: String,
    pub time: Option<String>,
    pub source: SourceTag,
}

/// A CWA datastore document kept whole: the `records` object as published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDocument {
    pub id: String,
    pub name: String,
    pub records: serde_json::Value,
    pub source: SourceTag,
}

/// Uniform record type every adapter returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NormalizedRecord {
    Freeway(FreewayCamera),
    Provincial(ProvincialCamera),
    Water(WaterCamera),
    AirQuality(AirQualityStation),
    Weather(WeatherStation),
    Radar(RadarImage),
    Earthquake(EarthquakeReport),
    Chart(WeatherChart),
    Document(DatasetDocument),
}

impl NormalizedRecord {
    pub fn id(&self) -> &str {
        match self {
            NormalizedRecord::Freeway(r) => &r.id,
            NormalizedRecord::Provincial(r) => &r.id,
            NormalizedRecord::Water(r) => &r.id,
            NormalizedRecord::AirQuality(r) => &r.id,
            NormalizedRecord::Weather(r) => &r.id,
            NormalizedRecord::Radar(r) => &r.id,
            NormalizedRecord::Earthquake(r) => &r.id,
            NormalizedRecord::Chart(r) => &r.id,
            NormalizedRecord::Document(r) => &r.id,
        }
    }

    pub fn source_tag(&self) -> SourceTag {
        match self {
            NormalizedRecord::Freeway(r) => r.source,
            NormalizedRecord::Provincial(r) => r.source,
            NormalizedRecord::Water(r) => r.source,
            NormalizedRecord::AirQuality(r) => r.source,
            NormalizedRecord::Weather(r) => r.source,
            NormalizedRecord::Radar(r) => r.source,
            NormalizedRecord::Earthquake(r) => r.source,
            NormalizedRecord::Chart(r) => r.source,
            NormalizedRecord::Document(r) => r.source,
        }
    }
}

/// One cached resource: the last successfully normalized payload for a key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    /// Serialized `Vec<NormalizedRecord>` (JSON array text). Shared, never mutated.
    pub payload: Arc<str>,
    pub written_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: &str, payload: impl Into<Arc<str>>, written_at: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            payload: payload.into(),
            written_at,
        }
    }
}

/// Origin information the access gate looks at. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub origin: Option<String>,
    pub referer: Option<String>,
    pub method: String,
    pub resource_key: String,
}

/// Row from the view counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraViews {
    pub camera_id: String,
    pub views: i64,
    pub last_updated: DateTime<Utc>,
}

/// One station reading kept in the weather history table.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSample {
    pub station_id: String,
    pub station_name: String,
    pub temperature: Option<f64>,
    pub wind_speed: Option<f64>,
    pub rain: Option<f64>,
    pub humidity: Option<f64>,
}

/// Point of a history series: one station's reading, or an hourly average
/// across stations. `timestamp` is unix millis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub timestamp: i64,
    pub temperature: Option<f64>,
    pub rain: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
}

/// Island-wide figures over the recent window. Missing aggregates are 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherSummary {
    pub station_count: i64,
    pub avg_temp: f64,
    pub max_temp: f64,
    pub min_temp: f64,
    pub raining_stations: i64,
    pub max_rainfall: f64,
    /// Stations that reported no usable temperature.
    pub abnormal_count: i64,
}
