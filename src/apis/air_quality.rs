use super::fields::{coordinate, text};
use super::geo::TAIWAN;
use super::sentinel::MOENV_READING;
use super::{fetch_body, outcome_of, parse_json_body, FetchOutcome, ParseReport, SkipReason, SourceAdapter};
use crate::app::ports::HttpClientPort;
use crate::constants::{AIR_QUALITY_KEY, AIR_QUALITY_URL, UNKNOWN_ID};
use crate::error::{ProxyError, Result};
use crate::types::{AirQualityStation, NormalizedRecord, SourceTag};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument};

/// MOENV real-time AQI (`aqx_p_432`).
pub struct AirQualityAdapter {
    http: Arc<dyn HttpClientPort>,
    api_key: Option<String>,
    url: String,
}

impl AirQualityAdapter {
    pub fn new(http: Arc<dyn HttpClientPort>, api_key: Option<String>) -> Self {
        Self::with_url(http, api_key, AIR_QUALITY_URL)
    }

    pub fn with_url(http: Arc<dyn HttpClientPort>, api_key: Option<String>, url: &str) -> Self {
        Self {
            http,
            api_key,
            url: url.to_string(),
        }
    }

    pub fn parse(root: &Value) -> Result<ParseReport> {
        let records = root
            .get("records")
            .and_then(|r| r.as_array())
            .ok_or_else(|| ProxyError::malformed(AIR_QUALITY_KEY, "missing records[]"))?;
        let mut report = ParseReport::default();
        for item in records {
            report.push(Self::parse_item(item));
        }
        Ok(report)
    }

    fn parse_item(item: &Value) -> std::result::Result<NormalizedRecord, SkipReason> {
        // Stations under maintenance publish no AQI; they are not useful on the map.
        let aqi = item
            .get("AQI")
            .and_then(|v| MOENV_READING.translate(v))
            .filter(|v| *v >= 0.0)
            .ok_or(SkipReason::NoMeasurement("AQI"))?;
        let lat = coordinate(item.get("Latitude"), "Latitude")?;
        let lon = coordinate(item.get("Longitude"), "Longitude")?;
        let (lat, lon) = TAIWAN.check(lat, lon)?;

        let name = text(item, "SiteName").unwrap_or_else(|| UNKNOWN_ID.to_string());
        Ok(NormalizedRecord::AirQuality(AirQualityStation {
            id: text(item, "SiteId").unwrap_or_else(|| name.clone()),
            name,
            county: text(item, "County"),
            aqi: aqi.round() as u32,
            status: text(item, "Status"),
            pm25: item.get("PM2.5").and_then(|v| MOENV_READING.translate(v)),
            pm10: item.get("PM10").and_then(|v| MOENV_READING.translate(v)),
            lat,
            lon,
            time: text(item, "PublishTime"),
            source: SourceTag::Moenv,
        }))
    }
}

#[async_trait]
impl SourceAdapter for AirQualityAdapter {
    fn source_key(&self) -> &'static str {
        AIR_QUALITY_KEY
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::Moenv
    }

    #[instrument(skip(self), fields(source = AIR_QUALITY_KEY))]
    async fn fetch(&self) -> FetchOutcome {
        let Some(api_key) = self.api_key.as_deref() else {
            return FetchOutcome::Failed(ProxyError::Configuration(
                "MOENV_API_KEY is not set".to_string(),
            ));
        };
        let url = format!("{}&api_key={}", self.url, api_key);
        let resp = match fetch_body(self.http.as_ref(), AIR_QUALITY_KEY, &url).await {
            Ok(resp) => resp,
            Err(e) => return FetchOutcome::Failed(e),
        };
        let parsed = parse_json_body(AIR_QUALITY_KEY, &resp).and_then(|root| Self::parse(&root));
        if let Ok(report) = &parsed {
            info!("Parsed {} air-quality stations", report.records.len());
        }
        outcome_of(AIR_QUALITY_KEY, parsed)
    }
}
