use super::fields::{coordinate, number, text};
use super::geo::TAIWAN_SEAS;
use super::{fetch_body, outcome_of, parse_json_body, FetchOutcome, ParseReport, SkipReason, SourceAdapter};
use crate::app::ports::HttpClientPort;
use crate::constants::{CWA_DATASTORE_BASE, EARTHQUAKE_REPORT_LIMIT};
use crate::error::{ProxyError, Result};
use crate::types::{EarthquakeReport, NormalizedRecord, SourceTag};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument};

/// CWA earthquake reports (significant or minor felt earthquakes).
pub struct EarthquakeAdapter {
    http: Arc<dyn HttpClientPort>,
    api_key: Option<String>,
    key: &'static str,
    dataset: &'static str,
    base_url: String,
}

impl EarthquakeAdapter {
    pub fn new(
        http: Arc<dyn HttpClientPort>,
        api_key: Option<String>,
        key: &'static str,
        dataset: &'static str,
    ) -> Self {
        Self::with_base_url(http, api_key, key, dataset, CWA_DATASTORE_BASE)
    }

    pub fn with_base_url(
        http: Arc<dyn HttpClientPort>,
        api_key: Option<String>,
        key: &'static str,
        dataset: &'static str,
        base_url: &str,
    ) -> Self {
        Self {
            http,
            api_key,
            key,
            dataset,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, api_key: &str) -> String {
        format!(
            "{}/{}?Authorization={}&limit={}&format=JSON",
            self.base_url, self.dataset, api_key, EARTHQUAKE_REPORT_LIMIT
        )
    }

    /// Walk `records.Earthquake[]`.
    pub fn parse(source_key: &str, root: &Value) -> Result<ParseReport> {
        let quakes = root
            .pointer("/records/Earthquake")
            .and_then(|q| q.as_array())
            .ok_or_else(|| ProxyError::malformed(source_key, "missing records.Earthquake[]"))?;
        let mut report = ParseReport::default();
        for quake in quakes {
            report.push(Self::parse_report(quake));
        }
        Ok(report)
    }

    fn parse_report(quake: &Value) -> std::result::Result<NormalizedRecord, SkipReason> {
        let info = quake
            .get("EarthquakeInfo")
            .ok_or(SkipReason::MissingField("EarthquakeInfo"))?;
        let epicenter = info.get("Epicenter").ok_or(SkipReason::MissingField("Epicenter"))?;
        let lat = coordinate(epicenter.get("EpicenterLatitude"), "EpicenterLatitude")?;
        let lon = coordinate(epicenter.get("EpicenterLongitude"), "EpicenterLongitude")?;
        let (lat, lon) = TAIWAN_SEAS.check(lat, lon)?;

        let time = text(info, "OriginTime");
        let id = report_id(text(quake, "EarthquakeNo"), time.as_deref())
            .ok_or(SkipReason::MissingField("EarthquakeNo"))?;

        Ok(NormalizedRecord::Earthquake(EarthquakeReport {
            id,
            time,
            magnitude: number(info.pointer("/EarthquakeMagnitude/MagnitudeValue")),
            depth: number(info.get("FocalDepth")),
            location: text(epicenter, "Location"),
            lat,
            lon,
            report: text(quake, "ReportContent"),
            image_url: text(quake, "ReportImageURI"),
            web: text(quake, "Web"),
            source: SourceTag::Cwa,
        }))
    }
}

/// Numbered reports keep their number. Minor felt earthquakes all share a
/// number ending in `000`, so those are told apart by origin time.
fn report_id(number: Option<String>, origin_time: Option<&str>) -> Option<String> {
    match (number, origin_time) {
        (Some(n), Some(t)) if n.ends_with("000") => Some(format!("{n}@{t}")),
        (Some(n), _) => Some(n),
        (None, Some(t)) => Some(t.to_string()),
        (None, None) => None,
    }
}

#[async_trait]
impl SourceAdapter for EarthquakeAdapter {
    fn source_key(&self) -> &'static str {
        self.key
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::Cwa
    }

    #[instrument(skip(self), fields(source = self.key))]
    async fn fetch(&self) -> FetchOutcome {
        let Some(api_key) = self.api_key.as_deref() else {
            return FetchOutcome::Failed(ProxyError::Configuration(
                "CWA_API_KEY is not set".to_string(),
            ));
        };
        let resp = match fetch_body(self.http.as_ref(), self.key, &self.url(api_key)).await {
            Ok(resp) => resp,
            Err(e) => return FetchOutcome::Failed(e),
        };
        let parsed = parse_json_body(self.key, &resp).and_then(|root| Self::parse(self.key, &root));
        if let Ok(report) = &parsed {
            info!("Parsed {} earthquake reports", report.records.len());
        }
        outcome_of(self.key, parsed)
    }
}
