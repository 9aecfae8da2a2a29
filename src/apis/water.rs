use super::fields::{coordinate, first_text, text};
use super::geo::TAIWAN;
use super::{fetch_body, outcome_of, parse_json_body, FetchOutcome, ParseReport, SkipReason, SourceAdapter};
use crate::app::ports::HttpClientPort;
use crate::constants::{UNKNOWN_ID, WATER_CCTV_KEY, WATER_CCTV_URL};
use crate::error::{ProxyError, Result};
use crate::types::{Management, NormalizedRecord, SourceTag, WaterCamera};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument};

// The WRA dataset has been published under two field naming schemes.
const ID_FIELDS: &[&str] = &["StationNo", "cameraid"];
const NAME_FIELDS: &[&str] = &["StationName", "cameraname", "videosurveillancestationname"];
const CITY_FIELDS: &[&str] = &["CityName", "countiesandcitieswherethemonitoringpointsarelocated"];
const RIVER_FIELDS: &[&str] = &["RiverName", "basinname", "tributary"];
const IMAGE_FIELDS: &[&str] = &["MonitorImageURL", "imageurl"];
const LAT_FIELDS: &[&str] = &["Latitude", "latitude_4326"];
const LON_FIELDS: &[&str] = &["Longitude", "longitude_4326"];

/// Water agency river-monitoring cameras (JSON array).
pub struct WaterCctvAdapter {
    http: Arc<dyn HttpClientPort>,
    url: String,
}

impl WaterCctvAdapter {
    pub fn new(http: Arc<dyn HttpClientPort>) -> Self {
        Self::with_url(http, WATER_CCTV_URL)
    }

    pub fn with_url(http: Arc<dyn HttpClientPort>, url: &str) -> Self {
        Self {
            http,
            url: url.to_string(),
        }
    }

    pub fn parse(root: &Value) -> Result<ParseReport> {
        let items = root
            .as_array()
            .ok_or_else(|| ProxyError::malformed(WATER_CCTV_KEY, "expected a JSON array of cameras"))?;
        let mut report = ParseReport::default();
        for item in items {
            report.push(Self::parse_item(item));
        }
        Ok(report)
    }

    fn parse_item(item: &Value) -> std::result::Result<NormalizedRecord, SkipReason> {
        let url = first_text(item, IMAGE_FIELDS).ok_or(SkipReason::MissingField("MonitorImageURL"))?;
        let lat = coordinate(first_present(item, LAT_FIELDS), "Latitude")?;
        let lon = coordinate(first_present(item, LON_FIELDS), "Longitude")?;
        let (lat, lon) = TAIWAN.check(lat, lon)?;

        Ok(NormalizedRecord::Water(WaterCamera {
            id: first_text(item, ID_FIELDS).unwrap_or_else(|| UNKNOWN_ID.to_string()),
            name: first_text(item, NAME_FIELDS).unwrap_or_else(|| UNKNOWN_ID.to_string()),
            city: first_text(item, CITY_FIELDS),
            river: first_text(item, RIVER_FIELDS),
            url,
            lat,
            lon,
            time: text(item, "RecTime"),
            management: management(item),
            source: SourceTag::Wra,
        }))
    }
}

fn first_present<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| item.get(*k).filter(|v| !v.is_null()))
}

/// Who operates the camera, when the record says so. Unknown stays `None`.
fn management(item: &Value) -> Option<Management> {
    if let Some(kind) = text(item, "managementType") {
        return Some(if kind == "水利署" || kind.eq_ignore_ascii_case("direct") {
            Management::Direct
        } else {
            Management::Local
        });
    }
    text(item, "manager").map(|m| {
        if m.contains("水利署") {
            Management::Direct
        } else {
            Management::Local
        }
    })
}

#[async_trait]
impl SourceAdapter for WaterCctvAdapter {
    fn source_key(&self) -> &'static str {
        WATER_CCTV_KEY
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::Wra
    }

    #[instrument(skip(self), fields(source = WATER_CCTV_KEY))]
    async fn fetch(&self) -> FetchOutcome {
        let resp = match fetch_body(self.http.as_ref(), WATER_CCTV_KEY, &self.url).await {
            Ok(resp) => resp,
            Err(e) => return FetchOutcome::Failed(e),
        };
        let parsed = parse_json_body(WATER_CCTV_KEY, &resp).and_then(|root| Self::parse(&root));
        if let Ok(report) = &parsed {
            info!("Parsed {} water cameras", report.records.len());
        }
        outcome_of(WATER_CCTV_KEY, parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cameras(report: &ParseReport) -> Vec<&WaterCamera> {
        report
            .records
            .iter()
            .map(|r| match r {
                NormalizedRecord::Water(w) => w,
                _ => panic!("wrong record type"),
            })
            .collect()
    }

    #[test]
    fn parses_v2_field_names() {
        let root = json!([{
            "StationNo": "WRA-01",
            "StationName": "中正橋",
            "CityName": "臺北市",
            "RiverName": "新店溪",
            "MonitorImageURL": "https://fhy.wra.gov.tw/cam/01.jpg",
            "Latitude": "25.01",
            "Longitude": "121.50",
            "RecTime": "2025-11-22T10:00:00"
        }]);
        let report = WaterCctvAdapter::parse(&root).unwrap();
        let cam = cameras(&report)[0];
        assert_eq!(cam.id, "WRA-01");
        assert_eq!(cam.river.as_deref(), Some("新店溪"));
        assert_eq!(cam.management, None);
    }

    #[test]
    fn parses_legacy_field_names_and_management() {
        let root = json!([{
            "cameraid": "C9",
            "cameraname": "大漢溪",
            "basinname": "淡水河",
            "imageurl": "https://cam/9.jpg",
            "latitude_4326": 24.9,
            "longitude_4326": 121.3,
            "manager": "經濟部水利署第十河川分署"
        }]);
        let report = WaterCctvAdapter::parse(&root).unwrap();
        let cam = cameras(&report)[0];
        assert_eq!(cam.id, "C9");
        assert_eq!(cam.management, Some(Management::Direct));
    }

    #[test]
    fn skips_cameras_without_image_or_coordinates() {
        let root = json!([
            {"StationNo": "A", "MonitorImageURL": "", "Latitude": 25.0, "Longitude": 121.0},
            {"StationNo": "B", "MonitorImageURL": "https://cam/b.jpg", "Latitude": null, "Longitude": 121.0},
            {"StationNo": "C", "MonitorImageURL": "https://cam/c.jpg", "Latitude": 25.0, "Longitude": 121.0}
        ]);
        let report = WaterCctvAdapter::parse(&root).unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.skipped.len(), 2);
    }

    #[test]
    fn object_root_is_malformed() {
        assert!(WaterCctvAdapter::parse(&json!({"message": "rate limited"})).is_err());
    }
}
