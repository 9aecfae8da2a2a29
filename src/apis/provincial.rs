use super::fields::coordinate_text;
use super::geo::TAIWAN;
use super::xml::{cctv_blocks, child_text};
use super::{fetch_body, outcome_of, FetchOutcome, ParseReport, SkipReason, SourceAdapter};
use crate::app::ports::HttpClientPort;
use crate::constants::{PROVINCIAL_CCTV_KEY, PROVINCIAL_CCTV_URL, PROVINCIAL_TYPE_LABEL, UNKNOWN_ID};
use crate::error::{ProxyError, Result};
use crate::types::{NormalizedRecord, ProvincialCamera, SourceTag};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

const DEFAULT_LOCATION_TYPE: &str = "省道監視器";

/// Provincial highway (THB) CCTV feed (XML).
pub struct ProvincialCctvAdapter {
    http: Arc<dyn HttpClientPort>,
    url: String,
}

impl ProvincialCctvAdapter {
    pub fn new(http: Arc<dyn HttpClientPort>) -> Self {
        Self::with_url(http, PROVINCIAL_CCTV_URL)
    }

    pub fn with_url(http: Arc<dyn HttpClientPort>, url: &str) -> Self {
        Self {
            http,
            url: url.to_string(),
        }
    }

    pub fn parse(xml: &str) -> Result<ParseReport> {
        if !xml.contains("<CCTV>") && !xml.contains("<CCTVs") {
            return Err(ProxyError::malformed(PROVINCIAL_CCTV_KEY, "no <CCTV> blocks in body"));
        }
        let mut report = ParseReport::default();
        for block in cctv_blocks(xml) {
            report.push(Self::parse_block(block));
        }
        Ok(report)
    }

    fn parse_block(block: &str) -> std::result::Result<NormalizedRecord, SkipReason> {
        let url = child_text(block, "VideoStreamURL").ok_or(SkipReason::MissingField("VideoStreamURL"))?;
        let lon = coordinate_text(child_text(block, "PositionLon").as_deref(), "PositionLon")?;
        let lat = coordinate_text(child_text(block, "PositionLat").as_deref(), "PositionLat")?;
        let (lat, lon) = TAIWAN.check(lat, lon)?;

        let id = child_text(block, "CCTVID").unwrap_or_else(|| UNKNOWN_ID.to_string());
        let location_type = child_text(block, "LocationType");
        let name = format!(
            "{} ({})",
            location_type.as_deref().unwrap_or(DEFAULT_LOCATION_TYPE),
            id
        );

        Ok(NormalizedRecord::Provincial(ProvincialCamera {
            id,
            name,
            url,
            lat,
            lon,
            direction: child_text(block, "RoadDirection"),
            road_type: PROVINCIAL_TYPE_LABEL.to_string(),
            source: SourceTag::Thb,
        }))
    }
}

#[async_trait]
impl SourceAdapter for ProvincialCctvAdapter {
    fn source_key(&self) -> &'static str {
        PROVINCIAL_CCTV_KEY
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::Thb
    }

    #[instrument(skip(self), fields(source = PROVINCIAL_CCTV_KEY))]
    async fn fetch(&self) -> FetchOutcome {
        let resp = match fetch_body(self.http.as_ref(), PROVINCIAL_CCTV_KEY, &self.url).await {
            Ok(resp) => resp,
            Err(e) => return FetchOutcome::Failed(e),
        };
        let xml = String::from_utf8_lossy(&resp.bytes);
        let parsed = Self::parse(&xml);
        if let Ok(report) = &parsed {
            info!("Parsed {} provincial cameras", report.records.len());
        }
        outcome_of(PROVINCIAL_CCTV_KEY, parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<CCTVs>
  <CCTV>
    <CCTVID>THB-001</CCTVID>
    <VideoStreamURL>https://cctv.thb.gov.tw/stream/1</VideoStreamURL>
    <PositionLat>23.97</PositionLat>
    <PositionLon>120.97</PositionLon>
    <LocationType>台14線</LocationType>
    <RoadDirection>E</RoadDirection>
  </CCTV>
  <CCTV>
    <CCTVID>THB-002</CCTVID>
    <VideoStreamURL>https://cctv.thb.gov.tw/stream/2</VideoStreamURL>
    <PositionLat>abc</PositionLat>
    <PositionLon>120.5</PositionLon>
  </CCTV>
  <CCTV>
    <CCTVID>THB-003</CCTVID>
    <VideoStreamURL>https://cctv.thb.gov.tw/stream/3</VideoStreamURL>
    <PositionLat>22.6</PositionLat>
    <PositionLon>120.3</PositionLon>
  </CCTV>
</CCTVs>"#;

    #[test]
    fn parses_valid_blocks_and_skips_bad_numbers() {
        let report = ProvincialCctvAdapter::parse(FEED).unwrap();
        assert_eq!(report.records.len(), 2);
        assert!(matches!(
            report.skipped[0],
            SkipReason::BadNumber { field: "PositionLat", .. }
        ));
    }

    #[test]
    fn names_use_location_type_or_default() {
        let report = ProvincialCctvAdapter::parse(FEED).unwrap();
        let names: Vec<String> = report
            .records
            .iter()
            .map(|r| match r {
                NormalizedRecord::Provincial(c) => c.name.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(names, vec!["台14線 (THB-001)", "省道監視器 (THB-003)"]);
    }

    #[test]
    fn records_carry_the_road_class() {
        let report = ProvincialCctvAdapter::parse(FEED).unwrap();
        for record in &report.records {
            assert_eq!(serde_json::to_value(record).unwrap()["type"], "省道");
        }
    }
}
