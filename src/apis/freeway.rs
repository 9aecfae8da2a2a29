use super::fields::coordinate_text;
use super::geo::TAIWAN;
use super::xml::{cctv_blocks, child_text};
use super::{fetch_body, outcome_of, FetchOutcome, ParseReport, SkipReason, SourceAdapter};
use crate::app::ports::HttpClientPort;
use crate::constants::{FREEWAY_CCTV_KEY, FREEWAY_CCTV_URL, FREEWAY_TYPE_LABEL, UNKNOWN_ID};
use crate::error::{ProxyError, Result};
use crate::types::{FreewayCamera, NormalizedRecord, SourceTag};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

const DEFAULT_ROAD_NAME: &str = "國道監視器";

/// National freeway CCTV feed (XML).
pub struct FreewayCctvAdapter {
    http: Arc<dyn HttpClientPort>,
    url: String,
}

impl FreewayCctvAdapter {
    pub fn new(http: Arc<dyn HttpClientPort>) -> Self {
        Self::with_url(http, FREEWAY_CCTV_URL)
    }

    pub fn with_url(http: Arc<dyn HttpClientPort>, url: &str) -> Self {
        Self {
            http,
            url: url.to_string(),
        }
    }

    pub fn parse(xml: &str) -> Result<ParseReport> {
        if !xml.contains("<CCTV>") && !xml.contains("<CCTVs") {
            return Err(ProxyError::malformed(FREEWAY_CCTV_KEY, "no <CCTV> blocks in body"));
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

        let road = child_text(block, "RoadName");
        let mile = child_text(block, "LocationMile");
        let direction = child_text(block, "RoadDirection");
        let description = child_text(block, "LocationDescription");

        Ok(NormalizedRecord::Freeway(FreewayCamera {
            id: child_text(block, "CCTVID").unwrap_or_else(|| UNKNOWN_ID.to_string()),
            name: display_name(road.as_deref(), direction.as_deref(), mile.as_deref(), description.as_deref()),
            url,
            lat,
            lon,
            road,
            mile,
            direction,
            description,
            road_type: FREEWAY_TYPE_LABEL.to_string(),
            source: SourceTag::Freeway,
        }))
    }
}

/// "國道1號 北向 15K (五股交流道)"; empty parts are left out.
fn display_name(
    road: Option<&str>,
    direction: Option<&str>,
    mile: Option<&str>,
    description: Option<&str>,
) -> String {
    let mut parts = vec![road.unwrap_or(DEFAULT_ROAD_NAME).to_string()];
    parts.extend(direction.map(str::to_string));
    parts.extend(mile.map(str::to_string));
    if let Some(desc) = description {
        if Some(desc) != road {
            parts.push(format!("({desc})"));
        }
    }
    parts.join(" ")
}

#[async_trait]
impl SourceAdapter for FreewayCctvAdapter {
    fn source_key(&self) -> &'static str {
        FREEWAY_CCTV_KEY
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::Freeway
    }

    #[instrument(skip(self), fields(source = FREEWAY_CCTV_KEY))]
    async fn fetch(&self) -> FetchOutcome {
        let resp = match fetch_body(self.http.as_ref(), FREEWAY_CCTV_KEY, &self.url).await {
            Ok(resp) => resp,
            Err(e) => return FetchOutcome::Failed(e),
        };
        let xml = String::from_utf8_lossy(&resp.bytes);
        let parsed = Self::parse(&xml);
        if let Ok(report) = &parsed {
            info!("Parsed {} freeway cameras", report.records.len());
        }
        outcome_of(FREEWAY_CCTV_KEY, parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::testing::StubHttp;

    fn block(id: &str, lat: &str, lon: &str, url: &str) -> String {
        format!(
            "<CCTV><CCTVID>{id}</CCTVID><VideoStreamURL>{url}</VideoStreamURL>\
             <PositionLat>{lat}</PositionLat><PositionLon>{lon}</PositionLon>\
             <RoadName>國道1號</RoadName><RoadDirection>N</RoadDirection>\
             <LocationMile>15K+200</LocationMile><LocationDescription>五股</LocationDescription></CCTV>"
        )
    }

    fn feed(blocks: &[String]) -> String {
        format!("<?xml version=\"1.0\"?><CCTVs>{}</CCTVs>", blocks.concat())
    }

    #[test]
    fn builds_readable_names() {
        assert_eq!(
            display_name(Some("國道1號"), Some("N"), Some("15K"), Some("五股")),
            "國道1號 N 15K (五股)"
        );
        assert_eq!(display_name(None, None, None, None), "國道監視器");
        assert_eq!(
            display_name(Some("國道3號"), None, None, Some("國道3號")),
            "國道3號"
        );
    }

    #[test]
    fn one_bad_block_does_not_sink_the_batch() {
        let mut blocks: Vec<String> = (0..10)
            .map(|i| block(&format!("CCTV-{i}"), "25.05", "121.45", "http://cam/x.jpg"))
            .collect();
        // record 3 loses its stream URL
        blocks[2] = blocks[2].replace("<VideoStreamURL>http://cam/x.jpg</VideoStreamURL>", "");

        let report = FreewayCctvAdapter::parse(&feed(&blocks)).unwrap();
        assert_eq!(report.records.len(), 9);
        assert_eq!(report.skipped, vec![SkipReason::MissingField("VideoStreamURL")]);
    }

    #[test]
    fn drops_records_outside_taiwan() {
        let blocks = vec![
            block("in", "24.1", "120.6", "http://cam/a"),
            block("out", "35.6", "139.7", "http://cam/b"),
        ];
        let report = FreewayCctvAdapter::parse(&feed(&blocks)).unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].id(), "in");
        assert_eq!(report.records[0].source_tag(), SourceTag::Freeway);
    }

    #[test]
    fn records_carry_the_road_class() {
        let report = FreewayCctvAdapter::parse(&feed(&[block("A", "25.0", "121.5", "http://cam/a")])).unwrap();
        let json = serde_json::to_value(&report.records[0]).unwrap();
        assert_eq!(json["type"], "國道");
    }

    #[test]
    fn missing_id_falls_back() {
        let xml = feed(&[block("", "24.1", "120.6", "http://cam/a")]);
        let report = FreewayCctvAdapter::parse(&xml).unwrap();
        assert_eq!(report.records[0].id(), UNKNOWN_ID);
    }

    #[test]
    fn body_without_cctv_blocks_is_malformed() {
        assert!(FreewayCctvAdapter::parse("{\"error\":\"quota\"}").is_err());
    }

    #[tokio::test]
    async fn fetch_returns_records() {
        let body = feed(&[block("A", "25.0", "121.5", "http://cam/a")]);
        let http = Arc::new(StubHttp::ok("application/xml", &body));
        let adapter = FreewayCctvAdapter::new(http.clone());
        match adapter.fetch().await {
            FetchOutcome::Records(records) => assert_eq!(records.len(), 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test]
    async fn all_invalid_records_is_empty_not_success() {
        let body = feed(&[block("A", "0", "0", "http://cam/a")]);
        let adapter = FreewayCctvAdapter::new(Arc::new(StubHttp::ok("text/xml", &body)));
        assert!(matches!(adapter.fetch().await, FetchOutcome::Empty { skipped: 1 }));
    }
}
