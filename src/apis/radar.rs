use super::geo::TAIWAN;
use super::{fetch_body, parse_json_body, redact, FetchOutcome, ParseReport, SkipReason, SourceAdapter};
use crate::app::ports::HttpClientPort;
use crate::constants::{CWA_FILE_API_BASE, RADAR_KEY};
use crate::error::{ProxyError, Result};
use crate::types::{NormalizedRecord, RadarImage, SourceTag};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

/// One radar product published through the CWA file API.
#[derive(Debug, Clone, Copy)]
pub struct RadarProduct {
    pub code: &'static str,
    pub name: &'static str,
    pub dataset: &'static str,
    pub lat: f64,
    pub lon: f64,
}

pub const RADAR_PRODUCTS: [RadarProduct; 5] = [
    RadarProduct { code: "001", name: "樹林雷達", dataset: "O-A0084-001", lat: 24.9703, lon: 121.4197 },
    RadarProduct { code: "002", name: "南屯雷達", dataset: "O-A0084-002", lat: 24.1348, lon: 120.6448 },
    RadarProduct { code: "003", name: "林園雷達", dataset: "O-A0084-003", lat: 22.4725, lon: 120.2847 },
    RadarProduct { code: "101", name: "雷達整合回波圖 - 臺灣(鄰近區域)", dataset: "O-A0058-003", lat: 23.8, lon: 120.9 },
    RadarProduct { code: "102", name: "雷達整合回波圖 - 臺灣(較大範圍)", dataset: "O-A0058-001", lat: 23.8, lon: 120.9 },
];

const IMAGE_EXTENSIONS: [&str; 3] = [".jpg", ".png", ".pdf"];
const PREFERRED_URL_KEYS: [&str; 3] = ["uri", "ProductURL", "web"];

/// Latest radar echo images, one record per product.
pub struct RadarAdapter {
    http: Arc<dyn HttpClientPort>,
    api_key: Option<String>,
    base_url: String,
}

impl RadarAdapter {
    pub fn new(http: Arc<dyn HttpClientPort>, api_key: Option<String>) -> Self {
        Self::with_base_url(http, api_key, CWA_FILE_API_BASE)
    }

    pub fn with_base_url(http: Arc<dyn HttpClientPort>, api_key: Option<String>, base_url: &str) -> Self {
        Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, dataset: &str, api_key: &str) -> String {
        format!(
            "{}/{}?Authorization={}&downloadType=WEB&format=JSON",
            self.base_url, dataset, api_key
        )
    }

    /// Turn one product document into a record.
    pub fn parse_product(product: &RadarProduct, root: &Value) -> std::result::Result<NormalizedRecord, SkipReason> {
        let url = find_image_url(root).ok_or(SkipReason::MissingField("image url"))?;
        let (lat, lon) = TAIWAN.check(product.lat, product.lon)?;
        Ok(NormalizedRecord::Radar(RadarImage {
            id: product.code.to_string(),
            name: product.name.to_string(),
            dataset: product.dataset.to_string(),
            url,
            lat,
            lon,
            time: observation_time(root),
            source: SourceTag::CwaRadar,
        }))
    }

    /// Fetch every product at once; results come back in product order.
    async fn fetch_products(&self, api_key: &str) -> Vec<(RadarProduct, Result<Value>)> {
        let mut set = JoinSet::new();
        for (idx, product) in RADAR_PRODUCTS.iter().copied().enumerate() {
            let http = self.http.clone();
            let url = self.url(product.dataset, api_key);
            set.spawn(async move {
                let doc = match fetch_body(http.as_ref(), RADAR_KEY, &url).await {
                    Ok(resp) => parse_json_body(RADAR_KEY, &resp),
                    Err(e) => Err(e),
                };
                (idx, product, doc)
            });
        }

        let mut results = Vec::with_capacity(RADAR_PRODUCTS.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "radar product task failed"),
            }
        }
        results.sort_by_key(|(idx, _, _)| *idx);
        results.into_iter().map(|(_, product, doc)| (product, doc)).collect()
    }
}

/// Depth-first search for the product image, in the order CWA documents use:
/// well-known link keys first, then any http string that names an image file.
pub fn find_image_url(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => items.iter().find_map(find_image_url),
        Value::Object(map) => {
            for key in PREFERRED_URL_KEYS {
                if let Some(Value::String(s)) = map.get(key) {
                    if s.starts_with("http") {
                        return Some(s.clone());
                    }
                }
            }
            for val in map.values() {
                match val {
                    Value::String(s)
                        if s.starts_with("http") && IMAGE_EXTENSIONS.iter().any(|ext| s.contains(ext)) =>
                    {
                        return Some(s.clone())
                    }
                    Value::Object(_) | Value::Array(_) => {
                        if let Some(found) = find_image_url(val) {
                            return Some(found);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        _ => None,
    }
}

pub fn observation_time(root: &Value) -> Option<String> {
    [
        "/cwaopendata/dataset/DateTime",
        "/cwaopendata/dataset/obsTime",
        "/cwaopendata/dataset/resource/published",
        "/cwaopendata/sent",
    ]
    .iter()
    .find_map(|p| root.pointer(p).and_then(|v| v.as_str()))
    .map(str::to_string)
}

#[async_trait]
impl SourceAdapter for RadarAdapter {
    fn source_key(&self) -> &'static str {
        RADAR_KEY
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::CwaRadar
    }

    #[instrument(skip(self), fields(source = RADAR_KEY))]
    async fn fetch(&self) -> FetchOutcome {
        let Some(api_key) = self.api_key.as_deref() else {
            return FetchOutcome::Failed(ProxyError::Configuration(
                "CWA_API_KEY is not set".to_string(),
            ));
        };

        let mut report = ParseReport::default();
        let mut last_error: Option<ProxyError> = None;
        for (product, doc) in self.fetch_products(api_key).await {
            match doc {
                Ok(root) => report.push(Self::parse_product(&product, &root)),
                Err(e) => {
                    warn!(
                        dataset = product.dataset,
                        url = %redact(&self.url(product.dataset, api_key)),
                        error = %e,
                        "radar product unavailable"
                    );
                    report.skipped.push(SkipReason::MissingField("radar product"));
                    last_error = Some(e);
                }
            }
        }

        // Every product failing at the transport level is an upstream outage, not an empty feed.
        if report.records.is_empty() && report.skipped.len() == RADAR_PRODUCTS.len() {
            if let Some(err) = last_error {
                return FetchOutcome::Failed(err);
            }
        }
        info!("Collected {} radar images", report.records.len());
        FetchOutcome::from_report(RADAR_KEY, report)
    }
}
