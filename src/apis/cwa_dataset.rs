//! Generic CWA dataset cache behind `/api/weather?dataset=`.
//!
//! Datastore documents are kept whole (their `records` object). File-API
//! charts are reduced to the image link and observation time, which is all a
//! client needs to show them.

use super::radar::{find_image_url, observation_time};
use super::{fetch_body, outcome_of, parse_json_body, FetchOutcome, ParseReport, SkipReason, SourceAdapter};
use crate::app::ports::HttpClientPort;
use crate::constants::{CwaDataset, DatasetKind, CWA_DATASTORE_BASE, CWA_FILE_API_BASE};
use crate::error::{ProxyError, Result};
use crate::types::{DatasetDocument, NormalizedRecord, SourceTag, WeatherChart};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct CwaDatasetAdapter {
    http: Arc<dyn HttpClientPort>,
    api_key: Option<String>,
    dataset: CwaDataset,
    datastore_base: String,
    file_api_base: String,
}

impl CwaDatasetAdapter {
    pub fn new(http: Arc<dyn HttpClientPort>, api_key: Option<String>, dataset: CwaDataset) -> Self {
        Self::with_base_urls(http, api_key, dataset, CWA_DATASTORE_BASE, CWA_FILE_API_BASE)
    }

    pub fn with_base_urls(
        http: Arc<dyn HttpClientPort>,
        api_key: Option<String>,
        dataset: CwaDataset,
        datastore_base: &str,
        file_api_base: &str,
    ) -> Self {
        Self {
            http,
            api_key,
            dataset,
            datastore_base: datastore_base.trim_end_matches('/').to_string(),
            file_api_base: file_api_base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, api_key: &str) -> String {
        match self.dataset.kind {
            DatasetKind::Document => format!(
                "{}/{}?Authorization={}&format=JSON",
                self.datastore_base, self.dataset.id, api_key
            ),
            DatasetKind::Chart => format!(
                "{}/{}?Authorization={}&downloadType=WEB&format=JSON",
                self.file_api_base, self.dataset.id, api_key
            ),
        }
    }

    pub fn parse(dataset: &CwaDataset, root: &Value) -> Result<ParseReport> {
        let mut report = ParseReport::default();
        match dataset.kind {
            DatasetKind::Document => {
                if root.get("success").and_then(|v| v.as_str()) == Some("false") {
                    return Err(ProxyError::malformed(dataset.id, "datastore answered success=false"));
                }
                let records = root
                    .get("records")
                    .ok_or_else(|| ProxyError::malformed(dataset.id, "missing records"))?;
                report.push(Self::document(dataset, records));
            }
            DatasetKind::Chart => report.push(Self::chart(dataset, root)),
        }
        Ok(report)
    }

    fn document(dataset: &CwaDataset, records: &Value) -> std::result::Result<NormalizedRecord, SkipReason> {
        if is_empty_document(records) {
            return Err(SkipReason::NoMeasurement("records"));
        }
        Ok(NormalizedRecord::Document(DatasetDocument {
            id: dataset.id.to_string(),
            name: dataset.name.to_string(),
            records: records.clone(),
            source: SourceTag::Cwa,
        }))
    }

    fn chart(dataset: &CwaDataset, root: &Value) -> std::result::Result<NormalizedRecord, SkipReason> {
        let url = find_image_url(root).ok_or(SkipReason::MissingField("image url"))?;
        Ok(NormalizedRecord::Chart(WeatherChart {
            id: dataset.id.to_string(),
            name: dataset.name.to_string(),
            url,
            time: observation_time(root),
            source: SourceTag::Cwa,
        }))
    }
}

/// `records` with nothing in it: null, `{}`, `[]`, or an object whose lists are all empty.
fn is_empty_document(records: &Value) -> bool {
    match records {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.values().all(|v| match v {
            Value::Array(items) => items.is_empty(),
            Value::Null => true,
            _ => false,
        }),
        _ => false,
    }
}

#[async_trait]
impl SourceAdapter for CwaDatasetAdapter {
    fn source_key(&self) -> &'static str {
        self.dataset.id
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::Cwa
    }

    #[instrument(skip(self), fields(source = self.dataset.id))]
    async fn fetch(&self) -> FetchOutcome {
        let key = self.dataset.id;
        let Some(api_key) = self.api_key.as_deref() else {
            return FetchOutcome::Failed(ProxyError::Configuration(
                "CWA_API_KEY is not set".to_string(),
            ));
        };
        let resp = match fetch_body(self.http.as_ref(), key, &self.url(api_key)).await {
            Ok(resp) => resp,
            Err(e) => return FetchOutcome::Failed(e),
        };
        let parsed = parse_json_body(key, &resp).and_then(|root| Self::parse(&self.dataset, &root));
        if let Ok(report) = &parsed {
            info!(kind = ?self.dataset.kind, "Parsed CWA dataset, {} record(s)", report.records.len());
        }
        outcome_of(key, parsed)
    }
}
