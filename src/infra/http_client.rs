use crate::app::ports::{HttpClientPort, HttpGetResult};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = concat!("road-camera-proxy/", env!("CARGO_PKG_VERSION"));

/// Outbound HTTP client shared by every adapter.
pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    async fn get(&self, url: &str) -> Result<HttpGetResult, String> {
        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                "upstream request timed out".to_string()
            } else {
                // reqwest errors embed the URL, which may carry an API key.
                e.without_url().to_string()
            }
        })?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| e.without_url().to_string())?
            .to_vec();
        Ok(HttpGetResult {
            status,
            bytes,
            content_type,
        })
    }
}
