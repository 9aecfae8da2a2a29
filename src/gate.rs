//! Origin whitelist in front of every data endpoint.

use crate::error::ProxyError;
use crate::metrics::ProxyMetrics;
use crate::types::RequestContext;
use tracing::{debug, warn};

pub const DEFAULT_ALLOWED_ORIGINS: [&str; 6] = [
    "https://road-camera.pages.dev",
    "https://www.road-camera.pages.dev",
    "http://127.0.0.1:8788",
    "http://localhost:8788",
    "http://localhost:3000",
    "http://127.0.0.1:3000",
];

pub const CORS_ALLOW_METHODS: &str = "GET, OPTIONS";
pub const CORS_ALLOW_HEADERS: &str = "Content-Type";
pub const CORS_MAX_AGE: &str = "3600";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// `cors_origin` is set only when the browser sent a whitelisted `Origin`.
    Allowed { cors_origin: Option<String> },
    Rejected,
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed { .. })
    }

    /// CORS headers for this decision; empty unless an exact origin matched.
    pub fn cors_headers(&self) -> Vec<(&'static str, String)> {
        self.cors_headers_with_methods(CORS_ALLOW_METHODS)
    }

    pub fn cors_headers_with_methods(&self, methods: &str) -> Vec<(&'static str, String)> {
        match self {
            GateDecision::Allowed {
                cors_origin: Some(origin),
            } => vec![
                ("access-control-allow-origin", origin.clone()),
                ("access-control-allow-methods", methods.to_string()),
                ("access-control-allow-headers", CORS_ALLOW_HEADERS.to_string()),
                ("access-control-max-age", CORS_MAX_AGE.to_string()),
                ("vary", "Origin".to_string()),
            ],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccessGate {
    allowed: Vec<String>,
}

impl Default for AccessGate {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_ORIGINS.iter().map(|s| s.to_string()))
    }
}

impl AccessGate {
    pub fn new(origins: impl IntoIterator<Item = String>) -> Self {
        let allowed = origins
            .into_iter()
            .map(|o| o.trim().trim_end_matches('/').to_string())
            .filter(|o| !o.is_empty())
            .collect();
        Self { allowed }
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed
    }

    /// `Origin` must match a whitelist entry exactly. Only when the header is
    /// absent does `Referer` get a prefix match, and the prefix must end at a
    /// path boundary so `https://road-camera.pages.dev.evil.example` fails.
    pub fn check(&self, ctx: &RequestContext) -> GateDecision {
        let origin = ctx.origin.as_deref().map(str::trim).filter(|o| !o.is_empty());
        let decision = match origin {
            Some(origin) if self.allowed.iter().any(|a| a == origin) => GateDecision::Allowed {
                cors_origin: Some(origin.to_string()),
            },
            Some(_) => GateDecision::Rejected,
            None => match ctx.referer.as_deref() {
                Some(referer) if self.referer_matches(referer) => {
                    GateDecision::Allowed { cors_origin: None }
                }
                _ => GateDecision::Rejected,
            },
        };

        match &decision {
            GateDecision::Allowed { .. } => {
                debug!(resource = %ctx.resource_key, origin = ?ctx.origin, "request passed access gate")
            }
            GateDecision::Rejected => {
                ProxyMetrics::record_gate_rejected();
                warn!(
                    resource = %ctx.resource_key,
                    method = %ctx.method,
                    origin = ?ctx.origin,
                    referer = ?ctx.referer,
                    "rejected request from unauthorized origin"
                );
            }
        }
        decision
    }

    /// Same as [`check`](Self::check) but as a `Result`, for `?` call sites.
    pub fn authorize(&self, ctx: &RequestContext) -> Result<GateDecision, ProxyError> {
        match self.check(ctx) {
            GateDecision::Rejected => Err(ProxyError::AccessDenied {
                origin: ctx.origin.clone(),
                referer: ctx.referer.clone(),
            }),
            allowed => Ok(allowed),
        }
    }

    fn referer_matches(&self, referer: &str) -> bool {
        self.allowed.iter().any(|allowed| {
            referer
                .strip_prefix(allowed.as_str())
                .map(|rest| rest.is_empty() || rest.starts_with(['/', '?', '#']))
                .unwrap_or(false)
        })
    }
}
