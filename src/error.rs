use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("upstream {source_key} unavailable: {message}")]
    UpstreamUnavailable {
        source_key: String,
        message: String,
        status: Option<u16>,
    },

    #[error("upstream {source_key} returned unusable data: {message}")]
    UpstreamMalformed { source_key: String, message: String },

    #[error("access denied for origin {origin:?} / referer {referer:?}")]
    AccessDenied {
        origin: Option<String>,
        referer: Option<String>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("cache storage error: {0}")]
    Storage(String),

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    pub fn unavailable(source_key: &str, message: impl Into<String>) -> Self {
        ProxyError::UpstreamUnavailable {
            source_key: source_key.to_string(),
            message: message.into(),
            status: None,
        }
    }

    pub fn malformed(source_key: &str, message: impl Into<String>) -> Self {
        ProxyError::UpstreamMalformed {
            source_key: source_key.to_string(),
            message: message.into(),
        }
    }

    /// HTTP status used when this error reaches a client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamUnavailable { .. }
            | ProxyError::UpstreamMalformed { .. }
            | ProxyError::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            ProxyError::Configuration(_)
            | ProxyError::Storage(_)
            | ProxyError::Json(_)
            | ProxyError::Toml(_)
            | ProxyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-friendly label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::UpstreamUnavailable { .. } => "upstream_unavailable",
            ProxyError::UpstreamMalformed { .. } => "upstream_malformed",
            ProxyError::AccessDenied { .. } => "access_denied",
            ProxyError::Configuration(_) => "configuration",
            ProxyError::Storage(_) => "storage",
            ProxyError::Timeout { .. } => "timeout",
            ProxyError::Json(_) => "json",
            ProxyError::Toml(_) => "toml",
            ProxyError::Io(_) => "io",
        }
    }

    /// Upstream HTTP status, when the failure came from a non-2xx reply.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            ProxyError::UpstreamUnavailable { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for ProxyError {
    fn from(err: rusqlite::Error) -> Self {
        ProxyError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
