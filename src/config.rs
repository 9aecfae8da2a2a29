use crate::constants::{all_resources, Secret};
use crate::error::{ProxyError, Result};
use crate::gate::DEFAULT_ALLOWED_ORIGINS;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub access: AccessConfig,
    pub upstream: UpstreamConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8788,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub timeout_seconds: u64,
    pub cwa_api_key: Option<String>,
    pub moenv_api_key: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 15,
            cwa_api_key: None,
            moenv_api_key: None,
        }
    }
}

impl UpstreamConfig {
    pub fn secret(&self, secret: Secret) -> Option<&str> {
        match secret {
            Secret::Cwa => self.cwa_api_key.as_deref(),
            Secret::Moenv => self.moenv_api_key.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file for the durable cache tier and view counters.
    pub db_path: PathBuf,
    /// Upper bound on a single cache tier call.
    pub tier_timeout_ms: u64,
    /// Disable to run with the in-memory tier only.
    pub durable: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/proxy.db"),
            tier_timeout_ms: 2_000,
            durable: true,
        }
    }
}

impl Config {
    /// Load `path` if it exists (defaults otherwise), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                ProxyError::Configuration(format!(
                    "Failed to read config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            let config: Config = toml::from_str(&content)?;
            info!("Loaded configuration from {}", path.display());
            config
        } else {
            info!("No config file at {}, using defaults", path.display());
            Config::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Secrets and the whitelist can always be overridden from the environment.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| var(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(key) = non_empty("CWA_API_KEY") {
            self.upstream.cwa_api_key = Some(key);
        }
        if let Some(key) = non_empty("MOENV_API_KEY") {
            self.upstream.moenv_api_key = Some(key);
        }
        if let Some(origins) = non_empty("RCP_ALLOWED_ORIGINS") {
            self.access.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut missing_secrets = Vec::new();
        for policy in all_resources() {
            if !policy.respects_upstream_floor() {
                return Err(ProxyError::Configuration(format!(
                    "resource {} has ttl {:?} not above upstream minimum interval {:?}",
                    policy.key, policy.ttl, policy.upstream_min_interval
                )));
            }
            if let Some(secret) = policy.secret {
                if self.upstream.secret(secret).is_none() && !missing_secrets.contains(&secret) {
                    missing_secrets.push(secret);
                    warn!(resource = policy.key, "{:?} API key not configured; resources that need it will fail until it is set", secret);
                }
            }
        }
        if self.access.allowed_origins.is_empty() {
            return Err(ProxyError::Configuration(
                "access.allowed_origins is empty; every request would be rejected".to_string(),
            ));
        }
        if self.upstream.timeout_seconds == 0 {
            return Err(ProxyError::Configuration(
                "upstream.timeout_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
