use anyhow::{anyhow, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::catalog::{CatalogError, SettingsCatalog};

/// Process-wide console settings: where the backend lives and how hard to
/// poll it. Assembled once at startup and passed down explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Backend base URL. Absent means every backend call fails closed.
    pub api_url: Option<String>,
    pub port: u16,
    pub poll_interval_ms: u64,
    pub trade_limit: usize,
    pub max_backoff_ms: u64,
    /// 0 disables the per-request timeout.
    pub request_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub settings_path: String,
    pub catalog_path: Option<String>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            port: 3000,
            poll_interval_ms: 5_000,
            trade_limit: 100,
            max_backoff_ms: 60_000,
            request_timeout_secs: 15,
            command_timeout_secs: 15,
            settings_path: "/settings".to_string(),
            catalog_path: None,
        }
    }
}

impl ConsoleConfig {
    /// Layers `.env`, the optional TOML file at `path` and `PIPHAWK_*`
    /// environment variables over the defaults.
    pub fn load(path: &str) -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(file) => debug!("Loaded environment from {}", file.display()),
            Err(e) if e.not_found() => {}
            Err(e) => warn!("Ignoring unreadable .env file: {}", e),
        }

        let config: ConsoleConfig = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("PIPHAWK").try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate().map_err(|errors| anyhow!(errors.join(", ")))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Some(url) = self.backend_url() {
            match reqwest::Url::parse(url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                Ok(parsed) => errors.push(format!("api_url scheme must be http or https, got {}", parsed.scheme())),
                Err(e) => errors.push(format!("api_url is not a valid URL: {}", e)),
            }
        }
        if self.poll_interval_ms == 0 {
            errors.push("poll_interval_ms must be > 0".to_string());
        }
        if self.trade_limit == 0 {
            errors.push("trade_limit must be > 0".to_string());
        }
        if self.max_backoff_ms < self.poll_interval_ms {
            errors.push("max_backoff_ms must be >= poll_interval_ms".to_string());
        }
        if !self.settings_path.starts_with('/') {
            errors.push("settings_path must start with '/'".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Trimmed base URL without a trailing slash, or `None` when unset.
    pub fn backend_url(&self) -> Option<&str> {
        self.api_url
            .as_deref()
            .map(|url| url.trim().trim_end_matches('/'))
            .filter(|url| !url.is_empty())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }

    pub fn catalog(&self) -> Result<SettingsCatalog, CatalogError> {
        match &self.catalog_path {
            Some(path) => SettingsCatalog::load(path),
            None => Ok(SettingsCatalog::builtin()),
        }
    }
}
