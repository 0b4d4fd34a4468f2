use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{ApiError, BackendApi};
use crate::config::{ConsoleConfig, SETTINGS_SCHEMA_VERSION};
use crate::control::ControlCommand;
use crate::types::{parse_trades, SettingsPatch, Trade};

const SCHEMA_HEADER: &str = "X-Settings-Schema";
const EDIT_SEQ_HEADER: &str = "X-Edit-Seq";
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Deserialize)]
struct RecentTradesResponse {
    #[serde(default)]
    trades: Vec<Value>,
}

/// `reqwest` client for the bot's REST API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Option<String>,
    settings_path: String,
    schema_version: u32,
}

impl HttpBackend {
    pub fn new(
        base_url: Option<&str>,
        settings_path: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: base_url
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
            settings_path: settings_path.to_string(),
            schema_version: SETTINGS_SCHEMA_VERSION,
        })
    }

    pub fn from_config(config: &ConsoleConfig) -> Result<Self, reqwest::Error> {
        Self::new(
            config.backend_url(),
            &config.settings_path,
            config.request_timeout(),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    fn endpoint(&self, path: &str) -> Result<String, ApiError> {
        let base = self.base_url.as_deref().ok_or(ApiError::NotConfigured)?;
        Ok(format!("{}{}", base, path))
    }

    async fn execute(&self, path: &str, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(path, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn fetch_settings(&self) -> Result<Map<String, Value>, ApiError> {
        let path = self.settings_path.as_str();
        let request = self
            .client
            .get(self.endpoint(path)?)
            .header(SCHEMA_HEADER, self.schema_version.to_string());

        let response = self.execute(path, request).await?;
        let settings = response
            .json::<Map<String, Value>>()
            .await
            .map_err(|e| ApiError::from_reqwest(path, e))?;

        debug!(count = settings.len(), "Fetched settings");
        Ok(settings)
    }

    async fn update_settings(&self, patch: SettingsPatch, seq: u64) -> Result<(), ApiError> {
        let path = self.settings_path.as_str();
        let request = self
            .client
            .put(self.endpoint(path)?)
            .header(SCHEMA_HEADER, self.schema_version.to_string())
            .header(EDIT_SEQ_HEADER, seq.to_string())
            .json(&patch);

        self.execute(path, request).await?;
        debug!(seq, keys = ?patch.keys().collect::<Vec<_>>(), "Settings update sent");
        Ok(())
    }

    async fn fetch_recent_trades(&self, limit: usize) -> Result<Vec<Trade>, ApiError> {
        let path = "/trades/recent";
        let request = self
            .client
            .get(self.endpoint(path)?)
            .query(&[("limit", limit)]);

        let response = self.execute(path, request).await?;
        let body = response
            .json::<RecentTradesResponse>()
            .await
            .map_err(|e| ApiError::from_reqwest(path, e))?;

        Ok(parse_trades(body.trades))
    }

    async fn send_command(&self, command: ControlCommand) -> Result<(), ApiError> {
        let path = command.path();
        let key = Uuid::new_v4();
        let request = self
            .client
            .post(self.endpoint(path)?)
            .header(IDEMPOTENCY_HEADER, key.to_string());

        self.execute(path, request).await?;
        debug!(command = %command, idempotency_key = %key, "Control command delivered");
        Ok(())
    }

    async fn health(&self) -> Result<(), ApiError> {
        let path = "/status";
        let request = self.client.get(self.endpoint(path)?);
        self.execute(path, request).await?;
        Ok(())
    }
}
