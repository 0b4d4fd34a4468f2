pub mod error;
pub mod http;

#[cfg(test)]
pub mod fake;

pub use error::*;
pub use http::*;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::control::ControlCommand;
use crate::types::{SettingsPatch, Trade};

/// The four backend calls the console makes, plus a health probe.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Flat `key -> value` mapping of every runtime setting.
    async fn fetch_settings(&self) -> Result<Map<String, Value>, ApiError>;
    /// Partial update; `seq` is the monotonic edit sequence number.
    async fn update_settings(&self, patch: SettingsPatch, seq: u64) -> Result<(), ApiError>;
    async fn fetch_recent_trades(&self, limit: usize) -> Result<Vec<Trade>, ApiError>;
    async fn send_command(&self, command: ControlCommand) -> Result<(), ApiError>;
    async fn health(&self) -> Result<(), ApiError>;
}
