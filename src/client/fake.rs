//! In-memory backend for tests that need timing control: requests that
//! hang until released, or scripted trade pages.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::{ApiError, BackendApi};
use crate::control::ControlCommand;
use crate::types::{parse_trades, SettingsPatch, Trade};

pub fn trade(id: u64, realized_pl: f64) -> Trade {
    parse_trades(vec![json!({
        "trade_id": id,
        "instrument": "EUR_USD",
        "open_time": "2024-03-01T10:00:00Z",
        "close_time": "2024-03-01T11:00:00Z",
        "open_price": 1.085,
        "close_price": 1.0875,
        "units": 1000,
        "realized_pl": realized_pl,
        "state": "CLOSED",
    })])
    .remove(0)
}

pub fn trades(ids: std::ops::RangeInclusive<u64>) -> Vec<Trade> {
    ids.map(|id| trade(id, 1.0)).collect()
}

fn failure(path: &str) -> ApiError {
    ApiError::Status {
        path: path.to_string(),
        status: 500,
    }
}

#[derive(Default)]
pub struct FakeBackend {
    settings: Option<Map<String, Value>>,
    fail_updates: AtomicBool,
    updates: Mutex<Vec<(SettingsPatch, u64)>>,
    /// `None` entries fail; an empty queue answers with no trades.
    trade_pages: Mutex<VecDeque<Option<Vec<Trade>>>>,
    trade_delay: Option<Duration>,
    trade_fetches: AtomicUsize,
    commands: Mutex<Vec<ControlCommand>>,
    command_gate: Option<Semaphore>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings.as_object().cloned();
        self
    }

    pub fn failing_updates(self) -> Self {
        self.fail_updates.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_trade_pages(self, pages: Vec<Option<Vec<Trade>>>) -> Self {
        *self.trade_pages.lock().unwrap() = pages.into();
        self
    }

    pub fn with_trade_delay(mut self, delay: Duration) -> Self {
        self.trade_delay = Some(delay);
        self
    }

    /// Commands block until `release_commands` hands out permits.
    pub fn with_gated_commands(mut self) -> Self {
        self.command_gate = Some(Semaphore::new(0));
        self
    }

    pub fn release_commands(&self, n: usize) {
        if let Some(gate) = &self.command_gate {
            gate.add_permits(n);
        }
    }

    pub fn updates(&self) -> Vec<(SettingsPatch, u64)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn trade_fetches(&self) -> usize {
        self.trade_fetches.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<ControlCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn fetch_settings(&self) -> Result<Map<String, Value>, ApiError> {
        self.settings.clone().ok_or_else(|| failure("/settings"))
    }

    async fn update_settings(&self, patch: SettingsPatch, seq: u64) -> Result<(), ApiError> {
        self.updates.lock().unwrap().push((patch, seq));
        if self.fail_updates.load(Ordering::SeqCst) {
            Err(failure("/settings"))
        } else {
            Ok(())
        }
    }

    async fn fetch_recent_trades(&self, _limit: usize) -> Result<Vec<Trade>, ApiError> {
        self.trade_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.trade_delay {
            tokio::time::sleep(delay).await;
        }
        let page = self.trade_pages.lock().unwrap().pop_front();
        match page {
            Some(Some(trades)) => Ok(trades),
            Some(None) => Err(failure("/trades/recent")),
            None => Ok(Vec::new()),
        }
    }

    async fn send_command(&self, command: ControlCommand) -> Result<(), ApiError> {
        self.commands.lock().unwrap().push(command);
        if let Some(gate) = &self.command_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        Ok(())
    }

    async fn health(&self) -> Result<(), ApiError> {
        Ok(())
    }
}
