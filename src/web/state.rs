use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::client::BackendApi;
use crate::config::SettingsCatalog;
use crate::control::ControlPanel;
use crate::settings::SettingsStore;
use crate::telemetry::{PollerConfig, TradeInspector, TradePoller};
use crate::types::{Trade, TradeFeed};

/// Trades table plus the inspector opened from it. Lives as long as the
/// dashboard is mounted; the poller runs for exactly that span.
pub struct DashboardView {
    poller: Mutex<TradePoller>,
    feed: Arc<RwLock<TradeFeed>>,
    inspector: RwLock<TradeInspector>,
}

impl DashboardView {
    pub fn mount(api: Arc<dyn BackendApi>, config: PollerConfig) -> Self {
        let poller = TradePoller::activate(api, config);
        let feed = poller.feed_handle();
        Self {
            poller: Mutex::new(poller),
            feed,
            inspector: RwLock::new(TradeInspector::new()),
        }
    }

    pub async fn feed(&self) -> TradeFeed {
        self.feed.read().await.clone()
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.poller.lock().await.consecutive_failures()
    }

    pub async fn is_polling(&self) -> bool {
        self.poller.lock().await.is_active()
    }

    /// Selects from the feed as it stands right now.
    pub async fn select(&self, raw_id: &str) -> Option<Trade> {
        let feed = self.feed.read().await;
        self.inspector.write().await.select(&feed, raw_id).cloned()
    }

    pub async fn inspector(&self) -> TradeInspector {
        self.inspector.read().await.clone()
    }

    pub async fn close_inspector(&self) {
        self.inspector.write().await.close();
    }

    pub async fn unmount(&self) {
        self.poller.lock().await.deactivate().await;
    }
}

/// Combined application state for the console server
#[derive(Clone)]
pub struct AppState {
    pub api: Arc<dyn BackendApi>,
    pub catalog: Arc<SettingsCatalog>,
    pub settings: Arc<RwLock<SettingsStore>>,
    pub dashboard: Arc<DashboardView>,
    pub controls: Arc<ControlPanel>,
}

impl AppState {
    /// Loads settings once and starts the trade poller.
    pub async fn mount(
        api: Arc<dyn BackendApi>,
        catalog: Arc<SettingsCatalog>,
        poller: PollerConfig,
        command_timeout: Option<Duration>,
    ) -> Self {
        let settings = SettingsStore::load(Arc::clone(&api), Arc::clone(&catalog)).await;
        let dashboard = DashboardView::mount(Arc::clone(&api), poller);
        let controls = ControlPanel::new(Arc::clone(&api), command_timeout);

        Self {
            api,
            catalog,
            settings: Arc::new(RwLock::new(settings)),
            dashboard: Arc::new(dashboard),
            controls: Arc::new(controls),
        }
    }

    pub async fn settings(&self) -> SettingsStore {
        self.settings.read().await.clone()
    }

    /// Drops the current settings view and loads a fresh one. Locks do not
    /// carry over.
    pub async fn remount_settings(&self) -> SettingsStore {
        let fresh = SettingsStore::load(Arc::clone(&self.api), Arc::clone(&self.catalog)).await;
        let mut current = self.settings.write().await;
        current.unmount();
        *current = fresh.clone();
        info!("Settings view remounted");
        fresh
    }

    pub async fn unmount(&self) {
        self.settings.read().await.unmount();
        self.dashboard.unmount().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::{trades, FakeBackend};
    use serde_json::json;

    async fn mounted(backend: Arc<FakeBackend>) -> AppState {
        AppState::mount(
            backend,
            Arc::new(SettingsCatalog::builtin()),
            PollerConfig::default(),
            None,
        )
        .await
    }

    #[tokio::test]
    async fn test_remount_clears_locks() {
        let backend = Arc::new(FakeBackend::new().with_settings(json!({"AI_COOLDOWN_SEC_OPEN": 45})));
        let state = mounted(backend).await;

        let before = state.settings().await;
        before.toggle_lock("AI_COOLDOWN_SEC_OPEN").await.unwrap();
        assert!(before.is_locked("AI_COOLDOWN_SEC_OPEN").await);

        let after = state.remount_settings().await;
        assert!(!after.is_locked("AI_COOLDOWN_SEC_OPEN").await);
        assert!(!before.is_mounted());
        assert!(after.is_mounted());
        state.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_stops_polling() {
        let backend = Arc::new(FakeBackend::new().with_trade_pages(vec![Some(trades(1..=3))]));
        let state = mounted(backend.clone()).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(state.dashboard.feed().await.len(), 3);
        assert!(state.dashboard.select("2").await.is_some());

        state.unmount().await;
        assert!(!state.dashboard.is_polling().await);
        let fetches = backend.trade_fetches();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.trade_fetches(), fetches);
        assert!(!state.settings().await.is_mounted());
    }
}
