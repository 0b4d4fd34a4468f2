use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::client::BackendApi;
use crate::config::ConsoleConfig;
use crate::types::TradeFeed;

#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub limit: usize,
    pub max_backoff: Duration,
}

impl PollerConfig {
    pub fn from_console(config: &ConsoleConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            limit: config.trade_limit,
            max_backoff: config.max_backoff(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5_000),
            limit: 100,
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Wait before the next poll: the plain interval while healthy, doubling
/// per consecutive failure, never above `max_backoff` (nor below `interval`).
pub fn backoff_delay(interval: Duration, failures: u32, max_backoff: Duration) -> Duration {
    if failures == 0 {
        return interval;
    }
    let factor = 2u32.saturating_pow(failures.min(16));
    interval.saturating_mul(factor).min(max_backoff.max(interval))
}

/// Periodic refresh of the recent-trades page.
///
/// Fetches immediately on activation and then once per interval, measured
/// from the end of the previous fetch so polls never overlap. Each success
/// replaces the feed wholesale; a failure keeps the old page.
pub struct TradePoller {
    feed: Arc<RwLock<TradeFeed>>,
    failures: Arc<AtomicU32>,
    alive: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl TradePoller {
    pub fn activate(api: Arc<dyn BackendApi>, config: PollerConfig) -> Self {
        let feed = Arc::new(RwLock::new(TradeFeed::default()));
        let failures = Arc::new(AtomicU32::new(0));
        let alive = Arc::new(AtomicBool::new(true));
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!(
            "Trade poller started: every {}ms, limit {}",
            config.interval.as_millis(),
            config.limit
        );

        let task = tokio::spawn(poll_loop(
            api,
            config,
            Arc::clone(&feed),
            Arc::clone(&failures),
            Arc::clone(&alive),
            shutdown_rx,
        ));

        Self {
            feed,
            failures,
            alive,
            shutdown,
            task: Some(task),
        }
    }

    pub async fn feed(&self) -> TradeFeed {
        self.feed.read().await.clone()
    }

    pub fn feed_handle(&self) -> Arc<RwLock<TradeFeed>> {
        Arc::clone(&self.feed)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Stops the loop and waits for it. An in-flight fetch is dropped and
    /// its result discarded; nothing runs after this returns.
    pub async fn deactivate(&mut self) {
        self.alive.store(false, Ordering::Release);
        let _ = self.shutdown.send(true);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Trade poller task ended abnormally: {}", e);
                }
            }
            info!("Trade poller stopped");
        }
    }
}

impl Drop for TradePoller {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn poll_loop(
    api: Arc<dyn BackendApi>,
    config: PollerConfig,
    feed: Arc<RwLock<TradeFeed>>,
    failures: Arc<AtomicU32>,
    alive: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let fetched = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            result = api.fetch_recent_trades(config.limit) => result,
        };

        if !alive.load(Ordering::Acquire) {
            break;
        }

        let streak = match fetched {
            Ok(trades) => {
                let count = trades.len();
                feed.write().await.replace(trades, config.limit);
                failures.store(0, Ordering::Relaxed);
                debug!(count, "Trade feed refreshed");
                0
            }
            Err(e) => {
                let streak = failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(error = %e, consecutive_failures = streak, "Trade poll failed, keeping previous feed");
                streak
            }
        };

        let delay = backoff_delay(config.interval, streak, config.max_backoff);
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = sleep(delay) => {}
        }
    }
}
