use tracing::debug;

use crate::types::{Trade, TradeFeed};

/// Detail view for one trade row.
///
/// Holds its own copy of the selected trade, so a poll tick that replaces the
/// feed (or drops the row entirely) leaves an open inspector untouched.
#[derive(Debug, Clone, Default)]
pub struct TradeInspector {
    selected: Option<Trade>,
}

impl TradeInspector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the inspector on the row with `raw_id`. An id that is not in
    /// the current feed changes nothing and returns `None`.
    pub fn select(&mut self, feed: &TradeFeed, raw_id: &str) -> Option<&Trade> {
        match feed.find(raw_id) {
            Some(trade) => {
                debug!(trade_id = %trade.id, "Trade selected");
                self.selected = Some(trade.clone());
                self.selected.as_ref()
            }
            None => {
                debug!(raw_id, "Selected trade id not in feed");
                None
            }
        }
    }

    pub fn selected(&self) -> Option<&Trade> {
        self.selected.as_ref()
    }

    pub fn close(&mut self) {
        self.selected = None;
    }

    /// True when the inspected trade no longer appears in `feed`.
    pub fn is_stale(&self, feed: &TradeFeed) -> bool {
        self.selected
            .as_ref()
            .is_some_and(|trade| feed.find(&trade.id.to_string()).is_none())
    }

    /// Full record as the backend reported it, pretty-printed.
    pub fn details_json(&self) -> Option<String> {
        let trade = self.selected.as_ref()?;
        let record = if trade.raw.is_null() {
            serde_json::to_value(trade).ok()?
        } else {
            trade.raw.clone()
        };
        serde_json::to_string_pretty(&record).ok()
    }
}
