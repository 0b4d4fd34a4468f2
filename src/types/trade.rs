use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Backend trade ids arrive as numbers from the SQLite store and as strings
/// from the broker, so both are accepted and echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TradeId {
    Number(u64),
    Text(String),
}

impl TradeId {
    /// Compares against an id taken from a URL or table row.
    pub fn matches(&self, raw: &str) -> bool {
        match self {
            TradeId::Number(n) => raw.trim().parse::<u64>().map_or(false, |r| r == *n),
            TradeId::Text(s) => s == raw,
        }
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeId::Number(n) => write!(f, "{}", n),
            TradeId::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeState {
    #[serde(alias = "open")]
    Open,
    #[serde(alias = "closed")]
    Closed,
    #[serde(alias = "cancelled", alias = "CANCELED", alias = "canceled")]
    Cancelled,
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeState::Open => write!(f, "Open"),
            TradeState::Closed => write!(f, "Closed"),
            TradeState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Trade timestamp. The trade log stores whatever text the broker handed
/// over, so anything that is not a recognisable date is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TradeTime {
    Parsed(DateTime<Utc>),
    Raw(String),
}

impl TradeTime {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
            return TradeTime::Parsed(at.with_timezone(&Utc));
        }
        // Naive ISO timestamps from the trade log are UTC.
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
            .map(|naive| TradeTime::Parsed(naive.and_utc()))
            .unwrap_or_else(|| TradeTime::Raw(raw.to_string()))
    }

    pub fn as_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            TradeTime::Parsed(at) => Some(*at),
            TradeTime::Raw(_) => None,
        }
    }
}

impl fmt::Display for TradeTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeTime::Parsed(at) => write!(f, "{}", at.format("%Y-%m-%d %H:%M:%S")),
            TradeTime::Raw(raw) => f.write_str(raw),
        }
    }
}

/// One row of `/trades/recent`. Read-only on this side; the backend owns it.
///
/// Only `trade_id` and `instrument` are required. Every other column may be
/// null (open trades have no close price or realized P/L yet) or hold a
/// value we cannot interpret; such fields decode to `None` and the record
/// as received stays available in `raw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    #[serde(rename = "trade_id")]
    pub id: TradeId,
    pub instrument: String,
    #[serde(default, deserialize_with = "lenient_time")]
    pub open_time: Option<TradeTime>,
    #[serde(default, deserialize_with = "lenient_time")]
    pub close_time: Option<TradeTime>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub open_price: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub close_price: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub units: Option<Decimal>,
    #[serde(rename = "realized_pl", default, deserialize_with = "lenient_decimal")]
    pub realized_pnl: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub unrealized_pl: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_state")]
    pub state: Option<TradeState>,
    #[serde(rename = "tp_price", default, deserialize_with = "lenient_decimal")]
    pub take_profit_price: Option<Decimal>,
    #[serde(rename = "sl_price", default, deserialize_with = "lenient_decimal")]
    pub stop_loss_price: Option<Decimal>,
    /// The record exactly as the backend sent it, for the inspector.
    #[serde(skip)]
    pub raw: Value,
}

impl Trade {
    pub fn is_closed(&self) -> bool {
        self.state == Some(TradeState::Closed)
    }
}

fn decimal_from_text(text: &str) -> Option<Decimal> {
    let text = text.trim();
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => decimal_from_text(&n.to_string()),
        Some(Value::String(s)) => decimal_from_text(&s),
        _ => None,
    })
}

fn lenient_time<'de, D>(deserializer: D) -> Result<Option<TradeTime>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(TradeTime::parse(&s)),
        Some(Value::Number(n)) => Some(TradeTime::Raw(n.to_string())),
        _ => None,
    })
}

fn lenient_state<'de, D>(deserializer: D) -> Result<Option<TradeState>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .and_then(|value| serde_json::from_value(value).ok()))
}

/// Decodes records one by one so a single malformed row does not cost the
/// whole page. A row is malformed only when it lacks a usable `trade_id`
/// or `instrument`.
pub fn parse_trades(records: Vec<Value>) -> Vec<Trade> {
    records
        .into_iter()
        .filter_map(|record| match Trade::deserialize(&record) {
            Ok(mut trade) => {
                trade.raw = record;
                Some(trade)
            }
            Err(e) => {
                warn!(error = %e, "Skipping malformed trade record");
                None
            }
        })
        .collect()
}

/// The most recent trades, newest first, as of the last successful poll.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TradeFeed {
    trades: Vec<Trade>,
    fetched_at: Option<DateTime<Utc>>,
}

impl TradeFeed {
    /// Swaps in a whole new page; nothing from the previous page survives.
    pub fn replace(&mut self, mut trades: Vec<Trade>, limit: usize) {
        trades.truncate(limit);
        self.trades = trades;
        self.fetched_at = Some(Utc::now());
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    pub fn find(&self, raw_id: &str) -> Option<&Trade> {
        self.trades.iter().find(|t| t.id.matches(raw_id))
    }

    pub fn stats(&self) -> TradeStats {
        TradeStats::from_trades(&self.trades)
    }
}

/// Win/loss summary over the closed trades of a feed. Closed trades whose
/// realized P/L is missing are left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeStats {
    pub wins: u64,
    pub losses: u64,
    pub win_rate: Option<Decimal>,
    pub total_pnl: Decimal,
}

impl TradeStats {
    pub fn from_trades(trades: &[Trade]) -> Self {
        let mut stats = TradeStats::default();

        let realized = trades
            .iter()
            .filter(|t| t.is_closed())
            .filter_map(|t| t.realized_pnl);
        for pnl in realized {
            if pnl > Decimal::ZERO {
                stats.wins += 1;
            } else {
                stats.losses += 1;
            }
            stats.total_pnl += pnl;
        }

        let total = stats.wins + stats.losses;
        if total > 0 {
            let rate = Decimal::from(stats.wins) / Decimal::from(total) * Decimal::from(100);
            stats.win_rate = Some(rate.round_dp(2));
        }
        stats
    }
}
