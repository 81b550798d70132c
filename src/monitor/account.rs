// =============================================================================
// Account Record — per-account state refreshed by the poll loop
// =============================================================================
//
// One record owns the latest account details, the latest open-positions
// slice, and the latest closed-trades slice, each with its own update
// timestamp. Broker mappings are normalized here, at the ingress: key
// casing varies by gateway and the side field may be numeric or a string.
// =============================================================================

use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::broker::AccountDetailsRaw;
use crate::types::{AccountStatus, Side};

/// Trades included in snapshot and export documents are capped; the full
/// slice is retained internally.
pub const MAX_REPORTED_TRADES: usize = 100;

// ---------------------------------------------------------------------------
// Normalized broker data
// ---------------------------------------------------------------------------

/// A single open position, normalized from the broker's raw mapping.
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub symbol: String,
    /// Lot volume, always non-negative; the sign lives in `side`.
    pub volume: f64,
    pub side: Side,
    pub profit: f64,
    /// Broker-specific fields we do not model, retained verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Position {
    /// Normalize a raw position mapping. Returns `None` when the mapping
    /// has no usable symbol.
    pub fn from_raw(raw: &serde_json::Value) -> Option<Self> {
        let map = raw.as_object()?;
        let symbol = field(map, &["symbol", "Symbol"])?.as_str()?.to_string();
        if symbol.is_empty() {
            return None;
        }

        let volume = field(map, &["volume", "Vol", "Volume"])
            .and_then(as_number)
            .unwrap_or(0.0)
            .abs();
        let side = Side::from_raw(field(map, &["type", "Type"]));
        let profit = field(map, &["profit", "Profit"])
            .and_then(as_number)
            .unwrap_or(0.0);

        let mut extra = map.clone();
        for key in [
            "symbol", "Symbol", "volume", "Vol", "Volume", "type", "Type", "profit", "Profit",
        ] {
            extra.remove(key);
        }

        Some(Self {
            symbol,
            volume,
            side,
            profit,
            extra,
        })
    }

    /// Net signed volume: positive for buys, negative for sells.
    pub fn signed_volume(&self) -> f64 {
        self.side.signed(self.volume)
    }
}

/// A closed trade, normalized from the broker's raw mapping.
#[derive(Debug, Clone, Serialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub volume: f64,
    pub profit: f64,
    /// Close instant; some gateways omit it entirely.
    pub close_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ClosedTrade {
    pub fn from_raw(raw: &serde_json::Value) -> Option<Self> {
        let map = raw.as_object()?;
        let symbol = field(map, &["symbol", "Symbol"])?.as_str()?.to_string();
        if symbol.is_empty() {
            return None;
        }

        let volume = field(map, &["volume", "Vol", "Volume"])
            .and_then(as_number)
            .unwrap_or(0.0);
        let profit = field(map, &["profit", "Profit"])
            .and_then(as_number)
            .unwrap_or(0.0);
        let close_time = field(map, &["time", "Time", "close_time"]).and_then(parse_instant);

        let mut extra = map.clone();
        for key in [
            "symbol",
            "Symbol",
            "volume",
            "Vol",
            "Volume",
            "profit",
            "Profit",
            "time",
            "Time",
            "close_time",
        ] {
            extra.remove(key);
        }

        Some(Self {
            symbol,
            volume,
            profit,
            close_time,
            extra,
        })
    }
}

fn field<'a>(
    map: &'a serde_json::Map<String, serde_json::Value>,
    keys: &[&str],
) -> Option<&'a serde_json::Value> {
    keys.iter().find_map(|k| map.get(*k))
}

/// Accept both JSON numbers and numeric strings; the bridge is not
/// consistent about which it emits.
fn as_number(value: &serde_json::Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Accept epoch seconds (number or numeric string) or an RFC 3339 string.
fn parse_instant(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    if let Some(secs) = value.as_i64() {
        return Utc.timestamp_opt(secs, 0).single();
    }
    if let Some(s) = value.as_str() {
        if let Ok(secs) = s.trim().parse::<i64>() {
            return Utc.timestamp_opt(secs, 0).single();
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Account details
// ---------------------------------------------------------------------------

/// Latest financial state of one account.
#[derive(Debug, Clone, Serialize)]
pub struct AccountDetails {
    pub login_id: u64,
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub free_margin: f64,
    pub margin_level: f64,
    pub profit: f64,
    pub group: String,
    pub leverage: u32,
    pub status: AccountStatus,
    pub last_update: Option<DateTime<Utc>>,
}

impl AccountDetails {
    fn new(login_id: u64) -> Self {
        Self {
            login_id,
            balance: 0.0,
            equity: 0.0,
            margin: 0.0,
            free_margin: 0.0,
            margin_level: 0.0,
            profit: 0.0,
            group: String::new(),
            leverage: 0,
            status: AccountStatus::Active,
            last_update: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Account record
// ---------------------------------------------------------------------------

/// Per-account state block owned by the registry. Mutated exclusively by
/// the poll loop applying refresh results under the registry guard.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub details: AccountDetails,
    pub positions: Vec<Position>,
    pub positions_updated: Option<DateTime<Utc>>,
    pub trades: Vec<ClosedTrade>,
    pub trades_updated: Option<DateTime<Utc>>,
}

impl AccountRecord {
    pub fn new(login_id: u64) -> Self {
        Self {
            details: AccountDetails::new(login_id),
            positions: Vec::new(),
            positions_updated: None,
            trades: Vec::new(),
            trades_updated: None,
        }
    }

    pub fn login_id(&self) -> u64 {
        self.details.login_id
    }

    // -------------------------------------------------------------------------
    // Refresh application (details -> positions -> trades, per tick)
    // -------------------------------------------------------------------------

    /// Overwrite all detail fields from a successful fetch.
    ///
    /// Gateways that predate the margin-level field send it as zero; it is
    /// derived from equity and margin in that case.
    pub fn apply_details(&mut self, raw: &AccountDetailsRaw, now: DateTime<Utc>) {
        let d = &mut self.details;
        d.balance = raw.balance;
        d.equity = raw.equity;
        d.margin = raw.margin;
        d.free_margin = if raw.free_margin != 0.0 {
            raw.free_margin
        } else {
            crate::alerts::free_margin(raw.equity, raw.margin)
        };
        d.margin_level = if raw.margin_level != 0.0 {
            raw.margin_level
        } else {
            crate::alerts::margin_level(raw.equity, raw.margin)
        };
        d.profit = raw.profit;
        d.group = raw.group.clone();
        d.leverage = raw.leverage;
        d.status = AccountStatus::Active;
        d.last_update = Some(now);
    }

    /// The manager returned no data; previous field values stay intact.
    pub fn mark_unavailable(&mut self) {
        self.details.status = AccountStatus::Unavailable;
    }

    /// The details RPC failed; previous field values stay intact.
    pub fn mark_error(&mut self) {
        self.details.status = AccountStatus::Error;
    }

    pub fn apply_positions(&mut self, positions: Vec<Position>, now: DateTime<Utc>) {
        self.positions = positions;
        self.positions_updated = Some(now);
    }

    pub fn apply_trades(&mut self, trades: Vec<ClosedTrade>, now: DateTime<Utc>) {
        self.trades = trades;
        self.trades_updated = Some(now);
    }

    // -------------------------------------------------------------------------
    // Reporting views
    // -------------------------------------------------------------------------

    pub fn positions_summary(&self) -> PositionsSummary {
        let symbols: BTreeSet<&str> = self.positions.iter().map(|p| p.symbol.as_str()).collect();
        PositionsSummary {
            login_id: self.login_id(),
            position_count: self.positions.len(),
            positions: self.positions.clone(),
            symbols: symbols.into_iter().map(str::to_string).collect(),
            last_update: self.positions_updated,
        }
    }

    pub fn trades_report(&self) -> TradesReport {
        TradesReport {
            login_id: self.login_id(),
            trade_count: self.trades.len(),
            trades: self.trades.iter().take(MAX_REPORTED_TRADES).cloned().collect(),
            daily_stats: self.daily_stats(),
            last_update: self.trades_updated,
        }
    }

    pub fn trades_summary(&self) -> TradesSummary {
        TradesSummary {
            trade_count: self.trades.len(),
            last_update: self.trades_updated,
        }
    }

    /// Today's closed-trade totals. Trades without a close timestamp are
    /// skipped rather than counted as today's.
    pub fn daily_stats(&self) -> DailyStats {
        let today = Utc::now().date_naive();
        let mut stats = DailyStats {
            trade_count: 0,
            total_volume: 0.0,
            total_profit: 0.0,
            date: today.to_string(),
        };

        for trade in &self.trades {
            match trade.close_time {
                Some(t) if t.date_naive() == today => {
                    stats.trade_count += 1;
                    stats.total_volume += trade.volume;
                    stats.total_profit += trade.profit;
                }
                _ => {}
            }
        }

        stats
    }

    /// Full snapshot of this record for queries and the export sink.
    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            account: self.details.clone(),
            positions: self.positions_summary(),
            trades: self.trades_report(),
        }
    }

    /// The per-account entry carried in a tick's `update` frame.
    pub fn update_frame(&self) -> AccountUpdate {
        AccountUpdate {
            account: self.details.clone(),
            positions: self.positions_summary(),
            trades_summary: self.trades_summary(),
        }
    }
}

// ---------------------------------------------------------------------------
// Serialized views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PositionsSummary {
    pub login_id: u64,
    pub positions: Vec<Position>,
    pub position_count: usize,
    pub symbols: Vec<String>,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradesReport {
    pub login_id: u64,
    pub trade_count: usize,
    /// Capped at [`MAX_REPORTED_TRADES`] entries.
    pub trades: Vec<ClosedTrade>,
    pub daily_stats: DailyStats,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradesSummary {
    pub trade_count: usize,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyStats {
    pub trade_count: usize,
    pub total_volume: f64,
    pub total_profit: f64,
    pub date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    pub account: AccountDetails,
    pub positions: PositionsSummary,
    pub trades: TradesReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountUpdate {
    pub account: AccountDetails,
    pub positions: PositionsSummary,
    pub trades_summary: TradesSummary,
}
