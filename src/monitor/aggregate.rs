// =============================================================================
// Aggregator — pure derivations over a registry snapshot
// =============================================================================
//
// All functions operate on the record copy produced by
// `Registry::snapshot_records()`, so callers get a point-in-time
// consistent result without holding any lock.
// =============================================================================

use std::collections::BTreeMap;

use serde::Serialize;

use super::account::{AccountRecord, Position};

/// One row of a per-symbol position listing, tagged with the owning
/// account.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolPosition {
    pub login_id: u64,
    #[serde(flatten)]
    pub position: Position,
}

/// Net fleet exposure for a single symbol.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SymbolExposure {
    /// Sum of signed volumes: buys count positive, sells negative.
    pub volume: f64,
    /// Number of accounts holding at least one position in the symbol.
    pub accounts: usize,
    /// Total position count across those accounts.
    pub positions: usize,
}

/// Cross-account totals and averages; all zero for an empty fleet.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetSummary {
    pub total_accounts: usize,
    pub total_balance: f64,
    pub total_equity: f64,
    pub total_margin: f64,
    pub total_profit: f64,
    pub total_positions: usize,
    pub average_balance: f64,
    pub average_equity: f64,
}

/// Every position in `symbol` across all records, grouped by login id
/// ascending (the snapshot is already sorted) and stable within an
/// account.
pub fn positions_by_symbol(records: &[AccountRecord], symbol: &str) -> Vec<SymbolPosition> {
    let mut rows = Vec::new();
    for record in records {
        for position in record.positions.iter().filter(|p| p.symbol == symbol) {
            rows.push(SymbolPosition {
                login_id: record.login_id(),
                position: position.clone(),
            });
        }
    }
    rows
}

/// Net signed exposure per symbol across the whole fleet.
pub fn exposure_by_symbol(records: &[AccountRecord]) -> BTreeMap<String, SymbolExposure> {
    let mut exposure: BTreeMap<String, SymbolExposure> = BTreeMap::new();

    for record in records {
        // Which symbols this record touches, counted once per account.
        let mut touched: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
        for position in &record.positions {
            let entry = touched.entry(position.symbol.as_str()).or_insert((0.0, 0));
            entry.0 += position.signed_volume();
            entry.1 += 1;
        }

        for (symbol, (volume, count)) in touched {
            let entry = exposure.entry(symbol.to_string()).or_default();
            entry.volume += volume;
            entry.accounts += 1;
            entry.positions += count;
        }
    }

    exposure
}

/// Totals of balance/equity/margin/profit with averages over the record
/// count.
pub fn fleet_summary(records: &[AccountRecord]) -> FleetSummary {
    let mut summary = FleetSummary {
        total_accounts: records.len(),
        ..FleetSummary::default()
    };

    for record in records {
        summary.total_balance += record.details.balance;
        summary.total_equity += record.details.equity;
        summary.total_margin += record.details.margin;
        summary.total_profit += record.details.profit;
        summary.total_positions += record.positions.len();
    }

    if !records.is_empty() {
        let n = records.len() as f64;
        summary.average_balance = summary.total_balance / n;
        summary.average_equity = summary.total_equity / n;
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::AccountDetailsRaw;
    use chrono::Utc;
    use serde_json::json;

    fn record_with_positions(login_id: u64, positions: &[serde_json::Value]) -> AccountRecord {
        let mut record = AccountRecord::new(login_id);
        let parsed = positions.iter().filter_map(Position::from_raw).collect();
        record.apply_positions(parsed, Utc::now());
        record
    }

    #[test]
    fn mixed_sides_net_out() {
        let records = vec![record_with_positions(
            1001,
            &[
                json!({"symbol": "EURUSD", "Vol": 1.0, "Type": 0}),
                json!({"symbol": "EURUSD", "Vol": 0.4, "Type": 1}),
            ],
        )];

        let exposure = exposure_by_symbol(&records);
        let eurusd = &exposure["EURUSD"];
        assert!((eurusd.volume - 0.6).abs() < 1e-9);
        assert_eq!(eurusd.accounts, 1);
        assert_eq!(eurusd.positions, 2);
    }

    #[test]
    fn sell_only_exposure_is_negative() {
        let records = vec![record_with_positions(
            1001,
            &[json!({"symbol": "GBPUSD", "Vol": 2.0, "Type": "Sell"})],
        )];

        let exposure = exposure_by_symbol(&records);
        let gbpusd = &exposure["GBPUSD"];
        assert!((gbpusd.volume - -2.0).abs() < 1e-9);
        assert_eq!(gbpusd.accounts, 1);
        assert_eq!(gbpusd.positions, 1);
    }

    #[test]
    fn accounts_counted_once_per_symbol() {
        let records = vec![
            record_with_positions(
                1,
                &[
                    json!({"symbol": "EURUSD", "Vol": 1.0, "Type": 0}),
                    json!({"symbol": "EURUSD", "Vol": 1.0, "Type": 0}),
                ],
            ),
            record_with_positions(2, &[json!({"symbol": "EURUSD", "Vol": 0.5, "Type": 1})]),
        ];

        let exposure = exposure_by_symbol(&records);
        let eurusd = &exposure["EURUSD"];
        assert_eq!(eurusd.accounts, 2);
        assert_eq!(eurusd.positions, 3);
        assert!((eurusd.volume - 1.5).abs() < 1e-9);
    }

    #[test]
    fn exposure_matches_position_listing() {
        // The net volume for a symbol must equal the sum of signed volumes
        // in the per-symbol listing.
        let records = vec![
            record_with_positions(
                1,
                &[
                    json!({"symbol": "EURUSD", "Vol": 1.2, "Type": 0}),
                    json!({"symbol": "USDJPY", "Vol": 3.0, "Type": 1}),
                ],
            ),
            record_with_positions(
                2,
                &[
                    json!({"symbol": "EURUSD", "Vol": 0.7, "Type": 1}),
                    json!({"symbol": "EURUSD", "Vol": 0.1, "Type": 0}),
                ],
            ),
        ];

        let exposure = exposure_by_symbol(&records);
        for symbol in ["EURUSD", "USDJPY"] {
            let listed: f64 = positions_by_symbol(&records, symbol)
                .iter()
                .map(|row| row.position.signed_volume())
                .sum();
            assert!(
                (exposure[symbol].volume - listed).abs() < 1e-9,
                "{symbol}: {} != {listed}",
                exposure[symbol].volume
            );
        }
    }

    #[test]
    fn position_listing_grouped_by_login_ascending() {
        let records = vec![
            record_with_positions(100, &[json!({"symbol": "EURUSD", "Vol": 1.0, "Type": 0})]),
            record_with_positions(
                200,
                &[
                    json!({"symbol": "EURUSD", "Vol": 2.0, "Type": 0, "ticket": 1}),
                    json!({"symbol": "EURUSD", "Vol": 3.0, "Type": 0, "ticket": 2}),
                ],
            ),
        ];

        let rows = positions_by_symbol(&records, "EURUSD");
        assert_eq!(
            rows.iter().map(|r| r.login_id).collect::<Vec<_>>(),
            vec![100, 200, 200]
        );
        // stable within an account
        assert_eq!(rows[1].position.extra["ticket"], json!(1));
        assert_eq!(rows[2].position.extra["ticket"], json!(2));
    }

    #[test]
    fn empty_fleet_summary_is_zero() {
        let summary = fleet_summary(&[]);
        assert_eq!(summary.total_accounts, 0);
        assert_eq!(summary.total_balance, 0.0);
        assert_eq!(summary.average_balance, 0.0);
    }

    #[test]
    fn fleet_summary_totals_and_averages() {
        let mut a = record_with_positions(1, &[json!({"symbol": "EURUSD", "Vol": 1.0, "Type": 0})]);
        a.apply_details(
            &AccountDetailsRaw {
                balance: 100.0,
                equity: 110.0,
                margin: 20.0,
                profit: 10.0,
                ..AccountDetailsRaw::default()
            },
            Utc::now(),
        );
        let mut b = record_with_positions(2, &[]);
        b.apply_details(
            &AccountDetailsRaw {
                balance: 300.0,
                equity: 290.0,
                margin: 0.0,
                profit: -10.0,
                ..AccountDetailsRaw::default()
            },
            Utc::now(),
        );

        let summary = fleet_summary(&[a, b]);
        assert_eq!(summary.total_accounts, 2);
        assert!((summary.total_balance - 400.0).abs() < 1e-9);
        assert!((summary.total_equity - 400.0).abs() < 1e-9);
        assert!((summary.total_profit - 0.0).abs() < 1e-9);
        assert_eq!(summary.total_positions, 1);
        assert!((summary.average_balance - 200.0).abs() < 1e-9);
        assert!((summary.average_equity - 200.0).abs() < 1e-9);
    }
}
