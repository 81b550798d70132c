// =============================================================================
// Shared types used across the fleet monitor
// =============================================================================

use serde::{Deserialize, Serialize};

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Normalize the broker's `Type`/`type` field into a [`Side`].
    ///
    /// The manager feeds are inconsistent: some gateways send the numeric
    /// deal type (0 = buy, everything else = sell), others send strings
    /// ("Buy", "buy", "SELL", ...). A missing or unrecognized field counts
    /// as a buy, matching the legacy feeds.
    pub fn from_raw(raw: Option<&serde_json::Value>) -> Self {
        match raw {
            Some(value) => {
                if let Some(n) = value.as_f64() {
                    if n == 0.0 {
                        Self::Buy
                    } else {
                        Self::Sell
                    }
                } else if let Some(s) = value.as_str() {
                    if s.trim().to_ascii_lowercase().starts_with('b') {
                        Self::Buy
                    } else {
                        Self::Sell
                    }
                } else {
                    Self::Buy
                }
            }
            None => Self::Buy,
        }
    }

    /// Signed volume for exposure math: positive for buys, negative for
    /// sells.
    pub fn signed(self, volume: f64) -> f64 {
        match self {
            Self::Buy => volume,
            Self::Sell => -volume,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Liveness of a monitored account as observed by the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Last details fetch succeeded.
    Active,
    /// The manager returned no data for the account.
    Unavailable,
    /// The last details fetch failed at the RPC level.
    Error,
}

impl Default for AccountStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn side_from_numeric_type() {
        assert_eq!(Side::from_raw(Some(&json!(0))), Side::Buy);
        assert_eq!(Side::from_raw(Some(&json!(1))), Side::Sell);
        assert_eq!(Side::from_raw(Some(&json!(7))), Side::Sell);
    }

    #[test]
    fn side_from_string_type() {
        assert_eq!(Side::from_raw(Some(&json!("Buy"))), Side::Buy);
        assert_eq!(Side::from_raw(Some(&json!("buy limit"))), Side::Buy);
        assert_eq!(Side::from_raw(Some(&json!("Sell"))), Side::Sell);
        assert_eq!(Side::from_raw(Some(&json!("SELL"))), Side::Sell);
    }

    #[test]
    fn side_defaults_to_buy() {
        assert_eq!(Side::from_raw(None), Side::Buy);
        assert_eq!(Side::from_raw(Some(&json!(null))), Side::Buy);
        assert_eq!(Side::from_raw(Some(&json!(true))), Side::Buy);
    }

    #[test]
    fn signed_volume_follows_side() {
        assert_eq!(Side::Buy.signed(2.0), 2.0);
        assert_eq!(Side::Sell.signed(2.0), -2.0);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&AccountStatus::Unavailable).unwrap(),
            "\"unavailable\""
        );
        assert_eq!(AccountStatus::Error.to_string(), "error");
    }
}
