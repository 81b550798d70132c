// =============================================================================
// Configuration — environment-driven settings for the monitor service
// =============================================================================
//
// Every tunable lives here. Values come from the process environment (a
// `.env` file is honoured via dotenv in main), falling back to defaults
// that match a stock deployment. `validate()` rejects configurations the
// engine cannot run with.
// =============================================================================

use std::str::FromStr;

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::warn;

/// Runtime configuration for the monitor engine and the push channel.
#[derive(Debug, Clone, Serialize)]
pub struct RmsConfig {
    // --- Broker manager connection -------------------------------------------
    /// Base URL of the broker-manager bridge (e.g. `https://manager:8443`).
    pub manager_base_url: String,
    /// API key sent as a header on every request.
    #[serde(skip_serializing)]
    pub manager_api_key: String,
    /// Secret used exclusively for HMAC request signing. Never serialized.
    #[serde(skip_serializing)]
    pub manager_api_secret: String,

    // --- Poll scheduler ------------------------------------------------------
    /// Seconds between polling ticks.
    pub update_interval: u64,
    /// Closed-trades lookback window in days.
    pub trade_history_days: i64,

    // --- Push channel --------------------------------------------------------
    pub ws_host: String,
    pub ws_port: u16,

    // --- Limits & thresholds -------------------------------------------------
    /// Advisory cap on the number of monitored accounts.
    pub max_monitored_accounts: usize,
    /// Margin level (percent) below which an account is flagged `warning`.
    pub margin_level_warning: f64,
    /// Margin level (percent) below which an account is flagged `critical`.
    pub margin_level_critical: f64,
    /// Floating profit at or below which a loss alert fires.
    pub max_loss_threshold: f64,
}

impl Default for RmsConfig {
    fn default() -> Self {
        Self {
            manager_base_url: "http://localhost:8443".to_string(),
            manager_api_key: String::new(),
            manager_api_secret: String::new(),
            update_interval: 5,
            trade_history_days: 30,
            ws_host: "0.0.0.0".to_string(),
            ws_port: 8765,
            max_monitored_accounts: 100_000,
            margin_level_warning: 150.0,
            margin_level_critical: 100.0,
            max_loss_threshold: -1000.0,
        }
    }
}

impl RmsConfig {
    /// Build a configuration from the process environment, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            manager_base_url: env_string("MANAGER_BASE_URL", &defaults.manager_base_url),
            manager_api_key: env_string("MANAGER_API_KEY", ""),
            manager_api_secret: env_string("MANAGER_API_SECRET", ""),
            update_interval: env_parse("RMS_UPDATE_INTERVAL", defaults.update_interval),
            trade_history_days: env_parse("RMS_TRADE_HISTORY_DAYS", defaults.trade_history_days),
            ws_host: env_string("WS_HOST", &defaults.ws_host),
            ws_port: env_parse("WS_PORT", defaults.ws_port),
            max_monitored_accounts: env_parse(
                "MAX_MONITORED_ACCOUNTS",
                defaults.max_monitored_accounts,
            ),
            margin_level_warning: env_parse("MARGIN_LEVEL_WARNING", defaults.margin_level_warning),
            margin_level_critical: env_parse(
                "MARGIN_LEVEL_CRITICAL",
                defaults.margin_level_critical,
            ),
            max_loss_threshold: env_parse("MAX_LOSS_THRESHOLD", defaults.max_loss_threshold),
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.manager_base_url.is_empty() {
            bail!("MANAGER_BASE_URL is not set");
        }
        if self.update_interval < 1 {
            bail!("RMS_UPDATE_INTERVAL must be at least 1 second");
        }
        if self.trade_history_days < 1 {
            bail!("RMS_TRADE_HISTORY_DAYS must be at least 1 day");
        }
        Ok(())
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "unparsable environment value, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_stock_deployment() {
        let cfg = RmsConfig::default();
        assert_eq!(cfg.update_interval, 5);
        assert_eq!(cfg.trade_history_days, 30);
        assert_eq!(cfg.ws_host, "0.0.0.0");
        assert_eq!(cfg.ws_port, 8765);
        assert_eq!(cfg.max_monitored_accounts, 100_000);
        assert!((cfg.margin_level_warning - 150.0).abs() < f64::EPSILON);
        assert!((cfg.margin_level_critical - 100.0).abs() < f64::EPSILON);
        assert!((cfg.max_loss_threshold - -1000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn default_config_validates() {
        assert!(RmsConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_interval_rejected() {
        let cfg = RmsConfig {
            update_interval: 0,
            ..RmsConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_manager_url_rejected() {
        let cfg = RmsConfig {
            manager_base_url: String::new(),
            ..RmsConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn secrets_never_serialized() {
        let cfg = RmsConfig {
            manager_api_key: "key".into(),
            manager_api_secret: "secret".into(),
            ..RmsConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("manager_api_key"));
    }
}
