// =============================================================================
// Alert helpers — pure threshold evaluation over account metrics
// =============================================================================
//
// Nothing here sends anything anywhere; these are derivations callers can
// wire to whatever notification channel they run.
// =============================================================================

use serde::Serialize;

use crate::config::RmsConfig;
use crate::monitor::account::AccountDetails;

/// Margin level as a percentage: `100 * equity / margin`, or 0 when the
/// account uses no margin.
pub fn margin_level(equity: f64, margin: f64) -> f64 {
    if margin == 0.0 {
        0.0
    } else {
        equity / margin * 100.0
    }
}

/// Free margin: equity not tied up as margin.
pub fn free_margin(equity: f64, margin: f64) -> f64 {
    equity - margin
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// Classify a margin level against the configured thresholds.
pub fn margin_alert(margin_level: f64, config: &RmsConfig) -> Option<AlertLevel> {
    if margin_level <= config.margin_level_critical {
        Some(AlertLevel::Critical)
    } else if margin_level <= config.margin_level_warning {
        Some(AlertLevel::Warning)
    } else {
        None
    }
}

/// True when the floating loss breaches the configured threshold.
pub fn loss_alert(profit: f64, config: &RmsConfig) -> bool {
    profit <= config.max_loss_threshold
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Warning,
    Critical,
}

/// Overall account health from margin level and floating profit.
pub fn account_health(details: &AccountDetails, config: &RmsConfig) -> Health {
    if details.margin_level <= config.margin_level_critical {
        Health::Critical
    } else if details.margin_level <= config.margin_level_warning
        || loss_alert(details.profit, config)
    {
        Health::Warning
    } else {
        Health::Healthy
    }
}

/// Human-readable alert line for an account, or `None` when nothing fires.
pub fn alert_message(details: &AccountDetails, config: &RmsConfig) -> Option<String> {
    let mut alerts = Vec::new();

    match margin_alert(details.margin_level, config) {
        Some(AlertLevel::Critical) => alerts.push(format!(
            "CRITICAL: account {} margin level at {:.2}%",
            details.login_id, details.margin_level
        )),
        Some(AlertLevel::Warning) => alerts.push(format!(
            "WARNING: account {} margin level at {:.2}%",
            details.login_id, details.margin_level
        )),
        None => {}
    }

    if loss_alert(details.profit, config) {
        alerts.push(format!(
            "WARNING: account {} loss at ${:.2}",
            details.login_id, details.profit
        ));
    }

    if alerts.is_empty() {
        None
    } else {
        Some(alerts.join(" | "))
    }
}
