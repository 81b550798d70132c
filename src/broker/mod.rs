// =============================================================================
// Broker manager access — capability contract consumed by the monitor core
// =============================================================================

pub mod client;

pub use client::ManagerClient;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account details as returned by the broker manager.
///
/// All numeric fields default to zero so partial gateway replies still
/// deserialize.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountDetailsRaw {
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub equity: f64,
    #[serde(default)]
    pub margin: f64,
    #[serde(default)]
    pub free_margin: f64,
    #[serde(default)]
    pub margin_level: f64,
    #[serde(default)]
    pub profit: f64,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub leverage: u32,
}

/// The per-account reads the monitor engine requires from the trading
/// platform. Positions and closed trades come back as raw JSON mappings;
/// key casing varies by gateway, so normalization happens at the ingress
/// of the refresh procedure, not here.
#[async_trait]
pub trait BrokerApi: Send + Sync + 'static {
    /// Cheap liveness probe, used as the start-up handshake.
    async fn ping(&self) -> Result<()>;

    /// Fetch current details for one account. `Ok(None)` means the manager
    /// knows nothing about the login (distinct from an RPC failure).
    async fn get_account_details(&self, login_id: u64) -> Result<Option<AccountDetailsRaw>>;

    /// Fetch the open positions of one account.
    async fn get_open_positions(&self, login_id: u64) -> Result<Vec<serde_json::Value>>;

    /// Fetch trades closed at or after `since` for one account.
    async fn get_closed_trades(
        &self,
        login_id: u64,
        since: DateTime<Utc>,
    ) -> Result<Vec<serde_json::Value>>;
}
