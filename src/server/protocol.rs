// =============================================================================
// Control protocol — frames exchanged over the push channel
// =============================================================================
//
// Every frame is one self-delimited JSON object. Outbound frames carry a
// `type` discriminator and an ISO-8601 `timestamp`; inbound commands carry
// just the discriminator and their payload.
// =============================================================================

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::monitor::account::AccountSnapshot;
use crate::monitor::aggregate::{SymbolExposure, SymbolPosition};
use crate::monitor::engine::{EngineStats, TickUpdate};

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Commands a subscriber may send. Serialize is derived so the CLI can
/// speak the same protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    AddAccount {
        login_id: u64,
    },
    RemoveAccount {
        login_id: u64,
    },
    GetSnapshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        login_id: Option<u64>,
    },
    GetExposure {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
    },
    GetStats,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Snapshot reply payload: one account (null for an unknown id) or the
/// whole fleet.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SnapshotPayload {
    Account(Option<Box<AccountSnapshot>>),
    Fleet(BTreeMap<u64, AccountSnapshot>),
}

/// Frames the server pushes to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Full fleet snapshot pushed right after connect.
    Initial {
        data: BTreeMap<u64, AccountSnapshot>,
        stats: EngineStats,
        timestamp: String,
    },
    /// Per-account list produced by a completed tick.
    Update {
        data: TickUpdate,
        timestamp: String,
    },
    Snapshot {
        data: SnapshotPayload,
        timestamp: String,
    },
    Exposure {
        #[serde(skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        positions: Option<Vec<SymbolPosition>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<BTreeMap<String, SymbolExposure>>,
        timestamp: String,
    },
    Stats {
        data: EngineStats,
        timestamp: String,
    },
    Success {
        message: String,
        timestamp: String,
    },
    Error {
        message: String,
        timestamp: String,
    },
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

impl ServerFrame {
    pub fn initial(data: BTreeMap<u64, AccountSnapshot>, stats: EngineStats) -> Self {
        Self::Initial {
            data,
            stats,
            timestamp: now_iso(),
        }
    }

    pub fn update(data: TickUpdate) -> Self {
        Self::Update {
            data,
            timestamp: now_iso(),
        }
    }

    pub fn snapshot(data: SnapshotPayload) -> Self {
        Self::Snapshot {
            data,
            timestamp: now_iso(),
        }
    }

    pub fn symbol_exposure(symbol: String, positions: Vec<SymbolPosition>) -> Self {
        Self::Exposure {
            symbol: Some(symbol),
            positions: Some(positions),
            data: None,
            timestamp: now_iso(),
        }
    }

    pub fn total_exposure(data: BTreeMap<String, SymbolExposure>) -> Self {
        Self::Exposure {
            symbol: None,
            positions: None,
            data: Some(data),
            timestamp: now_iso(),
        }
    }

    pub fn stats(data: EngineStats) -> Self {
        Self::Stats {
            data,
            timestamp: now_iso(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::Success {
            message: message.into(),
            timestamp: now_iso(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: now_iso(),
        }
    }
}
