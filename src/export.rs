// =============================================================================
// Export sink — dump the full monitoring picture to a JSON file
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::monitor::account::AccountSnapshot;
use crate::monitor::aggregate::SymbolExposure;
use crate::monitor::engine::{EngineStats, MonitorEngine};

#[derive(Serialize)]
struct ExportDocument {
    timestamp: String,
    stats: EngineStats,
    accounts: BTreeMap<u64, AccountSnapshot>,
    exposure: BTreeMap<String, SymbolExposure>,
}

/// Write stats, all account snapshots, and the fleet exposure to `path`
/// as one pretty-printed JSON document.
pub fn export_data(engine: &MonitorEngine, path: &Path) -> Result<()> {
    let document = ExportDocument {
        timestamp: Utc::now().to_rfc3339(),
        stats: engine.stats(),
        accounts: engine.all_accounts_snapshot(),
        exposure: engine.exposure_by_symbol(),
    };

    let json =
        serde_json::to_string_pretty(&document).context("failed to serialize export document")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write export to {}", path.display()))?;

    info!(path = %path.display(), "monitoring data exported");
    Ok(())
}
