// =============================================================================
// RegistryDump — periodic snapshot of learned state, reloaded at startup
// =============================================================================
//
// §6 of SPEC_FULL.md: the core keeps its authoritative state in memory; the
// only thing worth surviving a restart is what the learner has adapted
// (subtype weights, strategy clusters). Uses the same atomic
// write-to-temp-then-rename mechanism as `EngineConfig` so a crash mid-write
// can never corrupt the file the next boot reads.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::signals::registry::{SignalRegistry, SignalSubtype};
use crate::strategy::{SignalCluster, StrategyMatrix};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryDump {
    pub subtypes: Vec<SignalSubtype>,
    pub clusters: Vec<SignalCluster>,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
}

impl RegistryDump {
    pub fn capture(registry: &SignalRegistry, strategy_matrix: &StrategyMatrix) -> Self {
        let snapshot = registry.snapshot();
        Self {
            subtypes: snapshot.subtypes.values().cloned().collect(),
            clusters: strategy_matrix.snapshot(),
            version: snapshot.version,
            timestamp: Utc::now(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read registry dump from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse registry dump from {}", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("failed to serialize registry dump")?;
        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp registry dump to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp registry dump to {}", path.display()))?;

        info!(path = %path.display(), version = self.version, "registry dump saved (atomic)");
        Ok(())
    }

    /// Rebuilds the live components from a loaded dump, falling back to the
    /// compiled-in seed for whichever half is missing or unparseable.
    pub fn into_components(self) -> (SignalRegistry, StrategyMatrix) {
        (SignalRegistry::new(self.subtypes), StrategyMatrix::new(self.clusters))
    }
}

/// Loads the dump at `path` if present and valid; otherwise seeds fresh.
/// Startup never fails because the dump is missing or stale — it is a cache,
/// not a source of truth.
pub fn load_or_seed(path: impl AsRef<Path>) -> (SignalRegistry, StrategyMatrix) {
    let path = path.as_ref();
    match RegistryDump::load(path) {
        Ok(dump) => {
            info!(path = %path.display(), version = dump.version, "restored registry/strategy state from dump");
            dump.into_components()
        }
        Err(e) => {
            info!(path = %path.display(), error = %e, "no usable registry dump, seeding defaults");
            (SignalRegistry::seeded(), StrategyMatrix::seeded())
        }
    }
}
