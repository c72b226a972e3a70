// =============================================================================
// EngineConfig — hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub. Every tunable parameter lives here so the engine
// can be reconfigured without a restart. Persistence uses an atomic
// tmp + rename pattern to avoid corruption on crash. All fields carry
// `#[serde(default)]` so loading an older config file never breaks.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::strategy::{ConfidenceTier, EntryMethod, ExitMethod};
use crate::types::{AccountMode, TradingMode};

fn default_rebalance_every_n_outcomes() -> u32 {
    20
}

fn default_rebalance_every_seconds() -> u64 {
    3600
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_min_samples_for_cluster_swap() -> u32 {
    5
}

fn default_cluster_swap_margin_pp() -> f64 {
    0.05
}

fn default_trailing_activation_threshold() -> f64 {
    0.05
}

fn default_max_concurrent_positions() -> u32 {
    5
}

fn default_regime_multipliers() -> RegimeMultipliers {
    RegimeMultipliers::default()
}

fn default_entry_threshold() -> f64 {
    55.0
}

fn default_min_active_signals() -> u32 {
    2
}

fn default_dedup_window_ms() -> i64 {
    5
}

fn default_max_queue_depth() -> usize {
    16
}

fn default_decision_deadline_ms() -> u64 {
    500
}

fn default_regime_reassessment_seconds() -> u64 {
    300
}

/// Per-regime size multiplier used by the decision engine, mirroring
/// `capital::Regime`'s own conservative/scaled/hyper split.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegimeMultipliers {
    #[serde(default = "default_conservative_multiplier")]
    pub conservative: f64,
    #[serde(default = "default_scaled_multiplier")]
    pub scaled: f64,
    #[serde(default = "default_hyper_multiplier")]
    pub hyper: f64,
}

fn default_conservative_multiplier() -> f64 {
    0.3
}
fn default_scaled_multiplier() -> f64 {
    1.0
}
fn default_hyper_multiplier() -> f64 {
    2.0
}

impl Default for RegimeMultipliers {
    fn default() -> Self {
        Self {
            conservative: default_conservative_multiplier(),
            scaled: default_scaled_multiplier(),
            hyper: default_hyper_multiplier(),
        }
    }
}

/// Fallback entry/exit template shape, used only when config seeds or
/// overrides a strategy cluster outside the compiled-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateOverride {
    pub entry_method: EntryMethod,
    pub exit_method: ExitMethod,
    pub stop_pct: f64,
    pub target_pct: f64,
    pub trailing_percent: f64,
    pub max_hold_secs: u64,
    pub size_multiplier: f64,
    pub confidence_tier: ConfidenceTier,
}

/// Top-level runtime configuration for the engine.
///
/// Every field has a serde default so older JSON files missing new fields
/// still deserialize correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Operational modes ---------------------------------------------------
    #[serde(default)]
    pub trading_mode: TradingMode,

    #[serde(default)]
    pub account_mode: AccountMode,

    // --- Learning / rebalance cadence ----------------------------------------
    #[serde(default = "default_rebalance_every_n_outcomes")]
    pub rebalance_every_n_outcomes: u32,

    #[serde(default = "default_rebalance_every_seconds")]
    pub rebalance_every_seconds: u64,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_min_samples_for_cluster_swap")]
    pub min_samples_for_cluster_swap: u32,

    #[serde(default = "default_cluster_swap_margin_pp")]
    pub cluster_swap_margin_pp: f64,

    // --- Position management --------------------------------------------------
    #[serde(default = "default_trailing_activation_threshold")]
    pub trailing_activation_threshold: f64,

    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: u32,

    // --- Decision engine -------------------------------------------------------
    #[serde(default = "default_regime_multipliers")]
    pub regime_multipliers: RegimeMultipliers,

    #[serde(default = "default_entry_threshold")]
    pub entry_threshold: f64,

    #[serde(default = "default_min_active_signals")]
    pub min_active_signals: u32,

    // --- Intake / scheduling -----------------------------------------------------
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: i64,

    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,

    #[serde(default = "default_decision_deadline_ms")]
    pub decision_deadline_ms: u64,

    #[serde(default = "default_regime_reassessment_seconds")]
    pub regime_reassessment_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paused,
            account_mode: AccountMode::Demo,
            rebalance_every_n_outcomes: default_rebalance_every_n_outcomes(),
            rebalance_every_seconds: default_rebalance_every_seconds(),
            learning_rate: default_learning_rate(),
            min_samples_for_cluster_swap: default_min_samples_for_cluster_swap(),
            cluster_swap_margin_pp: default_cluster_swap_margin_pp(),
            trailing_activation_threshold: default_trailing_activation_threshold(),
            max_concurrent_positions: default_max_concurrent_positions(),
            regime_multipliers: default_regime_multipliers(),
            entry_threshold: default_entry_threshold(),
            min_active_signals: default_min_active_signals(),
            dedup_window_ms: default_dedup_window_ms(),
            max_queue_depth: default_max_queue_depth(),
            decision_deadline_ms: default_decision_deadline_ms(),
            regime_reassessment_seconds: default_regime_reassessment_seconds(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            trading_mode = %config.trading_mode,
            account_mode = %config.account_mode,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Load from `path`, or fall back to defaults (logged) if the file is
    /// absent. Startup always forces `TradingMode::Paused` regardless of
    /// what was persisted, as a safety default.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut config = match Self::load(path) {
            Ok(c) => c,
            Err(e) => {
                info!(path = %path.display(), error = %e, "no usable engine config, starting from defaults");
                Self::default()
            }
        };
        config.trading_mode = TradingMode::Paused;
        config
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialize engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.account_mode, AccountMode::Demo);
        assert_eq!(cfg.max_concurrent_positions, 5);
        assert_eq!(cfg.min_active_signals, 2);
        assert!((cfg.entry_threshold - 55.0).abs() < f64::EPSILON);
        assert!((cfg.regime_multipliers.hyper - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.rebalance_every_n_outcomes, 20);
        assert_eq!(cfg.dedup_window_ms, 5);
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "trading_mode": "Live", "entry_threshold": 60.0 }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Live);
        assert!((cfg.entry_threshold - 60.0).abs() < f64::EPSILON);
        assert_eq!(cfg.max_concurrent_positions, 5);
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.max_concurrent_positions, cfg2.max_concurrent_positions);
        assert_eq!(cfg.trading_mode, cfg2.trading_mode);
    }

    #[test]
    fn load_or_default_forces_paused_mode() {
        let dir = std::env::temp_dir().join(format!("engine_config_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        let mut cfg = EngineConfig::default();
        cfg.trading_mode = TradingMode::Live;
        cfg.save(&path).unwrap();

        let loaded = EngineConfig::load_or_default(&path);
        assert_eq!(loaded.trading_mode, TradingMode::Paused);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn save_then_load_roundtrips_atomically() {
        let dir = std::env::temp_dir().join(format!("engine_config_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        let cfg = EngineConfig::default();
        cfg.save(&path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.max_concurrent_positions, cfg.max_concurrent_positions);

        std::fs::remove_dir_all(&dir).ok();
    }
}
