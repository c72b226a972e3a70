// =============================================================================
// SignalRegistry — typed signal subtype catalog with weights and performance
// =============================================================================
//
// The hot path (SignalEvaluator reading weights for fusion) must be lock-free,
// so the weight-bearing catalog lives behind an `arc_swap::ArcSwap` — readers
// get an `Arc` to an immutable snapshot with no contention against the
// learner's periodic `apply_update`. Rolling outcome statistics, which are
// only read by the learner itself, live behind an ordinary `RwLock` since they
// are off the hot path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::signals::reading::SignalCategory;

const ROLLING_WINDOW: u32 = 50;
const MIN_WEIGHT: f64 = 0.0;
const MAX_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSubtype {
    pub id: String,
    pub category: SignalCategory,
    pub weight: f64,
}

/// Rolling EMA performance for one subtype, maintained over the last
/// `ROLLING_WINDOW` outcomes it contributed to.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RollingMetrics {
    pub avg_roi: f64,
    pub win_rate: f64,
    pub sample_count: u64,
}

impl RollingMetrics {
    fn update(&mut self, roi: f64, win: bool) {
        let n = ROLLING_WINDOW.min((self.sample_count + 1) as u32).max(1) as f64;
        let alpha = 2.0 / (n + 1.0);
        if self.sample_count == 0 {
            self.avg_roi = roi;
            self.win_rate = if win { 1.0 } else { 0.0 };
        } else {
            self.avg_roi = alpha * roi + (1.0 - alpha) * self.avg_roi;
            let win_val = if win { 1.0 } else { 0.0 };
            self.win_rate = alpha * win_val + (1.0 - alpha) * self.win_rate;
        }
        self.sample_count += 1;
    }
}

/// Immutable, versioned snapshot of the full catalog. Safe to share across
/// threads and to hold across a long-running evaluation without locking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadOnlyView {
    pub subtypes: HashMap<String, SignalSubtype>,
    pub version: u64,
}

impl ReadOnlyView {
    pub fn weight_of(&self, subtype_id: &str) -> f64 {
        self.subtypes.get(subtype_id).map_or(0.0, |s| s.weight)
    }
}

pub struct SignalRegistry {
    current: ArcSwap<ReadOnlyView>,
    rolling: RwLock<HashMap<String, RollingMetrics>>,
    version_counter: AtomicU64,
}

impl SignalRegistry {
    pub fn new(subtypes: Vec<SignalSubtype>) -> Self {
        let view = ReadOnlyView {
            subtypes: subtypes.into_iter().map(|s| (s.id.clone(), s)).collect(),
            version: 0,
        };
        Self {
            current: ArcSwap::from_pointee(view),
            rolling: RwLock::new(HashMap::new()),
            version_counter: AtomicU64::new(0),
        }
    }

    /// Seed the registry with the default subtype catalog (§4.1 of
    /// SPEC_FULL.md), weights split evenly across all subtypes.
    pub fn seeded() -> Self {
        let ids: &[(&str, SignalCategory)] = &[
            ("momentum.price_change", SignalCategory::Momentum),
            ("momentum.roc", SignalCategory::Momentum),
            ("technical.trend_alignment", SignalCategory::Technical),
            ("technical.rsi", SignalCategory::Technical),
            ("technical.volatility_regime", SignalCategory::Technical),
            ("volume.volume_to_liquidity", SignalCategory::Volume),
            ("volume.informed_trading", SignalCategory::Volume),
            ("sentiment.external_score", SignalCategory::Sentiment),
            ("copy.smart_wallet_overlap", SignalCategory::Copy),
            ("time_segment.session_bucket", SignalCategory::TimeSegment),
            ("context.market_condition", SignalCategory::Context),
        ];
        let equal_weight = 1.0 / ids.len() as f64;
        let subtypes = ids
            .iter()
            .map(|(id, category)| SignalSubtype {
                id: id.to_string(),
                category: *category,
                weight: equal_weight,
            })
            .collect();
        Self::new(subtypes)
    }

    /// Lock-free read of the current catalog snapshot.
    pub fn snapshot(&self) -> Arc<ReadOnlyView> {
        self.current.load_full()
    }

    /// Learner-only: atomically replace the snapshot with updated weights.
    /// Weights are clamped to `[0, 1]` before publishing.
    pub fn apply_update(&self, deltas: &HashMap<String, f64>) {
        let previous = self.current.load();
        let mut subtypes = previous.subtypes.clone();
        for (id, new_weight) in deltas {
            if let Some(subtype) = subtypes.get_mut(id) {
                subtype.weight = new_weight.clamp(MIN_WEIGHT, MAX_WEIGHT);
            }
        }
        let version = self.version_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.current.store(Arc::new(ReadOnlyView { subtypes, version }));
    }

    /// Update rolling performance metrics for a subtype that contributed to a
    /// closed position's outcome.
    pub fn record_reading_outcome(&self, subtype_id: &str, roi: f64, win: bool) {
        let mut rolling = self.rolling.write();
        rolling.entry(subtype_id.to_string()).or_default().update(roi, win);
    }

    pub fn rolling_metrics(&self, subtype_id: &str) -> RollingMetrics {
        self.rolling.read().get(subtype_id).copied().unwrap_or_default()
    }

    pub fn rolling_snapshot(&self) -> HashMap<String, RollingMetrics> {
        self.rolling.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_registry_has_equal_weights_summing_near_one() {
        let registry = SignalRegistry::seeded();
        let snap = registry.snapshot();
        let total: f64 = snap.subtypes.values().map(|s| s.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn apply_update_clamps_weights_and_bumps_version() {
        let registry = SignalRegistry::seeded();
        let v0 = registry.snapshot().version;

        let mut deltas = HashMap::new();
        deltas.insert("momentum.price_change".to_string(), 5.0);
        deltas.insert("momentum.roc".to_string(), -5.0);
        registry.apply_update(&deltas);

        let snap = registry.snapshot();
        assert_eq!(snap.version, v0 + 1);
        assert_eq!(snap.weight_of("momentum.price_change"), 1.0);
        assert_eq!(snap.weight_of("momentum.roc"), 0.0);
    }

    #[test]
    fn record_reading_outcome_updates_rolling_metrics() {
        let registry = SignalRegistry::seeded();
        registry.record_reading_outcome("momentum.price_change", 0.2, true);
        registry.record_reading_outcome("momentum.price_change", 0.1, true);
        let metrics = registry.rolling_metrics("momentum.price_change");
        assert_eq!(metrics.sample_count, 2);
        assert!(metrics.avg_roi > 0.0);
        assert!(metrics.win_rate > 0.0);
    }

    #[test]
    fn inactive_subtype_not_removed_on_zero_weight() {
        let registry = SignalRegistry::seeded();
        let mut deltas = HashMap::new();
        deltas.insert("copy.smart_wallet_overlap".to_string(), 0.0);
        registry.apply_update(&deltas);
        let snap = registry.snapshot();
        assert!(snap.subtypes.contains_key("copy.smart_wallet_overlap"));
        assert_eq!(snap.weight_of("copy.smart_wallet_overlap"), 0.0);
    }
}
