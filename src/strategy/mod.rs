// =============================================================================
// StrategyMatrix — maps signal clusters to entry/exit strategy templates
// =============================================================================
//
// A cluster's `signal_set` is matched against a decision's active readings by
// Jaccard overlap; the winning cluster's template supplies entry method and
// exit parameters. Modeled directly on the momentum / mean-reversion /
// breakout / scalp split this codebase used for strategy profiles, but with
// the selection made by overlap against observed signals rather than by
// regime label alone.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_CLUSTER_ID: &str = "scalp_quick";
const JACCARD_MATCH_THRESHOLD: f64 = 0.6;
const DISCOVERY_MIN_OCCURRENCES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryMethod {
    Market,
    Limit,
    Delayed,
    Dca,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitMethod {
    Trailing,
    RoiTarget,
    Volatility,
    Time,
    MomentumReversal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyTemplate {
    pub entry_method: EntryMethod,
    pub exit_method: ExitMethod,
    /// Stop-loss distance from entry, as a fraction (e.g. 0.05 = 5%).
    pub stop_pct: f64,
    /// Take-profit distance from entry, as a fraction.
    pub target_pct: f64,
    pub trailing_percent: f64,
    pub max_hold_secs: u64,
    /// Multiplier applied on top of the decision engine's base size.
    pub size_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingClusterMetrics {
    pub avg_roi: f64,
    pub win_rate: f64,
    pub sample_count: u64,
    pub occurrences: u32,
}

impl Default for RollingClusterMetrics {
    fn default() -> Self {
        Self {
            avg_roi: 0.0,
            win_rate: 0.0,
            sample_count: 0,
            occurrences: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalCluster {
    pub id: String,
    pub signal_set: HashSet<String>,
    pub preferred_strategy: StrategyTemplate,
    pub rolling_metrics: RollingClusterMetrics,
    pub confidence_tier: ConfidenceTier,
}

pub struct StrategyMatrix {
    clusters: RwLock<HashMap<String, SignalCluster>>,
}

impl StrategyMatrix {
    pub fn new(clusters: Vec<SignalCluster>) -> Self {
        Self {
            clusters: RwLock::new(clusters.into_iter().map(|c| (c.id.clone(), c)).collect()),
        }
    }

    /// Seed the matrix with the four default templates.
    pub fn seeded() -> Self {
        Self::new(vec![
            SignalCluster {
                id: "momentum_trend".into(),
                signal_set: ["momentum.price_change", "momentum.roc", "technical.trend_alignment"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                preferred_strategy: StrategyTemplate {
                    entry_method: EntryMethod::Market,
                    exit_method: ExitMethod::Trailing,
                    stop_pct: 0.12,
                    target_pct: 0.25,
                    trailing_percent: 0.15,
                    max_hold_secs: 3600,
                    size_multiplier: 1.0,
                },
                rolling_metrics: RollingClusterMetrics::default(),
                confidence_tier: ConfidenceTier::High,
            },
            SignalCluster {
                id: "mean_revert".into(),
                signal_set: ["technical.rsi", "technical.volatility_regime", "context.market_condition"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                preferred_strategy: StrategyTemplate {
                    entry_method: EntryMethod::Limit,
                    exit_method: ExitMethod::RoiTarget,
                    stop_pct: 0.06,
                    target_pct: 0.08,
                    trailing_percent: 0.0,
                    max_hold_secs: 1800,
                    size_multiplier: 0.8,
                },
                rolling_metrics: RollingClusterMetrics::default(),
                confidence_tier: ConfidenceTier::Medium,
            },
            SignalCluster {
                id: "breakout_volatility".into(),
                signal_set: ["technical.volatility_regime", "volume.volume_to_liquidity", "volume.informed_trading"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                preferred_strategy: StrategyTemplate {
                    entry_method: EntryMethod::Delayed,
                    exit_method: ExitMethod::Volatility,
                    stop_pct: 0.10,
                    target_pct: 0.35,
                    trailing_percent: 0.10,
                    max_hold_secs: 2400,
                    size_multiplier: 0.9,
                },
                rolling_metrics: RollingClusterMetrics::default(),
                confidence_tier: ConfidenceTier::Medium,
            },
            SignalCluster {
                id: DEFAULT_CLUSTER_ID.into(),
                signal_set: ["momentum.price_change", "volume.volume_to_liquidity"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                preferred_strategy: StrategyTemplate {
                    entry_method: EntryMethod::Market,
                    exit_method: ExitMethod::Time,
                    stop_pct: 0.04,
                    target_pct: 0.05,
                    trailing_percent: 0.0,
                    max_hold_secs: 600,
                    size_multiplier: 0.5,
                },
                rolling_metrics: RollingClusterMetrics::default(),
                confidence_tier: ConfidenceTier::Low,
            },
        ])
    }

    /// Find the best matching cluster for a set of active subtype ids, by
    /// Jaccard overlap. Falls back to the default conservative strategy
    /// (`scalp_quick`) when the best overlap is below threshold.
    ///
    /// `scalp_quick` is normally present because `seeded()` always inserts
    /// it, but a matrix rebuilt from a persisted dump (`persistence.rs`)
    /// carries whatever clusters the dump happened to have. If the dump is
    /// missing it, this falls back to `fallback_template()` rather than
    /// trusting that invariant on data that was never validated.
    pub fn best_strategy(&self, active_subtypes: &HashSet<String>) -> (String, StrategyTemplate, f64) {
        let clusters = self.clusters.read();
        let mut best: Option<(&SignalCluster, f64)> = None;

        for cluster in clusters.values() {
            let score = jaccard(&cluster.signal_set, active_subtypes);
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((cluster, score));
            }
        }

        match best {
            Some((cluster, score)) if score >= JACCARD_MATCH_THRESHOLD => {
                (cluster.id.clone(), cluster.preferred_strategy.clone(), score)
            }
            _ => {
                let default = clusters.get(DEFAULT_CLUSTER_ID).map(|c| c.preferred_strategy.clone()).unwrap_or_else(|| {
                    warn!(cluster_id = DEFAULT_CLUSTER_ID, "default cluster missing from matrix, using built-in fallback template");
                    fallback_template()
                });
                (DEFAULT_CLUSTER_ID.to_string(), default, 0.0)
            }
        }
    }

    /// Learner-only: apply a batch of rolling-metric updates.
    pub fn apply_cluster_update(&self, batch: &HashMap<String, RollingClusterMetrics>) {
        let mut clusters = self.clusters.write();
        for (id, metrics) in batch {
            if let Some(cluster) = clusters.get_mut(id) {
                cluster.rolling_metrics = metrics.clone();
            }
        }
    }

    /// Learner-only: swap a cluster's preferred strategy when an alternative
    /// has demonstrably outperformed it.
    pub fn swap_preferred_strategy(&self, cluster_id: &str, new_strategy: StrategyTemplate) {
        if let Some(cluster) = self.clusters.write().get_mut(cluster_id) {
            info!(cluster_id, "preferred strategy swapped by learner");
            cluster.preferred_strategy = new_strategy;
        }
    }

    /// Called by the learner when a frequently observed signal set outside
    /// the existing map shows rolling ROI above a threshold.
    pub fn discover_new_cluster(
        &self,
        id: String,
        signal_set: HashSet<String>,
        template: StrategyTemplate,
        occurrences: u32,
        rolling_roi: f64,
    ) {
        if occurrences < DISCOVERY_MIN_OCCURRENCES {
            return;
        }
        let mut clusters = self.clusters.write();
        if clusters.contains_key(&id) {
            return;
        }
        info!(cluster_id = %id, occurrences, rolling_roi, "discovered new signal cluster");
        clusters.insert(
            id.clone(),
            SignalCluster {
                id,
                signal_set,
                preferred_strategy: template,
                rolling_metrics: RollingClusterMetrics {
                    avg_roi: rolling_roi,
                    win_rate: 0.0,
                    sample_count: 0,
                    occurrences,
                },
                confidence_tier: ConfidenceTier::Low,
            },
        );
    }

    pub fn snapshot(&self) -> Vec<SignalCluster> {
        self.clusters.read().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<SignalCluster> {
        self.clusters.read().get(id).cloned()
    }
}

/// The conservative template `seeded()` registers under `DEFAULT_CLUSTER_ID`,
/// kept as a standalone constructor so `best_strategy` never depends on that
/// cluster actually being present in the map it's reading from.
fn fallback_template() -> StrategyTemplate {
    StrategyTemplate {
        entry_method: EntryMethod::Market,
        exit_method: ExitMethod::Time,
        stop_pct: 0.04,
        target_pct: 0.05,
        trailing_percent: 0.0,
        max_hold_secs: 600,
        size_multiplier: 0.5,
    }
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_matrix_has_four_clusters() {
        let matrix = StrategyMatrix::seeded();
        assert_eq!(matrix.snapshot().len(), 4);
    }

    #[test]
    fn best_strategy_matches_momentum_cluster() {
        let matrix = StrategyMatrix::seeded();
        let active: HashSet<String> = ["momentum.price_change", "momentum.roc", "technical.trend_alignment"]
            .into_iter()
            .map(String::from)
            .collect();
        let (id, _, score) = matrix.best_strategy(&active);
        assert_eq!(id, "momentum_trend");
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn best_strategy_falls_back_to_default_on_low_overlap() {
        let matrix = StrategyMatrix::seeded();
        let active: HashSet<String> = ["sentiment.external_score"].into_iter().map(String::from).collect();
        let (id, _, score) = matrix.best_strategy(&active);
        assert_eq!(id, DEFAULT_CLUSTER_ID);
        assert!(score < JACCARD_MATCH_THRESHOLD);
    }

    #[test]
    fn best_strategy_falls_back_to_builtin_template_when_default_cluster_missing() {
        // Simulates a matrix rebuilt from a persisted dump that never
        // contained `DEFAULT_CLUSTER_ID`, e.g. an older or hand-edited
        // registry_dump.json. Must not panic.
        let matrix = StrategyMatrix::new(vec![SignalCluster {
            id: "momentum_trend".into(),
            signal_set: ["momentum.price_change"].into_iter().map(String::from).collect(),
            preferred_strategy: fallback_template(),
            rolling_metrics: RollingClusterMetrics::default(),
            confidence_tier: ConfidenceTier::High,
        }]);
        let active: HashSet<String> = ["sentiment.external_score"].into_iter().map(String::from).collect();
        let (id, template, score) = matrix.best_strategy(&active);
        assert_eq!(id, DEFAULT_CLUSTER_ID);
        assert_eq!(score, 0.0);
        assert_eq!(template.max_hold_secs, fallback_template().max_hold_secs);
    }

    #[test]
    fn discover_new_cluster_requires_minimum_occurrences() {
        let matrix = StrategyMatrix::seeded();
        matrix.discover_new_cluster(
            "new_cluster".into(),
            HashSet::new(),
            StrategyMatrix::seeded().get(DEFAULT_CLUSTER_ID).unwrap().preferred_strategy,
            2,
            0.3,
        );
        assert!(matrix.get("new_cluster").is_none());
    }

    #[test]
    fn discover_new_cluster_inserts_when_threshold_met() {
        let matrix = StrategyMatrix::seeded();
        let template = matrix.get(DEFAULT_CLUSTER_ID).unwrap().preferred_strategy;
        matrix.discover_new_cluster("new_cluster".into(), HashSet::new(), template, 5, 0.3);
        assert!(matrix.get("new_cluster").is_some());
    }

    #[test]
    fn jaccard_identical_sets_is_one() {
        let a: HashSet<String> = ["x", "y"].into_iter().map(String::from).collect();
        assert!((jaccard(&a, &a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn jaccard_disjoint_sets_is_zero() {
        let a: HashSet<String> = ["x"].into_iter().map(String::from).collect();
        let b: HashSet<String> = ["y"].into_iter().map(String::from).collect();
        assert_eq!(jaccard(&a, &b), 0.0);
    }
}
