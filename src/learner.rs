// =============================================================================
// AdaptiveLearner — closes the loop from outcomes back to weights/strategies
// =============================================================================
//
// Outcomes arrive over an unbounded channel fed by `LearningJournal`, a thin
// `TradeJournal` decorator that forwards every append both to the real
// journal and to the learner, so `PositionManager` needs no awareness of
// learning at all. Rebalance runs every `rebalance_every_n_outcomes` outcomes
// or `rebalance_every_seconds`, whichever comes first, exactly like the
// dual-trigger cadence this codebase already used for periodic persistence.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{info, warn};

use crate::journal::TradeJournal;
use crate::outcome::OutcomeRecord;
use crate::signals::registry::SignalRegistry;
use crate::strategy::{RollingClusterMetrics, StrategyMatrix, StrategyTemplate};

const CONTRIBUTOR_CONFIDENCE_THRESHOLD: f64 = 0.5;
const BASE_LEARNING_RATE: f64 = 0.1;
const LOW_SAMPLE_THRESHOLD: u64 = 5;
const CLUSTER_SWAP_MARGIN_PP: f64 = 0.05;

/// `TradeJournal` decorator that mirrors every append to an `AdaptiveLearner`.
pub struct LearningJournal {
    inner: Arc<dyn TradeJournal>,
    tx: mpsc::UnboundedSender<OutcomeRecord>,
}

impl LearningJournal {
    pub fn new(inner: Arc<dyn TradeJournal>) -> (Self, mpsc::UnboundedReceiver<OutcomeRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { inner, tx }, rx)
    }
}

#[async_trait::async_trait]
impl TradeJournal for LearningJournal {
    async fn append(&self, record: OutcomeRecord) {
        if self.tx.send(record.clone()).is_err() {
            warn!("learner channel closed, outcome not forwarded to learner");
        }
        self.inner.append(record).await;
    }
}

/// Sigmoid-squashed performance score combining ROI and win rate.
fn performance_score(avg_roi: f64, win_rate: f64) -> f64 {
    const A: f64 = 4.0;
    const B: f64 = 1.0;
    let x = A * avg_roi + B * win_rate;
    1.0 / (1.0 + (-x).exp())
}

pub struct AdaptiveLearner {
    registry: Arc<SignalRegistry>,
    strategy_matrix: Arc<StrategyMatrix>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<OutcomeRecord>>,
    pending: SyncMutex<Vec<OutcomeRecord>>,
    outcomes_since_rebalance: AtomicU32,
    last_rebalance_ms: AtomicI64,
    rebalance_every_n_outcomes: u32,
    rebalance_every_seconds: u64,
    dump_path: Option<PathBuf>,
}

impl AdaptiveLearner {
    pub fn new(
        registry: Arc<SignalRegistry>,
        strategy_matrix: Arc<StrategyMatrix>,
        receiver: mpsc::UnboundedReceiver<OutcomeRecord>,
        rebalance_every_n_outcomes: u32,
        rebalance_every_seconds: u64,
        dump_path: Option<PathBuf>,
    ) -> Self {
        Self {
            registry,
            strategy_matrix,
            receiver: AsyncMutex::new(receiver),
            pending: SyncMutex::new(Vec::new()),
            outcomes_since_rebalance: AtomicU32::new(0),
            last_rebalance_ms: AtomicI64::new(0),
            rebalance_every_n_outcomes,
            rebalance_every_seconds,
            dump_path,
        }
    }

    /// Consumes outcomes until `shutdown` fires, draining any remaining
    /// pending outcomes before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, now_ms_fn: impl Fn() -> i64) {
        loop {
            let record = {
                let mut rx = self.receiver.lock().await;
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => None,
                    maybe = rx.recv() => maybe,
                }
            };

            match record {
                Some(record) => self.ingest(record, now_ms_fn()),
                None => break,
            }

            if *shutdown.borrow() {
                break;
            }
        }
        self.drain_pending().await;
        info!("adaptive learner drained and stopped");
    }

    async fn drain_pending(&self) {
        let mut rx = self.receiver.lock().await;
        while let Ok(record) = rx.try_recv() {
            self.ingest(record, 0);
        }
    }

    fn ingest(&self, record: OutcomeRecord, now_ms: i64) {
        let win = record.win();
        for reading in &record.readings {
            if reading.confidence > CONTRIBUTOR_CONFIDENCE_THRESHOLD {
                self.registry.record_reading_outcome(&reading.subtype_id, record.roi, win);
            }
        }

        self.pending.lock().push(record);
        let count = self.outcomes_since_rebalance.fetch_add(1, Ordering::SeqCst) + 1;

        let elapsed = now_ms.saturating_sub(self.last_rebalance_ms.load(Ordering::SeqCst));
        let due_by_count = count >= self.rebalance_every_n_outcomes;
        let due_by_time = now_ms > 0 && elapsed >= (self.rebalance_every_seconds as i64) * 1000;

        if due_by_count || due_by_time {
            self.rebalance(now_ms);
        }
    }

    fn rebalance(&self, now_ms: i64) {
        let batch: Vec<OutcomeRecord> = std::mem::take(&mut *self.pending.lock());
        self.outcomes_since_rebalance.store(0, Ordering::SeqCst);
        self.last_rebalance_ms.store(now_ms, Ordering::SeqCst);

        if batch.is_empty() {
            return;
        }

        self.rebalance_weights(&batch);
        self.rebalance_clusters(&batch);
        self.persist_dump();

        info!(batch_size = batch.len(), "learner rebalance complete");
    }

    /// Per subtype: `new = (1-eta) * old + eta * performance_score`, with
    /// `eta` halved when the contributing sample size is below
    /// `LOW_SAMPLE_THRESHOLD`.
    fn rebalance_weights(&self, batch: &[OutcomeRecord]) {
        let snapshot = self.registry.snapshot();
        let mut deltas = std::collections::HashMap::new();

        for subtype_id in snapshot.subtypes.keys() {
            let contributed = batch
                .iter()
                .any(|r| r.readings.iter().any(|rd| rd.subtype_id == *subtype_id && rd.confidence > CONTRIBUTOR_CONFIDENCE_THRESHOLD));
            if !contributed {
                continue;
            }

            let metrics = self.registry.rolling_metrics(subtype_id);
            let score = performance_score(metrics.avg_roi, metrics.win_rate);
            let eta = if metrics.sample_count < LOW_SAMPLE_THRESHOLD {
                BASE_LEARNING_RATE / 2.0
            } else {
                BASE_LEARNING_RATE
            };
            let old_weight = snapshot.weight_of(subtype_id);
            let new_weight = ((1.0 - eta) * old_weight + eta * score).clamp(0.0, 1.0);
            deltas.insert(subtype_id.clone(), new_weight);
        }

        if !deltas.is_empty() {
            self.registry.apply_update(&deltas);
        }
    }

    /// Updates per-cluster rolling metrics and swaps a cluster's preferred
    /// strategy when an alternative template among the batch's exit reasons
    /// would have outperformed it by at least `CLUSTER_SWAP_MARGIN_PP`.
    fn rebalance_clusters(&self, batch: &[OutcomeRecord]) {
        use std::collections::HashMap;

        let mut grouped: HashMap<String, Vec<&OutcomeRecord>> = HashMap::new();
        for record in batch {
            grouped.entry(record.cluster_id.clone()).or_default().push(record);
        }

        let mut updates = HashMap::new();
        for (cluster_id, records) in &grouped {
            let Some(mut cluster) = self.strategy_matrix.get(cluster_id) else {
                continue;
            };
            let sample_count = records.len() as u64;
            let avg_roi = records.iter().map(|r| r.roi).sum::<f64>() / sample_count as f64;
            let win_rate = records.iter().filter(|r| r.win()).count() as f64 / sample_count as f64;

            let metrics = RollingClusterMetrics {
                avg_roi,
                win_rate,
                sample_count: cluster.rolling_metrics.sample_count + sample_count,
                occurrences: cluster.rolling_metrics.occurrences + 1,
            };
            updates.insert(cluster_id.clone(), metrics.clone());
            cluster.rolling_metrics = metrics;
        }

        if !updates.is_empty() {
            self.strategy_matrix.apply_cluster_update(&updates);
        }

        self.maybe_swap_strategies(&grouped);
    }

    fn maybe_swap_strategies(&self, grouped: &std::collections::HashMap<String, Vec<&OutcomeRecord>>) {
        for (cluster_id, records) in grouped {
            if records.len() < LOW_SAMPLE_THRESHOLD as usize {
                continue;
            }
            let Some(cluster) = self.strategy_matrix.get(cluster_id) else {
                continue;
            };
            let current_roi = cluster.rolling_metrics.avg_roi;

            let best_alt = records
                .iter()
                .map(|r| r.exit_reason)
                .collect::<std::collections::HashSet<_>>()
                .into_iter()
                .filter_map(|reason| alternative_template_for(&cluster.preferred_strategy, reason))
                .next();

            let observed_roi = records.iter().map(|r| r.roi).sum::<f64>() / records.len() as f64;
            if let Some(alt) = best_alt {
                if observed_roi > current_roi + CLUSTER_SWAP_MARGIN_PP {
                    self.strategy_matrix.swap_preferred_strategy(cluster_id, alt);
                }
            }
        }
    }

    fn persist_dump(&self) {
        let Some(path) = &self.dump_path else { return };
        let dump = LearnerDump {
            subtypes: self.registry.snapshot().subtypes.values().cloned().collect(),
            clusters: self.strategy_matrix.snapshot(),
        };
        let Ok(content) = serde_json::to_string_pretty(&dump) else {
            warn!("failed to serialize learner dump");
            return;
        };
        let tmp_path = path.with_extension("json.tmp");
        if std::fs::write(&tmp_path, &content).and_then(|_| std::fs::rename(&tmp_path, path)).is_err() {
            warn!(path = %path.display(), "failed to persist learner dump");
        }
    }
}

/// Widens the exit method's natural parameter in the direction that exit
/// reason implies underperformed, e.g. a cluster dominated by `Stop` exits
/// gets a wider stop on the candidate alternative.
fn alternative_template_for(base: &StrategyTemplate, reason: crate::outcome::ExitReason) -> Option<StrategyTemplate> {
    use crate::outcome::ExitReason;
    let mut alt = base.clone();
    match reason {
        ExitReason::Stop => alt.stop_pct *= 1.25,
        ExitReason::Time => alt.max_hold_secs = (alt.max_hold_secs as f64 * 1.5) as u64,
        ExitReason::Trailing => alt.trailing_percent = (alt.trailing_percent * 1.2).min(0.5),
        _ => return None,
    }
    Some(alt)
}

#[derive(serde::Serialize, serde::Deserialize)]
struct LearnerDump {
    subtypes: Vec<crate::signals::registry::SignalSubtype>,
    clusters: Vec<crate::strategy::SignalCluster>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::InMemoryTradeJournal;
    use crate::signals::reading::SignalReading;
    use crate::strategy::DEFAULT_CLUSTER_ID;
    use uuid::Uuid;

    fn sample_record(subtype: &str, roi: f64) -> OutcomeRecord {
        OutcomeRecord {
            position_id: Uuid::new_v4(),
            cluster_id: DEFAULT_CLUSTER_ID.into(),
            readings: vec![SignalReading {
                subtype_id: subtype.into(),
                strength: 0.5,
                confidence: 0.9,
                timestamp_ms: 0,
            }],
            entry_price: 1.0,
            exit_price: 1.0 + roi,
            pnl_base: roi,
            roi,
            hold_duration_secs: 60.0,
            exit_reason: crate::outcome::ExitReason::Target,
            slippage_in: 0.0,
            slippage_out: 0.0,
        }
    }

    #[tokio::test]
    async fn learning_journal_forwards_to_inner_and_learner() {
        let inner = Arc::new(InMemoryTradeJournal::default());
        let (journal, mut rx) = LearningJournal::new(inner.clone());
        journal.append(sample_record("momentum.price_change", 0.1)).await;
        assert_eq!(inner.len(), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn ingest_updates_registry_for_high_confidence_contributors_only() {
        let registry = Arc::new(SignalRegistry::seeded());
        let matrix = Arc::new(StrategyMatrix::seeded());
        let (_tx, rx) = mpsc::unbounded_channel();
        let learner = AdaptiveLearner::new(registry.clone(), matrix, rx, 20, 3600, None);

        learner.ingest(sample_record("momentum.price_change", 0.1), 0);
        let metrics = registry.rolling_metrics("momentum.price_change");
        assert_eq!(metrics.sample_count, 1);
    }

    #[test]
    fn rebalance_triggers_after_n_outcomes() {
        let registry = Arc::new(SignalRegistry::seeded());
        let matrix = Arc::new(StrategyMatrix::seeded());
        let (_tx, rx) = mpsc::unbounded_channel();
        let learner = AdaptiveLearner::new(registry, matrix, rx, 3, 3600, None);

        learner.ingest(sample_record("momentum.price_change", 0.1), 1_000);
        learner.ingest(sample_record("momentum.price_change", 0.1), 1_000);
        assert_eq!(learner.outcomes_since_rebalance.load(Ordering::SeqCst), 2);
        learner.ingest(sample_record("momentum.price_change", 0.1), 1_000);
        assert_eq!(learner.outcomes_since_rebalance.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn performance_score_is_bounded_in_unit_interval() {
        assert!(performance_score(1.0, 1.0) <= 1.0);
        assert!(performance_score(-1.0, 0.0) >= 0.0);
    }
}
