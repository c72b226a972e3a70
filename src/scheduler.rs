// =============================================================================
// Scheduler — composes every component into the running engine
// =============================================================================
//
// Spawns one task per concurrent activity, mirroring the per-subsystem
// `tokio::spawn` loops this codebase used in its own main wiring, generalized
// to the intake -> decision -> execution -> learning pipeline:
//
//   - candidate intake & decision: event-driven, drained as fast as the
//     source yields candidates
//   - position price ticks: driven by `PriceSubscriber`, not scheduled here
//   - learning rebalance: driven by `AdaptiveLearner::run`, not scheduled here
//   - regime reassessment: periodic, default 300s
//   - market condition refresh: periodic, default regime_reassessment/10
//   - stuck-position retry: periodic, 30s (see `position::STUCK_RETRY_CADENCE`)
//
// All periodic tasks share one `watch::Receiver<bool>` shutdown signal so a
// single `shutdown()` call drains every loop.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock as SyncRwLock;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{info, warn};

use crate::candidate::CandidateSource;
use crate::capital::{CapitalController, Regime};
use crate::config::EngineConfig;
use crate::decision::{Decision, DecisionEngine};
use crate::insurance::EntryGate;
use crate::market_condition::MarketConditionMonitor;
use crate::market_data::CandleBuffer;
use crate::position::{PositionManager, STUCK_RETRY_CADENCE};
use crate::price_subscriber::PriceSubscriber;
use crate::signals::registry::SignalRegistry;
use crate::signals::{evaluate, EvalContext};
use crate::strategy::StrategyMatrix;

const PRICE_HISTORY_LOOKBACK: usize = 64;
const RECENT_DECISIONS_CAP: usize = 200;

pub struct Scheduler {
    config: EngineConfig,
    candidate_source: Arc<dyn CandidateSource>,
    registry: Arc<SignalRegistry>,
    strategy_matrix: Arc<StrategyMatrix>,
    capital: Arc<CapitalController>,
    positions: Arc<PositionManager>,
    price_subscriber: Arc<PriceSubscriber>,
    candles: Arc<CandleBuffer>,
    condition_monitor: Arc<MarketConditionMonitor>,
    now_ms: AtomicI64,
    recent_decisions: SyncRwLock<Vec<Decision>>,
}

impl Scheduler {
    pub fn new(
        config: EngineConfig,
        candidate_source: Arc<dyn CandidateSource>,
        registry: Arc<SignalRegistry>,
        strategy_matrix: Arc<StrategyMatrix>,
        capital: Arc<CapitalController>,
        positions: Arc<PositionManager>,
        price_subscriber: Arc<PriceSubscriber>,
        candles: Arc<CandleBuffer>,
        condition_monitor: Arc<MarketConditionMonitor>,
    ) -> Self {
        Self {
            config,
            candidate_source,
            registry,
            strategy_matrix,
            capital,
            positions,
            price_subscriber,
            candles,
            condition_monitor,
            now_ms: AtomicI64::new(0),
            recent_decisions: SyncRwLock::new(Vec::new()),
        }
    }

    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::Relaxed)
    }

    /// Newest-first slice of the last `RECENT_DECISIONS_CAP` decisions
    /// produced, regardless of action. Backs `Engine::recent_decisions`.
    pub fn recent_decisions(&self, n: usize) -> Vec<Decision> {
        let decisions = self.recent_decisions.read();
        decisions.iter().rev().take(n).cloned().collect()
    }

    fn record_decision(&self, decision: Decision) {
        let mut decisions = self.recent_decisions.write();
        decisions.push(decision);
        if decisions.len() > RECENT_DECISIONS_CAP {
            let overflow = decisions.len() - RECENT_DECISIONS_CAP;
            decisions.drain(0..overflow);
        }
    }

    /// Advances the scheduler's notion of "now". In production this is fed
    /// by a wall-clock tick; tests drive it explicitly so the whole pipeline
    /// stays free of `Instant`/`SystemTime` in hot paths.
    pub fn advance_clock(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::Relaxed);
    }

    /// Runs every periodic activity until `shutdown` fires. Candidate intake
    /// runs concurrently via `spawn_intake_loop` since it is event-driven
    /// rather than interval-driven.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let intake = self.clone().spawn_intake_loop(shutdown.clone());
        let condition_refresh = self.clone().spawn_condition_refresh(shutdown.clone());
        let regime_reassessment = self.clone().spawn_regime_reassessment(shutdown.clone());
        let stuck_retry = self.clone().spawn_stuck_retry(shutdown.clone());

        let _ = shutdown.changed().await;
        info!("scheduler received shutdown signal");

        for handle in [intake, condition_refresh, regime_reassessment, stuck_retry] {
            let _ = handle.await;
        }
    }

    fn spawn_intake_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    candidate = self.candidate_source.poll() => {
                        match candidate {
                            Some(candidate) => self.process_candidate(candidate).await,
                            None => {
                                info!("candidate source exhausted");
                                break;
                            }
                        }
                    }
                }
            }
        })
    }

    async fn process_candidate(&self, candidate: crate::candidate::Candidate) {
        let token = candidate.token.clone();
        self.price_subscriber.subscribe(&token).await;

        let snapshot = self.registry.snapshot();
        self.capital.observe_registry_version(snapshot.version);

        let price_history = self.candles.get_closes(&token, PRICE_HISTORY_LOOKBACK);
        let condition = self.condition_monitor.current(&token);

        let ctx = EvalContext {
            snapshot: &snapshot,
            price_history: &price_history,
            condition: condition.as_ref(),
            now_ms: self.now_ms(),
            regime_reassessment_seconds: self.config.regime_reassessment_seconds,
        };
        let readings = evaluate(&candidate, &ctx);

        let capital_state = self.capital.snapshot();
        let position_held = self.positions.list_open().iter().any(|p| p.token == token);

        let engine = DecisionEngine {
            strategy_matrix: &self.strategy_matrix,
            base_size_fraction: 0.05,
            min_size_fraction: 0.01,
            max_size_fraction: 0.5,
            default_volatility: 0.2,
        };

        let decision = match engine.decide(
            &token,
            &readings,
            &snapshot,
            &capital_state,
            condition.as_ref(),
            candidate.metric("volatility"),
            position_held,
        ) {
            Ok(d) => d,
            Err(error) => {
                warn!(token = %token, error = ?error, "decision skipped");
                return;
            }
        };

        self.record_decision(decision.clone());

        if decision.action != crate::decision::Action::Buy {
            return;
        }

        if let Some(reason) = EntryGate::check(
            &self.config,
            &capital_state,
            &self.capital.risk_monitor_state(),
            condition.as_ref(),
            position_held,
        ) {
            warn!(token = %token, reason = %reason, "entry blocked");
            return;
        }

        let size_base = capital_state.total_base * decision.size_fraction;
        let reservation = match self.capital.try_reserve(size_base) {
            Ok(r) => r,
            Err(error) => {
                warn!(token = %token, error = %error, "capital reservation denied");
                return;
            }
        };

        let mut entry_decision = decision;
        entry_decision.stop_price *= candidate.price;
        entry_decision.target_price *= candidate.price;

        match self
            .positions
            .open(token.clone(), &entry_decision, readings, reservation.amount(), self.now_ms())
            .await
        {
            Some(_) => self.capital.commit(&reservation),
            None => self.capital.release(&reservation),
        }
    }

    fn spawn_condition_refresh(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let period = Duration::from_secs((self.config.regime_reassessment_seconds / 10).max(1));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => self.refresh_conditions(),
                }
            }
        })
    }

    fn refresh_conditions(&self) {
        for position in self.positions.list_open() {
            let candles = self.candles.get_closed(&position.token, 100);
            if candles.len() >= 50 {
                self.condition_monitor.detect(&position.token, &candles);
            }
        }
    }

    fn spawn_regime_reassessment(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let period = Duration::from_secs(self.config.regime_reassessment_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => self.reassess_regime(),
                }
            }
        })
    }

    /// Test-only synchronous variant of `process_candidate`'s decision path,
    /// exposed so tests can drive one candidate without spinning up the
    /// intake task.
    #[cfg(test)]
    pub async fn process_candidate_for_test(&self, candidate: crate::candidate::Candidate) {
        self.process_candidate(candidate).await;
    }

    fn reassess_regime(&self) {
        let risk = self.capital.risk_monitor_state();
        if risk.killed {
            return;
        }
        let volatility = self.condition_monitor.aggregate_volatility().unwrap_or(0.0);

        let regime = if risk.drawdown_pct > 0.1 || risk.consecutive_losses >= 3 {
            Regime::Conservative
        } else if risk.win_rate > 0.6 && volatility < 3.0 {
            Regime::Hyper
        } else {
            Regime::Scaled
        };

        if regime != self.capital.snapshot().regime {
            info!(?regime, win_rate = risk.win_rate, drawdown_pct = risk.drawdown_pct, "regime reassessed");
            self.capital.set_regime(regime);
        }
    }

    fn spawn_stuck_retry(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(STUCK_RETRY_CADENCE);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => self.positions.retry_stuck(self.now_ms()).await,
                }
            }
        })
    }
}
