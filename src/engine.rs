// =============================================================================
// Engine — top-level control/query surface
// =============================================================================
//
// A plain in-process method set, not a wire protocol: `status`/`positions`/
// `recent_decisions`/`start`/`stop`/`set_regime` are ordinary async methods a
// dashboard process would call directly or proxy over its own transport.
// Routing, auth, and wire schemas belong to that caller, not here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::capital::{CapitalController, CapitalState, Regime, RiskMonitorState};
use crate::decision::Decision;
use crate::position::{PositionManager, PositionView};
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub regime: Regime,
    pub capital_state: CapitalState,
    pub open_positions_count: usize,
    pub rolling_metrics: RiskMonitorState,
}

/// Owns the running/stopped flag and the shutdown signal; everything else is
/// delegated to `Scheduler`, `CapitalController`, and `PositionManager`,
/// which already hold the real state this handle reports on.
pub struct Engine {
    scheduler: Arc<Scheduler>,
    capital: Arc<CapitalController>,
    positions: Arc<PositionManager>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    running: AtomicBool,
}

impl Engine {
    pub fn new(scheduler: Arc<Scheduler>, capital: Arc<CapitalController>, positions: Arc<PositionManager>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            scheduler,
            capital,
            positions,
            shutdown_tx,
            shutdown_rx,
            running: AtomicBool::new(false),
        }
    }

    pub async fn status(&self) -> EngineStatus {
        let capital_state = self.capital.snapshot();
        EngineStatus {
            regime: capital_state.regime,
            open_positions_count: self.positions.list_open().len(),
            rolling_metrics: self.capital.risk_monitor_state(),
            capital_state,
        }
    }

    pub async fn recent_decisions(&self, n: usize) -> Vec<Decision> {
        self.scheduler.recent_decisions(n)
    }

    pub async fn positions(&self) -> Vec<PositionView> {
        self.positions.list_open()
    }

    /// Spawns the scheduler's run loop. Idempotent: a second call while
    /// already running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("engine start requested but already running");
            return;
        }
        info!("engine starting");
        let scheduler = self.scheduler.clone();
        let shutdown_rx = self.shutdown_rx.clone();
        tokio::spawn(async move {
            scheduler.run(shutdown_rx).await;
        });
    }

    /// Signals every scheduler loop to drain and stop. Does not block until
    /// they finish; callers that need that guarantee should await the
    /// spawned task handle returned by a future `start` revision, or poll
    /// `status()` until positions settle.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            info!("engine stop requested but not running");
            return;
        }
        info!("engine stopping");
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn set_regime(&self, regime: Regime) {
        self.capital.set_regime(regime);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateSource;
    use crate::capital::CapitalState;
    use crate::config::EngineConfig;
    use crate::execution::SimulatedSwapExecutor;
    use crate::journal::InMemoryTradeJournal;
    use crate::market_condition::MarketConditionMonitor;
    use crate::market_data::CandleBuffer;
    use crate::price_oracle::{PriceOracle, Tick};
    use crate::price_subscriber::PriceSubscriber;
    use crate::signals::registry::SignalRegistry;
    use crate::strategy::StrategyMatrix;
    use async_trait::async_trait;

    struct EmptyOracle;

    #[async_trait]
    impl PriceOracle for EmptyOracle {
        async fn subscribe(&self, _token: &str) -> tokio::sync::mpsc::Receiver<Tick> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            rx
        }
        async fn unsubscribe(&self, _token: &str) {}
    }

    struct EmptyCandidateSource;

    #[async_trait]
    impl CandidateSource for EmptyCandidateSource {
        async fn poll(&self) -> Option<crate::candidate::Candidate> {
            None
        }
    }

    fn engine() -> (Arc<Engine>, Arc<CapitalController>, Arc<Scheduler>) {
        let capital = Arc::new(CapitalController::new(CapitalState::new(10.0, Regime::Scaled)));
        let executor = Arc::new(SimulatedSwapExecutor::default());
        let journal = Arc::new(InMemoryTradeJournal::default());
        let positions = Arc::new(PositionManager::new(executor, capital.clone(), journal));
        let candles = Arc::new(CandleBuffer::new(100, 1_000));
        let condition_monitor = Arc::new(MarketConditionMonitor::new());
        let price_subscriber = Arc::new(PriceSubscriber::new(Arc::new(EmptyOracle), positions.clone(), candles.clone()));
        let scheduler = Arc::new(Scheduler::new(
            EngineConfig::default(),
            Arc::new(EmptyCandidateSource),
            Arc::new(SignalRegistry::seeded()),
            Arc::new(StrategyMatrix::seeded()),
            capital.clone(),
            positions.clone(),
            price_subscriber,
            candles,
            condition_monitor,
        ));
        let engine = Arc::new(Engine::new(scheduler.clone(), capital.clone(), positions));
        (engine, capital, scheduler)
    }

    fn weak_candidate(token: &str) -> crate::candidate::Candidate {
        crate::candidate::Candidate {
            token: token.to_string(),
            price: 1.0,
            volume_24h: 0.0,
            volume_1h: 0.0,
            liquidity_depth: 0.0,
            age_seconds: 3_600,
            holder_count: 10,
            raw_metrics: std::collections::HashMap::new(),
        }
    }

    #[tokio::test]
    async fn status_reflects_capital_snapshot() {
        let (engine, _capital, _scheduler) = engine();
        let status = engine.status().await;
        assert_eq!(status.regime, Regime::Scaled);
        assert_eq!(status.open_positions_count, 0);
    }

    #[tokio::test]
    async fn set_regime_propagates_to_capital_controller() {
        let (engine, capital, _scheduler) = engine();
        engine.set_regime(Regime::Hyper).await;
        assert_eq!(capital.snapshot().regime, Regime::Hyper);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_signals_shutdown() {
        let (engine, _capital, _scheduler) = engine();
        engine.start().await;
        engine.start().await;
        engine.stop().await;
        assert!(*engine.shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn recent_decisions_returns_newest_first() {
        let (engine, _capital, scheduler) = engine();

        let mut first = weak_candidate("FIRST");
        first.raw_metrics.insert("sentiment_score".into(), 0.01);
        let mut second = weak_candidate("SECOND");
        second.raw_metrics.insert("sentiment_score".into(), 0.01);

        scheduler.process_candidate_for_test(first).await;
        scheduler.process_candidate_for_test(second).await;

        let recent = engine.recent_decisions(2).await;
        assert_eq!(recent[0].token, "SECOND");
        assert_eq!(recent[1].token, "FIRST");
    }
}
