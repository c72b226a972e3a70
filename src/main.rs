// =============================================================================
// Aurora Spot Nexus — Main Entry Point
// =============================================================================
//
// The engine starts in Demo + Paused mode for safety. Callers must explicitly
// switch to Live mode via the control surface (`Engine::set_regime` plus a
// future wire transport over it — not this binary).
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod candidate;
mod capital;
mod config;
mod decision;
mod demo_feeds;
mod engine;
mod error;
mod execution;
mod indicators;
mod insurance;
mod journal;
mod learner;
mod market_condition;
mod market_data;
mod outcome;
mod persistence;
mod position;
mod price_oracle;
mod price_subscriber;
mod scheduler;
mod signals;
mod strategy;
mod types;

use std::sync::Arc;

use tokio::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::capital::{CapitalController, CapitalState, Regime};
use crate::config::EngineConfig;
use crate::demo_feeds::{SimulatedCandidateSource, SimulatedPriceOracle};
use crate::engine::Engine;
use crate::execution::SimulatedSwapExecutor;
use crate::journal::FileTradeJournal;
use crate::learner::{AdaptiveLearner, LearningJournal};
use crate::market_condition::MarketConditionMonitor;
use crate::market_data::CandleBuffer;
use crate::position::PositionManager;
use crate::price_subscriber::PriceSubscriber;
use crate::scheduler::Scheduler;

const CONFIG_PATH: &str = "engine_config.json";
const REGISTRY_DUMP_PATH: &str = "registry_dump.json";
const JOURNAL_PATH: &str = "trade_journal.jsonl";
const CLOCK_TICK: Duration = Duration::from_millis(500);

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Aurora Spot Nexus — Starting Up                   ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // SAFETY: forces Demo + Paused on startup regardless of what's on disk.
    let config = EngineConfig::load_or_default(CONFIG_PATH);

    let tokens: Vec<String> = std::env::var("AURORA_TOKENS")
        .ok()
        .map(|raw| raw.split(',').map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()).collect())
        .filter(|v: &Vec<String>| !v.is_empty())
        .unwrap_or_else(|| vec!["TOKA".into(), "TOKB".into(), "TOKC".into()]);

    let total_base: f64 = std::env::var("AURORA_TOTAL_BASE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10.0);

    info!(tokens = ?tokens, total_base, "Configured token universe and starting capital");
    info!(
        trading_mode = %config.trading_mode,
        account_mode = %config.account_mode,
        "Engine starting in SAFE mode (Demo + Paused)"
    );

    // ── 2. Build component graph ─────────────────────────────────────────
    let (registry, strategy_matrix) = persistence::load_or_seed(REGISTRY_DUMP_PATH);
    let registry = Arc::new(registry);
    let strategy_matrix = Arc::new(strategy_matrix);

    let capital = Arc::new(CapitalController::new(CapitalState::new(total_base, Regime::Scaled)));

    let executor = Arc::new(SimulatedSwapExecutor::default());
    let inner_journal = Arc::new(FileTradeJournal::new(JOURNAL_PATH.into()));
    let (learning_journal, learner_rx) = LearningJournal::new(inner_journal);
    let positions = Arc::new(PositionManager::new(executor, capital.clone(), Arc::new(learning_journal)));

    let candles = Arc::new(CandleBuffer::new(500, 60_000));
    let condition_monitor = Arc::new(MarketConditionMonitor::new());
    let price_oracle = Arc::new(SimulatedPriceOracle::new(Duration::from_secs(2)));
    let price_subscriber = Arc::new(PriceSubscriber::new(price_oracle, positions.clone(), candles.clone()));

    let candidate_source = Arc::new(SimulatedCandidateSource::new(tokens, Duration::from_secs(3)));

    let learner = Arc::new(AdaptiveLearner::new(
        registry.clone(),
        strategy_matrix.clone(),
        learner_rx,
        config.rebalance_every_n_outcomes,
        config.rebalance_every_seconds,
        Some(REGISTRY_DUMP_PATH.into()),
    ));

    let scheduler = Arc::new(Scheduler::new(
        config.clone(),
        candidate_source,
        registry.clone(),
        strategy_matrix.clone(),
        capital.clone(),
        positions.clone(),
        price_subscriber,
        candles,
        condition_monitor,
    ));

    let engine = Arc::new(Engine::new(scheduler.clone(), capital.clone(), positions));

    // ── 3. Clock tick — advances the scheduler's notion of "now" ─────────
    let clock_scheduler = scheduler.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLOCK_TICK);
        loop {
            ticker.tick().await;
            clock_scheduler.advance_clock(now_ms());
        }
    });

    // ── 4. Learner loop ────────────────────────────────────────────────────
    let (learner_shutdown_tx, learner_shutdown_rx) = tokio::sync::watch::channel(false);
    let learner_handle = tokio::spawn(async move {
        learner.run(learner_shutdown_rx, now_ms).await;
    });

    // ── 5. Start the engine ───────────────────────────────────────────────
    engine.start().await;
    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ──────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    engine.stop().await;
    let _ = learner_shutdown_tx.send(true);
    if let Err(e) = learner_handle.await {
        warn!(error = %e, "learner task panicked during shutdown");
    }

    if let Err(e) = config.save(CONFIG_PATH) {
        warn!(error = %e, "failed to save engine config on shutdown");
    }
    if let Err(e) = persistence::RegistryDump::capture(&registry, &strategy_matrix).save(REGISTRY_DUMP_PATH) {
        warn!(error = %e, "failed to save registry dump on shutdown");
    }

    info!("Aurora Spot Nexus shut down complete.");
    Ok(())
}
