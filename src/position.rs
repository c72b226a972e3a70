// =============================================================================
// PositionManager — Pending/Open/Exiting/Closed state machine
// =============================================================================
//
// Exit checks run in a fixed order — target, stop, trailing, time — and only
// the first matching condition fires per tick, mirroring the ordered barrier
// evaluation this codebase already used, simplified to the four-step order
// the engine specifies instead of the richer TP1/TP2/progressive-tightening
// ladder.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::capital::CapitalController;
use crate::decision::Decision;
use crate::execution::{SwapExecutor, SwapSide};
use crate::journal::TradeJournal;
use crate::outcome::{ExitReason, OutcomeRecord};
use crate::signals::reading::SignalReading;

const MAX_EXIT_RETRIES: u32 = 3;
const RETRY_BASE_SECS: f64 = 1.0;
const RETRY_FACTOR: f64 = 2.0;
const STUCK_RETRY_CADENCE_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Pending,
    Open,
    Exiting,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub token: String,
    pub cluster_id: String,
    pub readings: Vec<SignalReading>,
    pub state: PositionState,
    pub size_base: f64,
    pub size_token: f64,
    pub entry_price: f64,
    pub high_water_mark: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub trailing_percent: f64,
    pub trailing_activation: f64,
    pub max_hold_secs: u64,
    pub entry_timestamp_ms: i64,
    pub exit_retries: u32,
    pub stuck: bool,
}

impl Position {
    pub fn trailing_level(&self) -> f64 {
        self.high_water_mark * (1.0 - self.trailing_percent)
    }
}

/// A lightweight, read-only projection for the control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionView {
    pub id: Uuid,
    pub token: String,
    pub state: PositionState,
    pub entry_price: f64,
    pub current_trailing_level: f64,
    pub stuck: bool,
}

impl From<&Position> for PositionView {
    fn from(p: &Position) -> Self {
        Self {
            id: p.id,
            token: p.token.clone(),
            state: p.state,
            entry_price: p.entry_price,
            current_trailing_level: p.trailing_level(),
            stuck: p.stuck,
        }
    }
}

struct PositionEntry {
    position: RwLock<Position>,
    /// Per-position serialization point: at most one swap call in flight.
    swap_lock: Mutex<()>,
}

pub struct PositionManager {
    positions: RwLock<HashMap<Uuid, Arc<PositionEntry>>>,
    closed: RwLock<Vec<Position>>,
    executor: Arc<dyn SwapExecutor>,
    capital: Arc<CapitalController>,
    journal: Arc<dyn TradeJournal>,
}

impl PositionManager {
    pub fn new(
        executor: Arc<dyn SwapExecutor>,
        capital: Arc<CapitalController>,
        journal: Arc<dyn TradeJournal>,
    ) -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            closed: RwLock::new(Vec::new()),
            executor,
            capital,
            journal,
        }
    }

    /// Entry path: requests a buy swap. On success transitions straight to
    /// `Open`; on failure the position never leaves `Pending` in the map —
    /// it is recorded as `Closed` with `exit_reason = error` and the
    /// reservation is released by the caller (the caller owns the
    /// `Reservation` and is responsible for releasing it on this path).
    pub async fn open(
        &self,
        token: String,
        decision: &Decision,
        readings: Vec<SignalReading>,
        size_base: f64,
        now_ms: i64,
    ) -> Option<Uuid> {
        let id = Uuid::new_v4();
        let receipt = self
            .executor
            .swap(&token, SwapSide::Buy, size_base, decision.target_price)
            .await;

        match receipt {
            Ok(receipt) => {
                let position = Position {
                    id,
                    token: token.clone(),
                    cluster_id: decision.cluster_id.clone(),
                    readings,
                    state: PositionState::Open,
                    size_base,
                    size_token: receipt.tokens_received,
                    entry_price: receipt.effective_price,
                    high_water_mark: receipt.effective_price,
                    stop_loss: decision.stop_price,
                    take_profit: decision.target_price,
                    trailing_percent: decision.trailing_percent,
                    trailing_activation: 0.05,
                    max_hold_secs: decision.max_hold_secs,
                    entry_timestamp_ms: now_ms,
                    exit_retries: 0,
                    stuck: false,
                };
                info!(position_id = %id, token, entry_price = receipt.effective_price, "position opened");
                self.positions.write().insert(
                    id,
                    Arc::new(PositionEntry {
                        position: RwLock::new(position),
                        swap_lock: Mutex::new(()),
                    }),
                );
                Some(id)
            }
            Err(error) => {
                warn!(token, error = %error, "entry swap failed, position never opened");

                let position = Position {
                    id,
                    token: token.clone(),
                    cluster_id: decision.cluster_id.clone(),
                    readings: readings.clone(),
                    state: PositionState::Closed,
                    size_base,
                    size_token: 0.0,
                    entry_price: 0.0,
                    high_water_mark: 0.0,
                    stop_loss: decision.stop_price,
                    take_profit: decision.target_price,
                    trailing_percent: decision.trailing_percent,
                    trailing_activation: 0.05,
                    max_hold_secs: decision.max_hold_secs,
                    entry_timestamp_ms: now_ms,
                    exit_retries: 0,
                    stuck: false,
                };

                // No capital ever moved on this path, so this is not a trade
                // outcome: `capital.record_outcome` is deliberately not
                // called, since a roi of 0.0 would be misread as a loss by
                // the risk monitor's win/consecutive-loss counters. Only the
                // audit trail (journal + closed list) reflects the attempt.
                let record = OutcomeRecord {
                    position_id: id,
                    cluster_id: decision.cluster_id.clone(),
                    readings,
                    entry_price: 0.0,
                    exit_price: 0.0,
                    pnl_base: 0.0,
                    roi: 0.0,
                    hold_duration_secs: 0.0,
                    exit_reason: ExitReason::Error,
                    slippage_in: 0.0,
                    slippage_out: 0.0,
                };
                self.journal.append(record).await;
                self.closed.write().push(position);

                None
            }
        }
    }

    /// Price tick handling for an `Open` position. Checks run in the fixed
    /// order target -> stop -> trailing -> time; only the first match fires.
    /// Ticks delivered while `Exiting` update `high_water_mark` only.
    pub async fn on_tick(&self, token: &str, price: f64, now_ms: i64) {
        let entries: Vec<Arc<PositionEntry>> = self
            .positions
            .read()
            .values()
            .filter(|e| e.position.read().token == token)
            .cloned()
            .collect();

        for entry in entries {
            let exit_reason = {
                let mut position = entry.position.write();
                if position.state == PositionState::Closed {
                    continue;
                }

                if price > position.high_water_mark {
                    position.high_water_mark = price;
                }

                if position.state != PositionState::Open {
                    continue;
                }

                if price >= position.take_profit {
                    Some(ExitReason::Target)
                } else if price <= position.stop_loss {
                    Some(ExitReason::Stop)
                } else if price <= position.trailing_level()
                    && position.high_water_mark > position.entry_price * (1.0 + position.trailing_activation)
                {
                    Some(ExitReason::Trailing)
                } else if (now_ms - position.entry_timestamp_ms) as f64 / 1000.0 > position.max_hold_secs as f64 {
                    Some(ExitReason::Time)
                } else {
                    None
                }
            };

            if let Some(reason) = exit_reason {
                entry.position.write().state = PositionState::Exiting;
                self.run_exit(entry, reason, now_ms).await;
            }
        }
    }

    /// Drives a position through exit: attempts the sell swap, retrying up
    /// to `MAX_EXIT_RETRIES` times with exponential backoff (base 1s, factor
    /// 2, jitter +/-25%). After the retry budget is exhausted the position
    /// is left `Exiting` and surfaced as `stuck`; it is not retried again
    /// here — only the 30s `retry_stuck` cadence attempts it again.
    async fn run_exit(&self, entry: Arc<PositionEntry>, reason: ExitReason, now_ms: i64) {
        let _guard = entry.swap_lock.lock().await;

        for attempt in 1..=MAX_EXIT_RETRIES + 1 {
            if self.attempt_exit_once(&entry, reason, now_ms).await {
                return;
            }
            if attempt <= MAX_EXIT_RETRIES {
                let backoff = RETRY_BASE_SECS * RETRY_FACTOR.powi(attempt as i32 - 1);
                let jitter = rand::thread_rng().gen_range(-0.25..0.25);
                let delay = (backoff * (1.0 + jitter)).max(0.1);
                sleep(Duration::from_secs_f64(delay)).await;
            }
        }

        let mut position = entry.position.write();
        position.stuck = true;
        warn!(token = %position.token, "exit exhausted retries, position surfaced as stuck");
    }

    /// Single sell-swap attempt. Returns `true` on a successful close.
    async fn attempt_exit_once(&self, entry: &Arc<PositionEntry>, reason: ExitReason, now_ms: i64) -> bool {
        let (token, size_token, entry_price, entry_timestamp_ms, readings, cluster_id, size_base, current_price) = {
            let mut position = entry.position.write();
            position.exit_retries += 1;
            (
                position.token.clone(),
                position.size_token,
                position.entry_price,
                position.entry_timestamp_ms,
                position.readings.clone(),
                position.cluster_id.clone(),
                position.size_base,
                position.high_water_mark,
            )
        };

        let receipt = self.executor.swap(&token, SwapSide::Sell, size_token, current_price).await;

        match receipt {
            Ok(receipt) => {
                let proceeds_base = receipt.tokens_received * receipt.effective_price - receipt.fees;
                self.capital.settle(size_base, proceeds_base);

                let pnl_base = proceeds_base - size_base;
                let roi = if size_base > 0.0 { pnl_base / size_base } else { 0.0 };
                let hold_duration_secs = ((now_ms - entry_timestamp_ms).max(0)) as f64 / 1000.0;

                let id = entry.position.read().id;
                entry.position.write().state = PositionState::Closed;
                self.positions.write().remove(&id);

                let record = OutcomeRecord {
                    position_id: id,
                    cluster_id,
                    readings,
                    entry_price,
                    exit_price: receipt.effective_price,
                    pnl_base,
                    roi,
                    hold_duration_secs,
                    exit_reason: reason,
                    slippage_in: 0.0,
                    slippage_out: 0.0,
                };
                self.capital.record_outcome(&record);
                self.journal.append(record.clone()).await;
                self.closed.write().push(entry.position.read().clone());

                info!(position_id = %id, token, pnl_base, roi, exit_reason = %reason, "position closed");
                true
            }
            Err(error) => {
                warn!(token, error = %error, "exit swap attempt failed");
                false
            }
        }
    }

    /// Periodic retry driver for stuck positions, run at the 30s cadence.
    /// A manual `close` request makes one additional attempt regardless of
    /// this cadence.
    pub async fn retry_stuck(&self, now_ms: i64) {
        let stuck: Vec<Arc<PositionEntry>> = self
            .positions
            .read()
            .values()
            .filter(|e| e.position.read().stuck)
            .cloned()
            .collect();

        for entry in stuck {
            let _guard = entry.swap_lock.lock().await;
            let reason = ExitReason::Manual;
            if self.attempt_exit_once(&entry, reason, now_ms).await {
                entry.position.write().stuck = false;
            }
        }
    }

    /// External close request: an exit-triggered transition regardless of
    /// price conditions. A position already `Exiting`/stuck gets exactly one
    /// additional attempt; a fresh `Open` position runs the full retry loop.
    pub async fn close(&self, position_id: Uuid, now_ms: i64) -> bool {
        let entry = match self.positions.read().get(&position_id).cloned() {
            Some(e) => e,
            None => return false,
        };
        let already_exiting = entry.position.read().state == PositionState::Exiting;
        entry.position.write().state = PositionState::Exiting;

        if already_exiting {
            let _guard = entry.swap_lock.lock().await;
            if self.attempt_exit_once(&entry, ExitReason::Manual, now_ms).await {
                entry.position.write().stuck = false;
            }
        } else {
            self.run_exit(entry, ExitReason::Manual, now_ms).await;
        }
        true
    }

    pub fn get(&self, position_id: Uuid) -> Option<Position> {
        self.positions.read().get(&position_id).map(|e| e.position.read().clone())
    }

    pub fn list_open(&self) -> Vec<PositionView> {
        self.positions.read().values().map(|e| PositionView::from(&*e.position.read())).collect()
    }

    pub fn recent_closed(&self, count: usize) -> Vec<Position> {
        let closed = self.closed.read();
        closed.iter().rev().take(count).cloned().collect()
    }
}

/// Cadence helper placed here instead of `Scheduler` since retry timing is
/// intrinsic to position retry semantics, not a generic scheduling concern.
pub const STUCK_RETRY_CADENCE: Duration = Duration::from_secs(STUCK_RETRY_CADENCE_SECS);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capital::{CapitalController, CapitalState, Regime};
    use crate::decision::{Action, Decision, RiskLevel};
    use crate::execution::{ExecutionReceipt, SwapExecutor};
    use crate::journal::InMemoryTradeJournal;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedExecutor {
        buy_price: f64,
        sell_results: Mutex<Vec<Result<f64, crate::error::ExecError>>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SwapExecutor for ScriptedExecutor {
        async fn swap(
            &self,
            _token: &str,
            side: SwapSide,
            base_amount: f64,
            _limit_price: f64,
        ) -> Result<ExecutionReceipt, crate::error::ExecError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match side {
                SwapSide::Buy => Ok(ExecutionReceipt {
                    tx_id: "buy".into(),
                    tokens_received: base_amount / self.buy_price,
                    effective_price: self.buy_price,
                    fees: 0.0,
                }),
                SwapSide::Sell => {
                    let mut results = self.sell_results.lock().await;
                    if results.is_empty() {
                        return Err(crate::error::ExecError::Rejected);
                    }
                    let next = results.remove(0);
                    next.map(|price| ExecutionReceipt {
                        tx_id: "sell".into(),
                        tokens_received: base_amount,
                        effective_price: price,
                        fees: 0.0,
                    })
                }
            }
        }
    }

    struct AlwaysFailExecutor;

    #[async_trait]
    impl SwapExecutor for AlwaysFailExecutor {
        async fn swap(
            &self,
            _token: &str,
            _side: SwapSide,
            _base_amount: f64,
            _limit_price: f64,
        ) -> Result<ExecutionReceipt, crate::error::ExecError> {
            Err(crate::error::ExecError::Rejected)
        }
    }

    fn decision(stop: f64, target: f64, trailing: f64) -> Decision {
        Decision {
            token: "TOKA".into(),
            action: Action::Buy,
            score: 0.5,
            confidence_out: 80.0,
            risk_level: RiskLevel::Normal,
            cluster_id: "momentum_trend".into(),
            size_fraction: 0.1,
            stop_price: stop,
            target_price: target,
            trailing_percent: trailing,
            max_hold_secs: 3600,
        }
    }

    fn manager(executor: Arc<dyn SwapExecutor>) -> PositionManager {
        let capital = Arc::new(CapitalController::new(CapitalState::new(10.0, Regime::Scaled)));
        let journal = Arc::new(InMemoryTradeJournal::default());
        PositionManager::new(executor, capital, journal)
    }

    #[tokio::test]
    async fn open_then_target_exit_closes_position() {
        let executor = Arc::new(ScriptedExecutor {
            buy_price: 0.0001,
            sell_results: Mutex::new(vec![Ok(0.00012)]),
            calls: AtomicU32::new(0),
        });
        let manager = manager(executor);
        let d = decision(0.00008, 0.00012, 0.15);
        let id = manager.open("TOKA".into(), &d, Vec::new(), 1.0, 0).await.unwrap();

        manager.on_tick("TOKA", 0.00011, 1_000).await;
        assert_eq!(manager.get(id).unwrap().state, PositionState::Open);

        manager.on_tick("TOKA", 0.00012, 2_000).await;
        assert!(manager.get(id).is_none());
        assert_eq!(manager.recent_closed(1)[0].state, PositionState::Closed);
    }

    #[tokio::test]
    async fn failed_entry_swap_records_closed_error_outcome() {
        let manager = manager(Arc::new(AlwaysFailExecutor));
        let d = decision(0.00008, 0.00012, 0.15);

        let id = manager.open("TOKA".into(), &d, Vec::new(), 1.0, 0).await;
        assert!(id.is_none());

        let closed = manager.recent_closed(1);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].state, PositionState::Closed);
        assert!(manager.list_open().is_empty());
    }

    #[tokio::test]
    async fn trailing_stop_exit_fires_after_pullback() {
        let executor = Arc::new(ScriptedExecutor {
            buy_price: 0.0001,
            sell_results: Mutex::new(vec![Ok(0.000101)]),
            calls: AtomicU32::new(0),
        });
        let manager = manager(executor);
        // stop and target far away so only trailing can fire
        let d = decision(0.00001, 0.001, 0.15);
        manager.open("TOKA".into(), &d, Vec::new(), 1.0, 0).await.unwrap();

        manager.on_tick("TOKA", 0.00013, 1_000).await;
        manager.on_tick("TOKA", 0.00014, 2_000).await;
        manager.on_tick("TOKA", 0.00011, 3_000).await;

        assert_eq!(manager.recent_closed(1)[0].state, PositionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn exit_failure_exhausts_retries_and_marks_stuck() {
        let executor = Arc::new(ScriptedExecutor {
            buy_price: 0.0001,
            sell_results: Mutex::new(vec![]),
            calls: AtomicU32::new(0),
        });
        let manager = manager(executor);
        let d = decision(0.00008, 0.00009, 0.0);
        let id = manager.open("TOKA".into(), &d, Vec::new(), 1.0, 0).await.unwrap();

        manager.on_tick("TOKA", 0.0001, 5_000_000).await;

        let position = manager.get(id).unwrap();
        assert!(position.stuck);
        assert_eq!(position.exit_retries, MAX_EXIT_RETRIES + 1);
    }
}
