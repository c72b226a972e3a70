// =============================================================================
// CapitalController — single-writer authority over CapitalState
// =============================================================================
//
// All reservation bookkeeping happens under one lock; calls are short and
// constant-time so contention is minimized by design rather than by lock
// splitting, per the concurrency model. `RiskMonitor` tracks the rolling
// win-rate/drawdown/consecutive-loss inputs that feed `set_regime`, grounded
// in the circuit-breaker pattern this codebase already used for daily risk
// limits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CapitalError;
use crate::outcome::OutcomeRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Conservative,
    Scaled,
    Hyper,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conservative => write!(f, "conservative"),
            Self::Scaled => write!(f, "scaled"),
            Self::Hyper => write!(f, "hyper"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalState {
    pub total_base: f64,
    pub reserved_base: f64,
    pub free_base: f64,
    pub active_positions: u32,
    pub max_position_size: f64,
    pub max_concurrent: u32,
    pub risk_budget_base: f64,
    pub regime: Regime,
    /// The SignalRegistry snapshot version observed the last time this
    /// state was read by the decision engine; used to detect staleness.
    pub observed_registry_version: u64,
}

impl CapitalState {
    pub fn new(total_base: f64, regime: Regime) -> Self {
        let (max_position_size, max_concurrent) = regime_limits(regime, total_base);
        Self {
            total_base,
            reserved_base: 0.0,
            free_base: total_base,
            active_positions: 0,
            max_position_size,
            max_concurrent,
            risk_budget_base: total_base,
            regime,
            observed_registry_version: 0,
        }
    }
}

fn regime_limits(regime: Regime, total_base: f64) -> (f64, u32) {
    match regime {
        Regime::Conservative => (total_base * 0.1, 2),
        Regime::Scaled => (total_base * 0.25, 5),
        Regime::Hyper => (total_base * 0.5, 10),
    }
}

/// Move-only RAII reservation. `Drop` releases any never-committed,
/// never-released reservation back to `free_base`, so a panic unwinding
/// through a held reservation or an early `?` return can never strand
/// capital in `reserved_base`.
#[derive(Debug)]
pub struct Reservation {
    amount: f64,
    resolved: AtomicBool,
    controller: Arc<CapitalControllerInner>,
}

impl Reservation {
    pub fn amount(&self) -> f64 {
        self.amount
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.resolved.swap(true, Ordering::SeqCst) {
            self.controller.release_amount(self.amount);
            warn!(amount = self.amount, "reservation dropped without commit/release; auto-released");
        }
    }
}

#[derive(Debug)]
struct CapitalControllerInner {
    state: RwLock<CapitalState>,
}

impl CapitalControllerInner {
    fn release_amount(&self, amount: f64) {
        let mut state = self.state.write();
        state.reserved_base -= amount;
        state.free_base += amount;
    }
}

pub struct CapitalController {
    inner: Arc<CapitalControllerInner>,
    risk_monitor: RiskMonitor,
}

impl CapitalController {
    pub fn new(initial: CapitalState) -> Self {
        Self {
            inner: Arc::new(CapitalControllerInner {
                state: RwLock::new(initial),
            }),
            risk_monitor: RiskMonitor::new(),
        }
    }

    pub fn snapshot(&self) -> CapitalState {
        self.inner.state.read().clone()
    }

    pub fn try_reserve(&self, proposed_size_base: f64) -> Result<Reservation, CapitalError> {
        let mut state = self.inner.state.write();

        if self.risk_monitor.is_killed() {
            return Err(CapitalError::RiskBudgetExceeded);
        }
        if state.free_base < proposed_size_base {
            return Err(CapitalError::InsufficientFreeCapital);
        }
        if state.active_positions >= state.max_concurrent {
            return Err(CapitalError::MaxConcurrentReached);
        }
        if proposed_size_base > state.max_position_size {
            return Err(CapitalError::AboveMaxPositionSize);
        }
        let sum_at_risk = state.reserved_base;
        if proposed_size_base > state.risk_budget_base - sum_at_risk {
            return Err(CapitalError::RiskBudgetExceeded);
        }

        state.free_base -= proposed_size_base;
        state.reserved_base += proposed_size_base;

        Ok(Reservation {
            amount: proposed_size_base,
            resolved: AtomicBool::new(false),
            controller: self.inner.clone(),
        })
    }

    pub fn commit(&self, reservation: &Reservation) {
        reservation.resolved.store(true, Ordering::SeqCst);
        let mut state = self.inner.state.write();
        state.active_positions += 1;
    }

    pub fn release(&self, reservation: &Reservation) {
        if !reservation.resolved.swap(true, Ordering::SeqCst) {
            self.inner.release_amount(reservation.amount);
        }
    }

    /// Releases the original reservation back out of `reserved_base` and
    /// credits `proceeds_base` (sale proceeds net of fees) to `free_base`.
    /// `reserved_amount` must be the exact amount passed to `try_reserve`
    /// for this position — otherwise `reserved_base` drifts.
    pub fn settle(&self, reserved_amount: f64, proceeds_base: f64) {
        let mut state = self.inner.state.write();
        state.reserved_base -= reserved_amount;
        state.free_base += proceeds_base;
        state.active_positions = state.active_positions.saturating_sub(1);
    }

    pub fn set_regime(&self, regime: Regime) {
        let mut state = self.inner.state.write();
        let (max_position_size, max_concurrent) = regime_limits(regime, state.total_base);
        state.regime = regime;
        state.max_position_size = max_position_size;
        state.max_concurrent = max_concurrent;
        info!(regime = %regime, max_position_size, max_concurrent, "capital regime updated");
    }

    pub fn record_outcome(&self, record: &OutcomeRecord) {
        self.risk_monitor.record(record.roi);
        if self.risk_monitor.should_kill() {
            self.kill();
        }
    }

    pub fn kill(&self) {
        self.risk_monitor.kill();
        self.set_regime(Regime::Conservative);
        let mut state = self.inner.state.write();
        state.max_concurrent = 0;
        warn!("capital controller kill switch activated");
    }

    pub fn risk_monitor_state(&self) -> RiskMonitorState {
        self.risk_monitor.state()
    }

    pub fn observe_registry_version(&self, version: u64) {
        self.inner.state.write().observed_registry_version = version;
    }
}

// ---------------------------------------------------------------------------
// RiskMonitor — rolling win-rate/drawdown/consecutive-loss circuit breaker
// ---------------------------------------------------------------------------

const MAX_CONSECUTIVE_LOSSES: u32 = 6;
const MAX_DRAWDOWN_PCT: f64 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMonitorState {
    pub win_rate: f64,
    pub consecutive_losses: u32,
    pub drawdown_pct: f64,
    pub killed: bool,
}

struct RiskMonitorInner {
    cumulative_pnl: f64,
    peak_equity: f64,
    consecutive_losses: u32,
    wins: u64,
    losses: u64,
}

pub struct RiskMonitor {
    inner: RwLock<RiskMonitorInner>,
    killed: AtomicBool,
    sample_count: AtomicU64,
}

impl RiskMonitor {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RiskMonitorInner {
                cumulative_pnl: 0.0,
                peak_equity: 0.0,
                consecutive_losses: 0,
                wins: 0,
                losses: 0,
            }),
            killed: AtomicBool::new(false),
            sample_count: AtomicU64::new(0),
        }
    }

    pub fn record(&self, roi: f64) {
        let mut inner = self.inner.write();
        inner.cumulative_pnl += roi;
        if inner.cumulative_pnl > inner.peak_equity {
            inner.peak_equity = inner.cumulative_pnl;
        }
        if roi > 0.0 {
            inner.wins += 1;
            inner.consecutive_losses = 0;
        } else {
            inner.losses += 1;
            inner.consecutive_losses += 1;
        }
        self.sample_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn should_kill(&self) -> bool {
        let inner = self.inner.read();
        let drawdown = if inner.peak_equity > 0.0 {
            (inner.peak_equity - inner.cumulative_pnl) / inner.peak_equity
        } else {
            0.0
        };
        inner.consecutive_losses >= MAX_CONSECUTIVE_LOSSES || drawdown >= MAX_DRAWDOWN_PCT
    }

    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RiskMonitorState {
        let inner = self.inner.read();
        let total = inner.wins + inner.losses;
        let win_rate = if total > 0 {
            inner.wins as f64 / total as f64
        } else {
            0.0
        };
        let drawdown_pct = if inner.peak_equity > 0.0 {
            ((inner.peak_equity - inner.cumulative_pnl) / inner.peak_equity).max(0.0)
        } else {
            0.0
        };
        RiskMonitorState {
            win_rate,
            consecutive_losses: inner.consecutive_losses,
            drawdown_pct,
            killed: self.is_killed(),
        }
    }
}

impl Default for RiskMonitor {
    fn default() -> Self {
        Self::new()
    }
}
