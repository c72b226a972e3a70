// =============================================================================
// EntryGate — mandatory checks before any new position is opened
// =============================================================================
//
// Every gate must pass for an entry to proceed. The first gate that fails
// short-circuits the rest; the blocking reason is returned for logging.
//
// Gates, in order:
//   1. NotKilled         — trading_mode != Killed
//   2. NotPaused         — trading_mode != Paused
//   3. NotDeadRegime     — a Dead market condition blocks new entries
//   4. MaxPositions      — concurrent open positions < limit
//   5. NoDuplicateToken  — no existing position for this token
//   6. RiskOk            — the risk monitor's circuit breaker is clear
//
// Exits are never gated here — a position already open must always be able
// to leave.

use crate::capital::{CapitalState, RiskMonitorState};
use crate::config::EngineConfig;
use crate::market_condition::detector::{ConditionState, MarketCondition};
use crate::types::TradingMode;

pub struct EntryGate;

impl EntryGate {
    /// Returns `None` if every gate passes, or `Some(reason)` for the first
    /// one that blocks.
    pub fn check(
        config: &EngineConfig,
        capital_state: &CapitalState,
        risk: &RiskMonitorState,
        condition: Option<&ConditionState>,
        position_held: bool,
    ) -> Option<String> {
        if config.trading_mode == TradingMode::Killed {
            return Some("trading mode is killed".to_string());
        }
        if config.trading_mode == TradingMode::Paused {
            return Some("trading mode is paused".to_string());
        }
        if condition.map(|c| c.condition) == Some(MarketCondition::Dead) {
            return Some("market condition is dead (pure noise, no edge)".to_string());
        }
        if capital_state.active_positions >= capital_state.max_concurrent {
            return Some(format!(
                "max concurrent positions reached: {} >= {}",
                capital_state.active_positions, capital_state.max_concurrent
            ));
        }
        if position_held {
            return Some("position already open for this token".to_string());
        }
        if risk.killed {
            return Some("risk circuit breaker tripped".to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capital::CapitalState;

    fn capital_state() -> CapitalState {
        CapitalState::new(10.0, crate::capital::Regime::Scaled)
    }

    fn risk(killed: bool) -> RiskMonitorState {
        RiskMonitorState {
            win_rate: 0.5,
            consecutive_losses: 0,
            drawdown_pct: 0.0,
            killed,
        }
    }

    #[test]
    fn killed_mode_blocks_before_anything_else() {
        let mut config = EngineConfig::default();
        config.trading_mode = TradingMode::Killed;
        let reason = EntryGate::check(&config, &capital_state(), &risk(false), None, false);
        assert!(reason.unwrap().contains("killed"));
    }

    #[test]
    fn paused_mode_blocks() {
        let mut config = EngineConfig::default();
        config.trading_mode = TradingMode::Paused;
        let reason = EntryGate::check(&config, &capital_state(), &risk(false), None, false);
        assert!(reason.unwrap().contains("paused"));
    }

    #[test]
    fn live_mode_with_no_obstruction_passes() {
        let mut config = EngineConfig::default();
        config.trading_mode = TradingMode::Live;
        let reason = EntryGate::check(&config, &capital_state(), &risk(false), None, false);
        assert!(reason.is_none());
    }

    #[test]
    fn duplicate_token_blocks() {
        let mut config = EngineConfig::default();
        config.trading_mode = TradingMode::Live;
        let reason = EntryGate::check(&config, &capital_state(), &risk(false), None, true);
        assert!(reason.unwrap().contains("already open"));
    }

    #[test]
    fn risk_kill_switch_blocks() {
        let mut config = EngineConfig::default();
        config.trading_mode = TradingMode::Live;
        let reason = EntryGate::check(&config, &capital_state(), &risk(true), None, false);
        assert!(reason.unwrap().contains("circuit breaker"));
    }
}
