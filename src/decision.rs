// =============================================================================
// DecisionEngine — fuses signal readings into a buy/sell/hold/defer/reject
// action plus sizing and exit levels
// =============================================================================

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capital::{CapitalState, Regime};
use crate::error::DecisionError;
use crate::market_condition::detector::ConditionState;
use crate::signals::reading::SignalReading;
use crate::signals::registry::ReadOnlyView;
use crate::strategy::{StrategyMatrix, StrategyTemplate};

pub const MIN_ACTIVE_SIGNALS: usize = 2;
const CONFIDENCE_ACTIVE_THRESHOLD: f64 = 0.5;
const BUY_SCORE_THRESHOLD: f64 = 0.3;
const SELL_SCORE_THRESHOLD: f64 = -0.3;
const DEFER_SCORE_THRESHOLD: f64 = 0.15;
const REJECT_SCORE_THRESHOLD: f64 = -0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Buy,
    Sell,
    Defer,
    Reject,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Normal,
    Elevated,
    Extreme,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub token: String,
    pub action: Action,
    pub score: f64,
    pub confidence_out: f64,
    pub risk_level: RiskLevel,
    pub cluster_id: String,
    pub size_fraction: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub trailing_percent: f64,
    pub max_hold_secs: u64,
}

/// Fuse readings into `(score, confidence_out)` per §4.3's formula. Ties in
/// fusion order are broken by lexicographic subtype_id so the result is
/// deterministic regardless of input ordering.
fn fuse(readings: &[SignalReading], snapshot: &ReadOnlyView) -> (f64, f64) {
    let mut sorted: Vec<&SignalReading> = readings.iter().collect();
    sorted.sort_by(|a, b| a.subtype_id.cmp(&b.subtype_id));

    let mut weighted_strength_sum = 0.0;
    let mut weighted_confidence_sum = 0.0;
    let mut weight_sum = 0.0;

    for reading in &sorted {
        let weight = snapshot.weight_of(&reading.subtype_id);
        weighted_strength_sum += weight * reading.strength * reading.confidence;
        weighted_confidence_sum += weight * reading.confidence;
        weight_sum += weight;
    }

    let score = if weighted_confidence_sum.abs() > f64::EPSILON {
        (weighted_strength_sum / weighted_confidence_sum).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let confidence_out = if weight_sum.abs() > f64::EPSILON {
        100.0 * (weighted_confidence_sum / weight_sum)
    } else {
        0.0
    };

    (score, confidence_out)
}

/// Dispersion across categories among active readings; wide disagreement
/// raises `risk_level` independent of the fused score.
fn dispersion(readings: &[SignalReading]) -> f64 {
    let active: Vec<f64> = readings
        .iter()
        .filter(|r| r.is_active())
        .map(|r| r.strength)
        .collect();
    if active.len() < 2 {
        return 0.0;
    }
    let mean = active.iter().sum::<f64>() / active.len() as f64;
    let variance = active.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / active.len() as f64;
    variance.sqrt()
}

fn derive_risk_level(volatility: f64, dispersion: f64) -> RiskLevel {
    let combined = volatility.max(0.0) + dispersion;
    if combined >= 1.4 {
        RiskLevel::Extreme
    } else if combined >= 0.9 {
        RiskLevel::Elevated
    } else if combined >= 0.4 {
        RiskLevel::Normal
    } else {
        RiskLevel::Low
    }
}

fn regime_threshold(regime: Regime) -> f64 {
    match regime {
        Regime::Conservative => 65.0,
        Regime::Scaled => 55.0,
        Regime::Hyper => 45.0,
    }
}

fn regime_multiplier(regime: Regime) -> f64 {
    match regime {
        Regime::Conservative => 0.3,
        Regime::Scaled => 1.0,
        Regime::Hyper => 2.0,
    }
}

pub struct DecisionEngine<'a> {
    pub strategy_matrix: &'a StrategyMatrix,
    pub base_size_fraction: f64,
    pub min_size_fraction: f64,
    pub max_size_fraction: f64,
    pub default_volatility: f64,
}

impl<'a> DecisionEngine<'a> {
    /// Evaluate a fused set of readings against the current capital snapshot
    /// and condition, producing a `Decision`.
    pub fn decide(
        &self,
        token: &str,
        readings: &[SignalReading],
        snapshot: &ReadOnlyView,
        capital: &CapitalState,
        condition: Option<&ConditionState>,
        raw_volatility_metric: Option<f64>,
        position_held: bool,
    ) -> Result<Decision, DecisionError> {
        let active_count = readings.iter().filter(|r| r.is_active()).count();
        if active_count < MIN_ACTIVE_SIGNALS {
            return Err(DecisionError::InsufficientSignals);
        }
        if snapshot.version != capital.observed_registry_version {
            return Err(DecisionError::StaleSnapshot);
        }

        let (score, confidence_out) = fuse(readings, snapshot);

        let volatility = condition
            .map(|c| c.bbw / 5.0)
            .or(raw_volatility_metric)
            .unwrap_or(self.default_volatility);
        let risk_level = derive_risk_level(volatility, dispersion(readings));

        let active_subtypes: HashSet<String> = readings
            .iter()
            .filter(|r| r.confidence > CONFIDENCE_ACTIVE_THRESHOLD)
            .map(|r| r.subtype_id.clone())
            .collect();
        let (cluster_id, template, match_score) = self.strategy_matrix.best_strategy(&active_subtypes);

        let threshold = regime_threshold(capital.regime);
        let action = self.choose_action(score, confidence_out, threshold, risk_level, position_held);

        // Widen stop/target distance on volatile tokens, tighten on quiet
        // ones, relative to the engine's baseline volatility assumption.
        let volatility_factor = (volatility / self.default_volatility.max(f64::EPSILON)).clamp(0.5, 2.0);

        let size_fraction = match action {
            Action::Buy => {
                let confidence_factor = (confidence_out / 100.0).clamp(0.0, 1.0);
                let raw = self.base_size_fraction
                    * confidence_factor
                    * regime_multiplier(capital.regime)
                    * template.size_multiplier;
                raw.clamp(self.min_size_fraction, self.max_size_fraction)
            }
            _ => 0.0,
        };

        debug!(
            token,
            score,
            confidence_out,
            cluster_id = %cluster_id,
            match_score,
            action = ?action,
            size_fraction,
            "decision produced"
        );

        let current_price_hint = 1.0_f64; // levels below are expressed as fractions of entry
        Ok(Decision {
            token: token.to_string(),
            action,
            score,
            confidence_out,
            risk_level,
            cluster_id,
            size_fraction,
            stop_price: current_price_hint * (1.0 - template.stop_pct * volatility_factor),
            target_price: current_price_hint * (1.0 + template.target_pct * volatility_factor),
            trailing_percent: template.trailing_percent,
            max_hold_secs: template.max_hold_secs,
        })
    }

    /// Ordered exactly as the decision table specifies: buy, then sell, then
    /// defer, then reject, then hold. Earlier rules win on overlap — e.g. a
    /// deep-negative score that also clears the buy bar still reads `buy`,
    /// since that rule is checked first.
    fn choose_action(
        &self,
        score: f64,
        confidence_out: f64,
        threshold: f64,
        risk_level: RiskLevel,
        position_held: bool,
    ) -> Action {
        if score >= BUY_SCORE_THRESHOLD && confidence_out >= threshold {
            return Action::Buy;
        }
        if score <= SELL_SCORE_THRESHOLD && position_held {
            return Action::Sell;
        }
        if score >= DEFER_SCORE_THRESHOLD && confidence_out >= threshold - 10.0 && confidence_out < threshold {
            return Action::Defer;
        }
        if score <= REJECT_SCORE_THRESHOLD || matches!(risk_level, RiskLevel::Extreme) {
            return Action::Reject;
        }
        Action::Hold
    }
}

/// Scales a strategy template's fractional stop/target levels into absolute
/// prices around a concrete entry price. Kept separate from `decide` since
/// the decision engine itself works in fractional space (§4.3 specifies
/// "stop/target levels come from the selected strategy template, scaled by
/// volatility") and only the position manager knows the real entry price.
pub fn absolute_levels(entry_price: f64, template: &StrategyTemplate) -> (f64, f64) {
    (
        entry_price * (1.0 - template.stop_pct),
        entry_price * (1.0 + template.target_pct),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::registry::SignalRegistry;

    fn reading(id: &str, strength: f64, confidence: f64) -> SignalReading {
        SignalReading {
            subtype_id: id.to_string(),
            strength,
            confidence,
            timestamp_ms: 0,
        }
    }

    fn engine(matrix: &StrategyMatrix) -> DecisionEngine<'_> {
        DecisionEngine {
            strategy_matrix: matrix,
            base_size_fraction: 0.1,
            min_size_fraction: 0.01,
            max_size_fraction: 0.5,
            default_volatility: 0.2,
        }
    }

    fn capital(regime: Regime, version: u64) -> CapitalState {
        CapitalState {
            total_base: 10.0,
            reserved_base: 0.0,
            free_base: 10.0,
            active_positions: 0,
            max_position_size: 5.0,
            max_concurrent: 5,
            risk_budget_base: 10.0,
            regime,
            observed_registry_version: version,
        }
    }

    #[test]
    fn insufficient_signals_rejected() {
        let registry = SignalRegistry::seeded();
        let snapshot = registry.snapshot();
        let matrix = StrategyMatrix::seeded();
        let readings = vec![reading("momentum.price_change", 0.8, 0.9)];
        let result = engine(&matrix).decide(
            "TOKA",
            &readings,
            &snapshot,
            &capital(Regime::Scaled, snapshot.version),
            None,
            None,
            false,
        );
        assert_eq!(result.unwrap_err(), DecisionError::InsufficientSignals);
    }

    #[test]
    fn stale_snapshot_detected() {
        let registry = SignalRegistry::seeded();
        let snapshot = registry.snapshot();
        let matrix = StrategyMatrix::seeded();
        let readings = vec![
            reading("momentum.price_change", 0.8, 0.9),
            reading("volume.volume_to_liquidity", 0.6, 0.8),
        ];
        let result = engine(&matrix).decide(
            "TOKA",
            &readings,
            &snapshot,
            &capital(Regime::Scaled, snapshot.version + 1),
            None,
            None,
            false,
        );
        assert_eq!(result.unwrap_err(), DecisionError::StaleSnapshot);
    }

    #[test]
    fn strong_positive_signals_produce_buy() {
        let registry = SignalRegistry::seeded();
        registry.apply_update(&[("momentum.price_change".to_string(), 1.0)].into_iter().collect());
        let snapshot = registry.snapshot();
        let matrix = StrategyMatrix::seeded();
        let readings = vec![
            reading("momentum.price_change", 0.9, 0.95),
            reading("momentum.roc", 0.8, 0.9),
            reading("technical.trend_alignment", 0.85, 0.9),
        ];
        let decision = engine(&matrix)
            .decide(
                "TOKA",
                &readings,
                &snapshot,
                &capital(Regime::Hyper, snapshot.version),
                None,
                None,
                false,
            )
            .unwrap();
        assert_eq!(decision.action, Action::Buy);
        assert!(decision.size_fraction > 0.0);
    }

    #[test]
    fn higher_volatility_widens_stop_and_target_distance() {
        let registry = SignalRegistry::seeded();
        registry.apply_update(&[("momentum.price_change".to_string(), 1.0)].into_iter().collect());
        let snapshot = registry.snapshot();
        let matrix = StrategyMatrix::seeded();
        let readings = vec![
            reading("momentum.price_change", 0.9, 0.95),
            reading("momentum.roc", 0.8, 0.9),
            reading("technical.trend_alignment", 0.85, 0.9),
        ];
        let capital_state = capital(Regime::Hyper, snapshot.version);

        let calm = engine(&matrix)
            .decide("TOKA", &readings, &snapshot, &capital_state, None, Some(0.2), false)
            .unwrap();
        let volatile = engine(&matrix)
            .decide("TOKA", &readings, &snapshot, &capital_state, None, Some(0.8), false)
            .unwrap();

        let calm_stop_distance = 1.0 - calm.stop_price;
        let volatile_stop_distance = 1.0 - volatile.stop_price;
        assert!(volatile_stop_distance > calm_stop_distance);

        let calm_target_distance = calm.target_price - 1.0;
        let volatile_target_distance = volatile.target_price - 1.0;
        assert!(volatile_target_distance > calm_target_distance);
    }

    #[test]
    fn reject_action_has_zero_size() {
        let registry = SignalRegistry::seeded();
        let snapshot = registry.snapshot();
        let matrix = StrategyMatrix::seeded();
        let readings = vec![
            reading("momentum.price_change", -0.9, 0.95),
            reading("momentum.roc", -0.8, 0.9),
        ];
        let decision = engine(&matrix)
            .decide(
                "TOKA",
                &readings,
                &snapshot,
                &capital(Regime::Conservative, snapshot.version),
                None,
                None,
                false,
            )
            .unwrap();
        assert_eq!(decision.action, Action::Reject);
        assert_eq!(decision.size_fraction, 0.0);
    }

    #[test]
    fn buy_signal_wins_over_extreme_risk_per_literal_priority_order() {
        // Per the decision table's literal order, `buy` is checked before
        // `reject` — a score/confidence pair that clears the buy bar reads
        // `buy` even under an extreme risk_level.
        let registry = SignalRegistry::seeded();
        registry.apply_update(&[("momentum.price_change".to_string(), 1.0)].into_iter().collect());
        let snapshot = registry.snapshot();
        let matrix = StrategyMatrix::seeded();
        let readings = vec![
            reading("momentum.price_change", 0.9, 0.95),
            reading("momentum.roc", 0.8, 0.9),
            reading("technical.trend_alignment", 0.85, 0.9),
        ];
        let state = ConditionState {
            condition: crate::market_condition::detector::MarketCondition::Volatile,
            adx: 30.0,
            bbw: 20.0,
            hurst: 0.5,
            entropy: 0.5,
            confidence: 1.0,
            condition_age_secs: 0.0,
            recommended_rr: (2.5, 1.0),
            max_position_pct: 40.0,
        };
        let decision = engine(&matrix)
            .decide(
                "TOKA",
                &readings,
                &snapshot,
                &capital(Regime::Hyper, snapshot.version),
                Some(&state),
                None,
                false,
            )
            .unwrap();
        assert_eq!(decision.action, Action::Buy);
    }

    #[test]
    fn extreme_risk_rejects_when_no_earlier_rule_matches() {
        // A near-neutral score clears no buy/sell/defer threshold, so an
        // extreme risk_level is what decides the outcome.
        let registry = SignalRegistry::seeded();
        let snapshot = registry.snapshot();
        let matrix = StrategyMatrix::seeded();
        let readings = vec![
            reading("momentum.price_change", 0.1, 0.9),
            reading("momentum.roc", -0.1, 0.9),
        ];
        let state = ConditionState {
            condition: crate::market_condition::detector::MarketCondition::Volatile,
            adx: 30.0,
            bbw: 20.0,
            hurst: 0.5,
            entropy: 0.5,
            confidence: 1.0,
            condition_age_secs: 0.0,
            recommended_rr: (2.5, 1.0),
            max_position_pct: 40.0,
        };
        let decision = engine(&matrix)
            .decide(
                "TOKA",
                &readings,
                &snapshot,
                &capital(Regime::Hyper, snapshot.version),
                Some(&state),
                None,
                false,
            )
            .unwrap();
        assert_eq!(decision.action, Action::Reject);
    }
}
