// =============================================================================
// Market Condition Monitor
// =============================================================================
//
// Classifies a token's recent price action into one of five conditions using a
// multi-factor approach. Each condition carries recommended risk parameters
// (R:R ratio and maximum position size) that the DecisionEngine and
// StrategyMatrix can read when scaling stop/target distance.
//
// Detection hierarchy (evaluated top-to-bottom; first match wins):
//
//   1. DEAD      — Entropy >= 0.95 (pure noise, no edge)
//   2. VOLATILE  — BBW > 5.0       (extreme volatility expansion)
//   3. SQUEEZE   — BBW < 1.5 AND ADX < 20 (compression, pre-breakout)
//   4. TRENDING  — ADX > 25 AND Hurst > 0.55 (persistent directional move)
//   5. RANGING   — ADX < 20 AND Hurst < 0.45 (mean-reverting chop)
//
// If no rule fires, the condition defaults to RANGING with low confidence.
//
// This is tracked per token (unlike the upstream system this generalizes from,
// which tracked one regime for the whole process) since each candidate token
// has its own independent price history.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::indicators::adx::calculate_adx;
use crate::indicators::bollinger::calculate_bollinger;
use crate::market_condition::entropy::ShannonEntropyFilter;
use crate::market_condition::hurst::calculate_hurst_exponent;
use crate::market_data::Candle;

// =============================================================================
// Types
// =============================================================================

/// Coarse classification of a token's recent volatility / trend behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketCondition {
    /// Strong directional move with persistence.
    Trending,
    /// Sideways chop — mean-reverting price action.
    Ranging,
    /// Extreme volatility expansion — wide swings.
    Volatile,
    /// Low-volatility compression — potential breakout imminent.
    Squeeze,
    /// Near-maximum entropy — market behaves as random noise.
    Dead,
}

impl std::fmt::Display for MarketCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trending => write!(f, "TRENDING"),
            Self::Ranging => write!(f, "RANGING"),
            Self::Volatile => write!(f, "VOLATILE"),
            Self::Squeeze => write!(f, "SQUEEZE"),
            Self::Dead => write!(f, "DEAD"),
        }
    }
}

/// Complete snapshot of a token's detected condition plus contributing metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionState {
    pub condition: MarketCondition,
    pub adx: f64,
    pub bbw: f64,
    pub hurst: f64,
    pub entropy: f64,
    /// Confidence in the classification, [0.0, 1.0].
    pub confidence: f64,
    /// Number of seconds the current condition has been active.
    pub condition_age_secs: f64,
    /// Recommended reward : risk ratio for this condition.
    pub recommended_rr: (f64, f64),
    /// Maximum position size as a percentage of available equity.
    pub max_position_pct: f64,
}

impl MarketCondition {
    /// Returns `(recommended_rr, max_position_pct)` for this condition.
    pub fn risk_params(self) -> ((f64, f64), f64) {
        match self {
            Self::Trending => ((3.0, 1.0), 100.0),
            Self::Ranging => ((1.5, 1.0), 60.0),
            Self::Volatile => ((2.5, 1.0), 40.0),
            Self::Squeeze => ((4.0, 1.0), 30.0),
            Self::Dead => ((0.0, 0.0), 0.0),
        }
    }
}

// =============================================================================
// MarketConditionMonitor
// =============================================================================

/// Thread-safe, per-token condition monitor. Wrapped in an `Arc` and shared
/// across the Scheduler's periodic market-condition-refresh task.
pub struct MarketConditionMonitor {
    states: RwLock<HashMap<String, ConditionState>>,
    last_change_time: RwLock<HashMap<String, Instant>>,
}

impl MarketConditionMonitor {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            last_change_time: RwLock::new(HashMap::new()),
        }
    }

    /// Run full condition detection for `token` on the provided candles.
    ///
    /// Returns the freshly computed [`ConditionState`], or `None` when input
    /// data is insufficient for the underlying indicators (e.g. too few
    /// candles accumulated yet for this token).
    pub fn detect(&self, token: &str, candles: &[Candle]) -> Option<ConditionState> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let adx_value = calculate_adx(candles, 14).unwrap_or(0.0);
        let bb_result = calculate_bollinger(&closes, 20, 2.0)?;
        let bbw_value = bb_result.width;
        let hurst_value = calculate_hurst_exponent(&closes).unwrap_or(0.50);
        let entropy_value = ShannonEntropyFilter::calculate(candles, 50).unwrap_or(0.0);

        let (condition, confidence) = classify(adx_value, bbw_value, hurst_value, entropy_value);
        let (recommended_rr, max_position_pct) = condition.risk_params();

        let now = Instant::now();
        let prev_condition = self.states.read().get(token).map(|s| s.condition);
        if prev_condition != Some(condition) {
            self.last_change_time.write().insert(token.to_string(), now);
        }
        let condition_age_secs = now
            .duration_since(
                *self
                    .last_change_time
                    .read()
                    .get(token)
                    .unwrap_or(&now),
            )
            .as_secs_f64();

        let new_state = ConditionState {
            condition,
            adx: adx_value,
            bbw: bbw_value,
            hurst: hurst_value,
            entropy: entropy_value,
            confidence,
            condition_age_secs,
            recommended_rr,
            max_position_pct,
        };

        debug!(
            token = %token,
            condition = %condition,
            adx = format!("{:.2}", adx_value),
            bbw = format!("{:.2}", bbw_value),
            hurst = format!("{:.4}", hurst_value),
            entropy = format!("{:.4}", entropy_value),
            confidence = format!("{:.2}", confidence),
            "market condition detected"
        );

        self.states.write().insert(token.to_string(), new_state.clone());
        Some(new_state)
    }

    /// Return the most recently detected condition for a token, if any.
    pub fn current(&self, token: &str) -> Option<ConditionState> {
        self.states.read().get(token).cloned()
    }

    /// Average BBW across all tracked tokens, used as the Scheduler's
    /// volatility input for regime reassessment. Returns `None` if no token
    /// has been classified yet.
    pub fn aggregate_volatility(&self) -> Option<f64> {
        let states = self.states.read();
        if states.is_empty() {
            return None;
        }
        let sum: f64 = states.values().map(|s| s.bbw).sum();
        Some(sum / states.len() as f64)
    }
}

impl Default for MarketConditionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Classification logic
// =============================================================================

fn classify(adx: f64, bbw: f64, hurst: f64, entropy: f64) -> (MarketCondition, f64) {
    if entropy >= 0.95 {
        let confidence = remap(entropy, 0.95, 1.0, 0.70, 1.0);
        return (MarketCondition::Dead, confidence);
    }

    if bbw > 5.0 {
        let confidence = remap(bbw, 5.0, 10.0, 0.65, 1.0);
        return (MarketCondition::Volatile, confidence);
    }

    if bbw < 1.5 && adx < 20.0 {
        let bbw_conf = remap(bbw, 1.5, 0.5, 0.50, 1.0);
        let adx_conf = remap(adx, 20.0, 5.0, 0.50, 1.0);
        let confidence = (bbw_conf + adx_conf) / 2.0;
        return (MarketCondition::Squeeze, confidence);
    }

    if adx > 25.0 && hurst > 0.55 {
        let adx_conf = remap(adx, 25.0, 50.0, 0.60, 1.0);
        let hurst_conf = remap(hurst, 0.55, 0.80, 0.60, 1.0);
        let confidence = (adx_conf + hurst_conf) / 2.0;
        return (MarketCondition::Trending, confidence);
    }

    if adx < 20.0 && hurst < 0.45 {
        let adx_conf = remap(adx, 20.0, 5.0, 0.50, 1.0);
        let hurst_conf = remap(hurst, 0.45, 0.20, 0.50, 1.0);
        let confidence = (adx_conf + hurst_conf) / 2.0;
        return (MarketCondition::Ranging, confidence);
    }

    trace!(
        adx = format!("{:.2}", adx),
        bbw = format!("{:.2}", bbw),
        hurst = format!("{:.4}", hurst),
        entropy = format!("{:.4}", entropy),
        "no classification rule matched, defaulting to RANGING"
    );
    (MarketCondition::Ranging, 0.30)
}

fn remap(value: f64, in_lo: f64, in_hi: f64, out_lo: f64, out_hi: f64) -> f64 {
    let t = if (in_hi - in_lo).abs() < f64::EPSILON {
        0.5
    } else {
        (value - in_lo) / (in_hi - in_lo)
    };
    let clamped = t.clamp(0.0, 1.0);
    out_lo + clamped * (out_hi - out_lo)
}
