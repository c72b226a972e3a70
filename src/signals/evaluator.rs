// =============================================================================
// SignalEvaluator — pure candidate -> readings scoring
// =============================================================================
//
// Stateless by design: every subtype formula is a function of the candidate,
// an optional closes history, and the latest market condition snapshot for
// the token. Nothing here mutates the registry or retains a candidate past
// the call. Weighting and fusion happen downstream in the decision engine;
// this module only ever produces `strength`/`confidence` pairs.

use crate::candidate::Candidate;
use crate::indicators::{ema, roc, rsi};
use crate::market_condition::detector::{ConditionState, MarketCondition};
use crate::signals::reading::SignalReading;
use crate::signals::registry::ReadOnlyView;

const RSI_PERIOD: usize = 14;
const ROC_PERIOD: usize = 14;
const EMA_MIN_CLOSES: usize = 55;

/// Everything a subtype formula may need beyond the candidate itself.
pub struct EvalContext<'a> {
    pub snapshot: &'a ReadOnlyView,
    /// Closing prices, oldest first. May be shorter than a formula's
    /// look-back requirement, or empty.
    pub price_history: &'a [f64],
    pub condition: Option<&'a ConditionState>,
    pub now_ms: i64,
    /// Cadence the market condition is refreshed on, used to decay
    /// confidence for a condition that has gone stale.
    pub regime_reassessment_seconds: u64,
}

/// Evaluate every subtype present in `ctx.snapshot` against `candidate`,
/// returning one reading per known subtype id. Unknown formulas (a subtype
/// the registry carries but this evaluator has no implementation for yet)
/// are skipped rather than faked.
pub fn evaluate(candidate: &Candidate, ctx: &EvalContext) -> Vec<SignalReading> {
    ctx.snapshot
        .subtypes
        .keys()
        .filter_map(|id| eval_one(id, candidate, ctx).map(|(strength, confidence)| SignalReading {
            subtype_id: id.clone(),
            strength: strength.clamp(-1.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            timestamp_ms: ctx.now_ms,
        }))
        .collect()
}

fn eval_one(subtype_id: &str, candidate: &Candidate, ctx: &EvalContext) -> Option<(f64, f64)> {
    match subtype_id {
        "momentum.price_change" => Some(momentum_price_change(candidate)),
        "momentum.roc" => Some(momentum_roc(candidate, ctx)),
        "technical.trend_alignment" => Some(technical_trend_alignment(ctx)),
        "technical.rsi" => Some(technical_rsi(ctx)),
        "technical.volatility_regime" => Some(technical_volatility_regime(ctx)),
        "volume.volume_to_liquidity" => Some(volume_to_liquidity(candidate)),
        "volume.informed_trading" => Some(volume_informed_trading(candidate)),
        "sentiment.external_score" => Some(passthrough_metric(candidate, "sentiment_score")),
        "copy.smart_wallet_overlap" => Some(passthrough_metric(candidate, "copy_overlap_score")),
        "time_segment.session_bucket" => Some(time_segment_session_bucket(ctx)),
        "context.market_condition" => Some(context_market_condition(ctx)),
        _ => None,
    }
}

/// Blend of 5m/1h/24h price change, weighted toward the freshest window.
/// Rungs missing from `raw_metrics` reduce confidence proportionally rather
/// than failing the whole reading.
fn momentum_price_change(candidate: &Candidate) -> (f64, f64) {
    let rungs: [(&str, f64); 3] = [
        ("price_change_5m", 0.5),
        ("price_change_1h", 0.3),
        ("price_change_24h", 0.2),
    ];

    let mut weighted_sum = 0.0;
    let mut weight_present = 0.0;
    let mut present_count = 0;

    for (key, weight) in rungs {
        if let Some(pct) = candidate.metric(key) {
            // +/-20% treated as full-strength saturation for a single rung.
            weighted_sum += weight * (pct / 20.0);
            weight_present += weight;
            present_count += 1;
        }
    }

    if present_count == 0 {
        return (0.0, 0.0);
    }

    let strength = weighted_sum / weight_present;
    let confidence = present_count as f64 / rungs.len() as f64;
    (strength, confidence)
}

/// Rate-of-change over the closes history when enough samples exist,
/// otherwise falls back to the candidate's 1h price-change metric.
fn momentum_roc(candidate: &Candidate, ctx: &EvalContext) -> (f64, f64) {
    if let Some(value) = roc::current_roc(ctx.price_history, ROC_PERIOD) {
        let strength = (value / 20.0).tanh();
        return (strength, 0.9);
    }

    match candidate.metric("price_change_1h") {
        Some(pct) => ((pct / 20.0).tanh(), 0.4),
        None => (0.0, 0.0),
    }
}

/// EMA9/21/55 monotonic alignment. Needs a full 55-close history; anything
/// shorter yields zero confidence rather than a guessed direction.
fn technical_trend_alignment(ctx: &EvalContext) -> (f64, f64) {
    if ctx.price_history.len() < EMA_MIN_CLOSES {
        return (0.0, 0.0);
    }
    match ema::ema_trend_aligned(ctx.price_history) {
        Some((is_bullish, strength)) => {
            let signed = if is_bullish { strength } else { -strength };
            (signed, 0.85)
        }
        None => (0.0, 0.15),
    }
}

fn technical_rsi(ctx: &EvalContext) -> (f64, f64) {
    match rsi::current_rsi(ctx.price_history, RSI_PERIOD) {
        Some((value, _)) => (((value - 50.0) / 50.0), 1.0),
        None => (0.0, 0.0),
    }
}

/// Reads the same `ConditionState` as `context.market_condition` but through
/// a BBW-centric lens: wide bands score as expansion, tight bands as
/// compression. Distinct subtype, same underlying state, per the catalog.
fn technical_volatility_regime(ctx: &EvalContext) -> (f64, f64) {
    let Some(state) = ctx.condition else {
        return (0.0, 0.0);
    };
    // BBW of ~3.0 treated as neutral center; saturate by +/-5.
    let strength = ((state.bbw - 3.0) / 5.0).clamp(-1.0, 1.0);
    (strength, decayed_confidence(state, ctx))
}

fn volume_to_liquidity(candidate: &Candidate) -> (f64, f64) {
    if candidate.liquidity_depth <= 0.0 {
        return (0.0, 0.0);
    }
    let ratio = candidate.volume_24h / candidate.liquidity_depth;
    // Healthy band centered around ratio == 1.0; a bounded logistic keeps
    // extreme ratios from dominating the fused score.
    let strength = 2.0 / (1.0 + (-(ratio - 1.0)).exp()) - 1.0;
    (strength, 0.8)
}

/// One-shot buy/sell volume imbalance in place of a trade-by-trade bucketed
/// VPIN estimate, since only candidate-level aggregates are available here.
fn volume_informed_trading(candidate: &Candidate) -> (f64, f64) {
    let (Some(buy), Some(sell)) = (candidate.metric("buy_volume"), candidate.metric("sell_volume")) else {
        return (0.0, 0.0);
    };
    let total = buy + sell;
    if total <= 0.0 {
        return (0.0, 0.0);
    }
    ((buy - sell) / total, 0.7)
}

fn passthrough_metric(candidate: &Candidate, key: &str) -> (f64, f64) {
    match candidate.metric(key) {
        Some(value) => (value.clamp(-1.0, 1.0), 1.0),
        None => (0.0, 0.0),
    }
}

/// Weakest signal in the catalog by design: a fixed hour-of-day lookup with
/// no adaptive component beyond the registry's own weight.
fn time_segment_session_bucket(ctx: &EvalContext) -> (f64, f64) {
    let hour_of_day = ((ctx.now_ms / 1000 / 3600) % 24).rem_euclid(24);
    // Loosely favors the hours overlapping US + EU trading overlap.
    let strength = match hour_of_day {
        13..=20 => 0.4,
        21..=23 | 0..=4 => -0.2,
        _ => 0.0,
    };
    (strength, 0.3)
}

fn context_market_condition(ctx: &EvalContext) -> (f64, f64) {
    let Some(state) = ctx.condition else {
        return (0.0, 0.0);
    };
    let strength = match state.condition {
        MarketCondition::Trending => 0.6,
        MarketCondition::Squeeze => 0.3,
        MarketCondition::Ranging => 0.0,
        MarketCondition::Volatile => -0.3,
        MarketCondition::Dead => -1.0,
    };
    (strength, decayed_confidence(state, ctx))
}

/// Decays a condition's own confidence as it ages past twice the refresh
/// cadence, so a stalled classifier doesn't keep feeding full-strength
/// readings into the fusion formula forever.
fn decayed_confidence(state: &ConditionState, ctx: &EvalContext) -> f64 {
    let stale_after = (ctx.regime_reassessment_seconds.max(1) as f64) * 2.0;
    if state.condition_age_secs <= 0.0 {
        return state.confidence;
    }
    let decay = (stale_after / (stale_after + state.condition_age_secs)).clamp(0.0, 1.0);
    state.confidence * decay
}
