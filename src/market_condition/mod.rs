// =============================================================================
// Market Condition Module
// =============================================================================
//
// Ambient, non-authoritative classification of a token's recent volatility /
// trend regime using multiple quantitative indicators:
// - ADX (trend strength)
// - Bollinger Band Width (volatility expansion/contraction)
// - Hurst exponent (persistence vs mean-reversion)
// - Shannon entropy (randomness / information content)
//
// This is distinct from `capital::Regime` (conservative/scaled/hyper), which
// modulates position sizing. MarketCondition informs the DecisionEngine's
// volatility scaling and the Scheduler's regime-reassessment input.

pub mod detector;
pub mod entropy;
pub mod hurst;

pub use detector::{ConditionState, MarketCondition, MarketConditionMonitor};
pub use entropy::ShannonEntropyFilter;
pub use hurst::calculate_hurst_exponent;
