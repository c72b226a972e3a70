// =============================================================================
// Candidate — proposed trade input
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An unvetted token + metrics record produced by an external discovery feed.
///
/// Consumed exactly once by the decision path and discarded after a decision
/// is produced — nothing in the core retains a `Candidate` beyond that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub token: String,
    pub price: f64,
    pub volume_24h: f64,
    pub volume_1h: f64,
    pub liquidity_depth: f64,
    pub age_seconds: u64,
    pub holder_count: u64,
    /// Open-ended bag of additional metrics (e.g. `price_change_5m`,
    /// `sentiment_score`, `copy_overlap_score`). Missing keys are not an
    /// error anywhere downstream — they simply yield zero confidence.
    #[serde(default)]
    pub raw_metrics: HashMap<String, f64>,
}

impl Candidate {
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.raw_metrics.get(key).copied().filter(|v| v.is_finite())
    }
}

/// External feed of candidate tokens. Finite or infinite; the Scheduler does
/// not assume termination.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Blocks until the next candidate is available, or returns `None` when
    /// the source is exhausted (finite sources only).
    async fn poll(&self) -> Option<Candidate>;
}
