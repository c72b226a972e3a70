use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalCategory {
    Momentum,
    Sentiment,
    Volume,
    Technical,
    Copy,
    TimeSegment,
    Context,
}

/// One subtype's read on a single candidate. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalReading {
    pub subtype_id: String,
    /// In `[-1, 1]`.
    pub strength: f64,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub timestamp_ms: i64,
}

impl SignalReading {
    pub fn is_active(&self) -> bool {
        self.confidence > 0.0
    }
}
