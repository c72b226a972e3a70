// =============================================================================
// OutcomeRecord — immutable closure artifact of a position
// =============================================================================

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signals::reading::SignalReading;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    Target,
    Stop,
    Trailing,
    Time,
    Manual,
    Error,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Target => "target",
            Self::Stop => "stop",
            Self::Trailing => "trailing",
            Self::Time => "time",
            Self::Manual => "manual",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub position_id: Uuid,
    pub cluster_id: String,
    pub readings: Vec<SignalReading>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl_base: f64,
    pub roi: f64,
    pub hold_duration_secs: f64,
    pub exit_reason: ExitReason,
    pub slippage_in: f64,
    pub slippage_out: f64,
}

impl OutcomeRecord {
    pub fn win(&self) -> bool {
        self.roi > 0.0
    }
}
