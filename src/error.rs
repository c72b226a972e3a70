// =============================================================================
// Error taxonomy
// =============================================================================
//
// Kinds, not an exhaustive hierarchy — each component returns the narrowest
// typed error relevant to it; the Scheduler collapses everything to
// `EngineError` for logging and continuing (see §7 of SPEC_FULL.md).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum DecisionError {
    #[error("fewer than the minimum active signals required")]
    InsufficientSignals,
    #[error("registry snapshot version is stale relative to the capital snapshot")]
    StaleSnapshot,
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CapitalError {
    #[error("insufficient free capital for the requested reservation")]
    InsufficientFreeCapital,
    #[error("maximum concurrent positions reached")]
    MaxConcurrentReached,
    #[error("proposed size exceeds the configured max position size")]
    AboveMaxPositionSize,
    #[error("proposed size would exceed the remaining risk budget")]
    RiskBudgetExceeded,
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ExecError {
    #[error("swap rejected by the executor")]
    Rejected,
    #[error("swap timed out")]
    Timeout,
    #[error("insufficient on-chain liquidity for the requested size")]
    InsufficientLiquidity,
    #[error("RPC endpoint unavailable")]
    RpcUnavailable,
}

impl ExecError {
    /// Whether a retry is worth attempting for this failure.
    pub fn is_retryable(self) -> bool {
        matches!(self, ExecError::Timeout | ExecError::RpcUnavailable)
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CancelError {
    #[error("operation was cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("decision error: {0}")]
    Decision(#[from] DecisionError),
    #[error("capital error: {0}")]
    Capital(#[from] CapitalError),
    #[error("execution error: {0}")]
    Exec(#[from] ExecError),
    #[error("cancelled: {0}")]
    Cancel(#[from] CancelError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
