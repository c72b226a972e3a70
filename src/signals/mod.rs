// =============================================================================
// Signals Module
// =============================================================================
//
// Signal processing pipeline for the trading engine:
// - Typed catalog of signal subtypes with adaptive weights (`registry`)
// - Per-candidate formula evaluation producing strength/confidence readings
//   (`evaluator`)
// - The reading/category vocabulary shared by both (`reading`)

pub mod evaluator;
pub mod reading;
pub mod registry;

pub use evaluator::{evaluate, EvalContext};
pub use reading::{SignalCategory, SignalReading};
pub use registry::{ReadOnlyView, RollingMetrics, SignalRegistry, SignalSubtype};
