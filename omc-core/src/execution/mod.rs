//! Execution Engine (C5): gate → dedupe → reserve → quantize/validate →
//! persist → submit → finalize for each approved intent, plus the
//! per-cycle stale-order cancel sweep.

pub mod context;
pub mod engine;
pub mod report;

pub use context::{reason_code, SafetyContext};
pub use engine::ExecutionEngine;
pub use report::CycleReport;
