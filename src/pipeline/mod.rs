//! The decision pipeline shared by live trading and replay.
//!
//! Candle -> indicators -> composite signal -> regime -> strategy -> risk.

mod decision;
mod live;

pub use decision::{Decision, DecisionCore, PipelineError};
pub use live::{plan_candle, LiveRunner, Submission};
