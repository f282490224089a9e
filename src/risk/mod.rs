//! Risk management: approval, sizing, position lifecycle and the daily breaker.
//!
//! - Sizes every entry and checks it against allocation limits
//! - Tracks positions through staged take-profits and a trailing runner
//! - Accumulates realized losses per UTC day and trips the circuit breaker
//!
//! All mutable data lives in [`RiskState`]; [`RiskManager`] is stateless policy.

mod daily;
mod ledger;
mod manager;
mod position;
mod sizing;

pub use daily::DailyRiskState;
pub use ledger::CapitalLedger;
pub use manager::{
    Approval, EntryRetry, ExitFill, ExitOrder, RiskManager, RiskRejection, RiskState,
    SharedRiskState, WorkingOrder,
};
pub use position::{ExitApplied, ExitPlan, ExitReason, ExitSignal, Position, PositionState};
pub use sizing::{position_size, SizingInput};
