//! Strategy modules and regime-driven dispatch.
//!
//! - `ema_crossover`: trend following on EMA crosses
//! - `mean_reversion`: Bollinger band reversion with RSI confirmation
//! - `grid`: buy-the-dip grid over the recent range
//! - `manager`: maps regime to the one active strategy
//!
//! Strategies only emit [`OrderIntent`]s; positions belong to the risk manager.

mod ema_crossover;
mod grid;
mod intent;
mod manager;
mod mean_reversion;

pub use ema_crossover::EmaCrossover;
pub use grid::Grid;
pub use intent::{IntentAction, OrderIntent, StrategyContext, StrategyKind, StrategyState};
pub use manager::{Strategy, StrategyHandle, StrategyManager};
pub use mean_reversion::MeanReversion;
