//! Order intents emitted by strategies.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::exchange::{Candle, Side};

/// A concrete strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    EmaCrossover,
    MeanReversion,
    Grid,
}

impl StrategyKind {
    pub fn state(&self) -> StrategyState {
        match self {
            StrategyKind::EmaCrossover => StrategyState::EmaCrossover,
            StrategyKind::MeanReversion => StrategyState::MeanReversion,
            StrategyKind::Grid => StrategyState::Grid,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.state().fmt(f)
    }
}

/// State of the per-instrument strategy manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyState {
    EmaCrossover,
    MeanReversion,
    Grid,
    Idle,
}

impl StrategyState {
    /// The strategy that runs in this state, if any.
    pub fn kind(&self) -> Option<StrategyKind> {
        match self {
            StrategyState::EmaCrossover => Some(StrategyKind::EmaCrossover),
            StrategyState::MeanReversion => Some(StrategyKind::MeanReversion),
            StrategyState::Grid => Some(StrategyKind::Grid),
            StrategyState::Idle => None,
        }
    }
}

impl fmt::Display for StrategyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyState::EmaCrossover => "ema_crossover",
            StrategyState::MeanReversion => "mean_reversion",
            StrategyState::Grid => "grid",
            StrategyState::Idle => "idle",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentAction {
    /// Open a new position
    Open,
    /// Close this strategy's position(s) on the instrument
    Close,
}

/// What a strategy wants done. Only the risk manager turns an intent into an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub instrument: String,
    pub action: IntentAction,
    /// Side of the position being opened or closed
    pub side: Side,
    /// Close of the bar the decision was made on
    pub reference_price: Decimal,
    pub strategy: StrategyKind,
    /// Grid level the intent belongs to (grid strategy only)
    pub grid_level: Option<Decimal>,
    /// Composite score at decision time
    pub score: f64,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

impl OrderIntent {
    pub fn open(
        candle: &Candle,
        side: Side,
        strategy: StrategyKind,
        score: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self::build(candle, IntentAction::Open, side, strategy, score, reason)
    }

    pub fn close(
        candle: &Candle,
        side: Side,
        strategy: StrategyKind,
        score: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self::build(candle, IntentAction::Close, side, strategy, score, reason)
    }

    pub fn at_grid_level(mut self, level: Decimal) -> Self {
        self.grid_level = Some(level);
        self
    }

    pub fn is_entry(&self) -> bool {
        self.action == IntentAction::Open
    }

    fn build(
        candle: &Candle,
        action: IntentAction,
        side: Side,
        strategy: StrategyKind,
        score: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            instrument: candle.instrument.clone(),
            action,
            side,
            reference_price: candle.close,
            strategy,
            grid_level: None,
            score,
            timestamp: candle.timestamp,
            reason: reason.into(),
        }
    }
}

/// What the active strategy may know about its own open positions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyContext {
    /// Raw RSI of the current bar
    pub rsi: Option<f64>,
    pub open_long: bool,
    pub open_short: bool,
    /// Entry levels of this instrument's open grid positions
    pub open_grid_levels: Vec<Decimal>,
}

impl StrategyContext {
    pub fn has_open(&self, side: Side) -> bool {
        match side {
            Side::Long => self.open_long,
            Side::Short => self.open_short,
        }
    }
}
