//! Regime-driven strategy selection.

use std::collections::BTreeMap;
use tracing::info;

use super::ema_crossover::EmaCrossover;
use super::grid::Grid;
use super::intent::{OrderIntent, StrategyContext, StrategyKind, StrategyState};
use super::mean_reversion::MeanReversion;
use crate::config::{IndicatorConfig, StrategyConfig};
use crate::exchange::Candle;
use crate::regime::Regime;
use crate::signal::CompositeSignal;

/// The closed set of strategies, all sharing one evaluate contract.
#[derive(Debug, Clone)]
pub enum Strategy {
    EmaCrossover(EmaCrossover),
    MeanReversion(MeanReversion),
    Grid(Grid),
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::EmaCrossover(_) => StrategyKind::EmaCrossover,
            Strategy::MeanReversion(_) => StrategyKind::MeanReversion,
            Strategy::Grid(_) => StrategyKind::Grid,
        }
    }

    /// Advance the strategy's internal memory by one candle.
    pub fn update(&mut self, candle: &Candle) {
        match self {
            Strategy::EmaCrossover(s) => s.update(candle),
            Strategy::MeanReversion(s) => s.update(candle),
            Strategy::Grid(s) => s.update(candle),
        }
    }

    pub fn evaluate(
        &self,
        candle: &Candle,
        composite: &CompositeSignal,
        ctx: &StrategyContext,
    ) -> Option<OrderIntent> {
        match self {
            Strategy::EmaCrossover(s) => s.evaluate(candle, composite, ctx),
            Strategy::MeanReversion(s) => s.evaluate(candle, composite, ctx),
            Strategy::Grid(s) => s.evaluate(candle, composite, ctx),
        }
    }
}

/// Result of a selection: the active state and what it replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyHandle {
    pub state: StrategyState,
    pub previous: StrategyState,
}

impl StrategyHandle {
    pub fn switched(&self) -> bool {
        self.state != self.previous
    }

    pub fn kind(&self) -> Option<StrategyKind> {
        self.state.kind()
    }
}

/// Owns one instrument's strategies and picks the active one per regime.
///
/// Every strategy observes every candle so a newly selected strategy starts
/// with warm memory. Switching never touches open positions.
#[derive(Debug, Clone)]
pub struct StrategyManager {
    instrument: String,
    regime_map: BTreeMap<Regime, StrategyState>,
    pinned: Option<StrategyKind>,
    strategies: BTreeMap<StrategyKind, Strategy>,
    active: StrategyState,
}

impl StrategyManager {
    pub fn new(instrument: impl Into<String>, config: &StrategyConfig, indicators: &IndicatorConfig) -> Self {
        let strategies = BTreeMap::from([
            (
                StrategyKind::EmaCrossover,
                Strategy::EmaCrossover(EmaCrossover::new(config.ema_crossover.clone())),
            ),
            (
                StrategyKind::MeanReversion,
                Strategy::MeanReversion(MeanReversion::new(
                    config.mean_reversion.clone(),
                    indicators.rsi_oversold,
                    indicators.rsi_overbought,
                )),
            ),
            (StrategyKind::Grid, Strategy::Grid(Grid::new(config.grid.clone()))),
        ]);

        Self {
            instrument: instrument.into(),
            regime_map: config.regime_map.clone(),
            pinned: config.pinned,
            strategies,
            active: StrategyState::Idle,
        }
    }

    pub fn active(&self) -> StrategyState {
        self.active
    }

    /// Switch to the strategy mapped to `regime` (or the pinned one).
    pub fn select_strategy(&mut self, regime: Regime) -> StrategyHandle {
        let target = match self.pinned {
            Some(kind) => kind.state(),
            None => self
                .regime_map
                .get(&regime)
                .copied()
                .unwrap_or(StrategyState::Idle),
        };

        let handle = StrategyHandle {
            state: target,
            previous: self.active,
        };
        if handle.switched() {
            info!(
                instrument = %self.instrument,
                %regime,
                from = %handle.previous,
                to = %handle.state,
                "Strategy switched"
            );
        }
        self.active = target;
        handle
    }

    pub fn update(&mut self, candle: &Candle) {
        for strategy in self.strategies.values_mut() {
            strategy.update(candle);
        }
    }

    /// Evaluate the active strategy. Idle never produces intents.
    pub fn evaluate(
        &self,
        candle: &Candle,
        composite: &CompositeSignal,
        ctx: &StrategyContext,
    ) -> Option<OrderIntent> {
        let kind = self.active.kind()?;
        self.strategies.get(&kind)?.evaluate(candle, composite, ctx)
    }

    pub fn strategy(&self, kind: StrategyKind) -> Option<&Strategy> {
        self.strategies.get(&kind)
    }
}
