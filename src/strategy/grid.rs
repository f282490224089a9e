//! Grid trading over the recent price range.

use rust_decimal::Decimal;
use std::collections::VecDeque;

use super::intent::{OrderIntent, StrategyContext, StrategyKind};
use crate::config::GridConfig;
use crate::exchange::{Candle, Side};
use crate::signal::CompositeSignal;

#[derive(Debug, Clone)]
pub struct Grid {
    config: GridConfig,
    closes: VecDeque<Decimal>,
    /// Levels anchored on the window before the latest candle
    levels: Vec<Decimal>,
    step: Decimal,
    prev_close: Option<Decimal>,
    close: Option<Decimal>,
}

impl Grid {
    pub fn new(config: GridConfig) -> Self {
        Self {
            closes: VecDeque::with_capacity(config.lookback),
            config,
            levels: Vec::new(),
            step: Decimal::ZERO,
            prev_close: None,
            close: None,
        }
    }

    pub fn update(&mut self, candle: &Candle) {
        self.anchor();
        self.closes.push_back(candle.close);
        while self.closes.len() > self.config.lookback {
            self.closes.pop_front();
        }
        self.prev_close = self.close;
        self.close = Some(candle.close);
    }

    /// Interior levels between the range low and high.
    pub fn levels(&self) -> &[Decimal] {
        &self.levels
    }

    fn anchor(&mut self) {
        self.levels.clear();
        self.step = Decimal::ZERO;
        if self.config.levels < 2 || self.closes.len() < self.config.lookback {
            return;
        }

        let low = self.closes.iter().copied().fold(Decimal::MAX, Decimal::min);
        let high = self.closes.iter().copied().fold(Decimal::MIN, Decimal::max);
        if high <= low {
            return;
        }

        let intervals = Decimal::from(self.config.levels as u64);
        self.step = ((high - low) / intervals).round_dp(8);
        self.levels = (1..self.config.levels)
            .map(|k| (low + self.step * Decimal::from(k as u64)).round_dp(8))
            .collect();
    }

    fn occupied(&self, level: Decimal, open_levels: &[Decimal]) -> bool {
        let tolerance = self.step / Decimal::TWO;
        open_levels.iter().any(|l| (*l - level).abs() < tolerance)
    }

    pub fn evaluate(
        &self,
        candle: &Candle,
        composite: &CompositeSignal,
        ctx: &StrategyContext,
    ) -> Option<OrderIntent> {
        let close = self.close?;
        if self.step <= Decimal::ZERO {
            return None;
        }

        // Take profit one level above the entry level
        let mut open_levels = ctx.open_grid_levels.clone();
        open_levels.sort();
        if let Some(level) = open_levels.iter().find(|l| close >= **l + self.step) {
            return Some(
                OrderIntent::close(
                    candle,
                    Side::Long,
                    StrategyKind::Grid,
                    composite.score,
                    "grid level take profit",
                )
                .at_grid_level(*level),
            );
        }

        let prev_close = self.prev_close?;
        let crossed = self
            .levels
            .iter()
            .rev()
            .find(|l| prev_close >= **l && close < **l && !self.occupied(**l, &ctx.open_grid_levels))?;

        Some(
            OrderIntent::open(
                candle,
                Side::Long,
                StrategyKind::Grid,
                composite.score,
                format!("crossed grid level {}", crossed),
            )
            .at_grid_level(*crossed),
        )
    }
}
