//! RSI + Bollinger mean reversion for ranging markets.
//!
//! Enters when price breaks out of a band while the composite score leans the
//! other way, and exits when price returns to the middle band.

use std::collections::VecDeque;

use super::intent::{OrderIntent, StrategyContext, StrategyKind};
use crate::config::MeanReversionConfig;
use crate::exchange::{Candle, Side};
use crate::indicators::{bollinger, BollingerBands};
use crate::signal::CompositeSignal;
use crate::utils::to_f64;

#[derive(Debug, Clone)]
pub struct MeanReversion {
    config: MeanReversionConfig,
    rsi_oversold: f64,
    rsi_overbought: f64,
    closes: VecDeque<f64>,
    prev: Option<(f64, BollingerBands)>,
    curr: Option<(f64, BollingerBands)>,
}

impl MeanReversion {
    pub fn new(config: MeanReversionConfig, rsi_oversold: f64, rsi_overbought: f64) -> Self {
        Self {
            closes: VecDeque::with_capacity(config.bb_period + 1),
            config,
            rsi_oversold,
            rsi_overbought,
            prev: None,
            curr: None,
        }
    }

    pub fn update(&mut self, candle: &Candle) {
        let close = to_f64(candle.close);
        self.closes.push_back(close);
        while self.closes.len() > self.config.bb_period {
            self.closes.pop_front();
        }

        let window: Vec<f64> = self.closes.iter().copied().collect();
        self.prev = self.curr;
        self.curr = bollinger(&window, self.config.bb_period, self.config.bb_std_mult)
            .ok()
            .map(|bands| (close, bands));
    }

    pub fn bands(&self) -> Option<BollingerBands> {
        self.curr.map(|(_, bands)| bands)
    }

    pub fn evaluate(
        &self,
        candle: &Candle,
        composite: &CompositeSignal,
        ctx: &StrategyContext,
    ) -> Option<OrderIntent> {
        let (prev_close, prev) = self.prev?;
        let (close, bands) = self.curr?;
        let kind = StrategyKind::MeanReversion;

        if ctx.open_long && prev_close < prev.middle && close >= bands.middle {
            return Some(OrderIntent::close(
                candle,
                Side::Long,
                kind,
                composite.score,
                "reverted to middle band",
            ));
        }
        if ctx.open_short && prev_close > prev.middle && close <= bands.middle {
            return Some(OrderIntent::close(
                candle,
                Side::Short,
                kind,
                composite.score,
                "reverted to middle band",
            ));
        }

        let rsi = ctx.rsi.unwrap_or(50.0);

        let broke_lower = prev_close >= prev.lower && close < bands.lower;
        if broke_lower && !ctx.open_long && composite.score > 0.0 {
            if self.config.rsi_confirm && rsi >= self.rsi_oversold {
                return None;
            }
            return Some(OrderIntent::open(
                candle,
                Side::Long,
                kind,
                composite.score,
                "lower band break against bullish composite",
            ));
        }

        let broke_upper = prev_close <= prev.upper && close > bands.upper;
        if broke_upper && self.config.allow_short && !ctx.open_short && composite.score < 0.0 {
            if self.config.rsi_confirm && rsi <= self.rsi_overbought {
                return None;
            }
            return Some(OrderIntent::open(
                candle,
                Side::Short,
                kind,
                composite.score,
                "upper band break against bearish composite",
            ));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::IntentAction;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn candle(i: i64, close: Decimal) -> Candle {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i);
        Candle::new("ETHUSDT", t, close, close, close, close, dec!(1))
    }

    fn composite(score: f64) -> CompositeSignal {
        CompositeSignal {
            timestamp: Utc::now(),
            score,
            contributions: vec![],
        }
    }

    fn strategy(rsi_confirm: bool) -> MeanReversion {
        let config = MeanReversionConfig {
            bb_period: 10,
            bb_std_mult: 2.0,
            rsi_confirm,
            allow_short: true,
        };
        let mut strat = MeanReversion::new(config, 30.0, 70.0);
        // Small oscillation gives the bands some width
        for i in 0..20 {
            let px = if i % 2 == 0 { dec!(100) } else { dec!(101) };
            strat.update(&candle(i, px));
        }
        strat
    }

    fn oversold() -> StrategyContext {
        StrategyContext {
            rsi: Some(25.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_lower_break_with_bullish_score_opens_long() {
        let mut strat = strategy(true);
        strat.update(&candle(20, dec!(95)));

        let intent = strat.evaluate(&candle(20, dec!(95)), &composite(0.2), &oversold()).unwrap();
        assert_eq!(intent.side, Side::Long);
        assert_eq!(intent.action, IntentAction::Open);
    }

    #[test]
    fn test_breakout_with_agreeing_score_is_ignored() {
        let mut strat = strategy(true);
        strat.update(&candle(20, dec!(95)));
        assert!(strat.evaluate(&candle(20, dec!(95)), &composite(-0.2), &oversold()).is_none());
    }

    #[test]
    fn test_rsi_confirmation() {
        let mut strat = strategy(true);
        strat.update(&candle(20, dec!(95)));
        let neutral = StrategyContext {
            rsi: Some(45.0),
            ..Default::default()
        };
        assert!(strat.evaluate(&candle(20, dec!(95)), &composite(0.2), &neutral).is_none());

        let mut unconfirmed = strategy(false);
        unconfirmed.update(&candle(20, dec!(95)));
        assert!(unconfirmed
            .evaluate(&candle(20, dec!(95)), &composite(0.2), &neutral)
            .is_some());
    }

    #[test]
    fn test_upper_break_opens_short() {
        let mut strat = strategy(false);
        strat.update(&candle(20, dec!(106)));
        let intent = strat
            .evaluate(&candle(20, dec!(106)), &composite(-0.2), &StrategyContext::default())
            .unwrap();
        assert_eq!(intent.side, Side::Short);
    }

    #[test]
    fn test_return_to_middle_closes_long() {
        let mut strat = strategy(false);
        strat.update(&candle(20, dec!(95)));
        strat.update(&candle(21, dec!(101)));

        let ctx = StrategyContext {
            open_long: true,
            ..Default::default()
        };
        let intent = strat.evaluate(&candle(21, dec!(101)), &composite(0.0), &ctx).unwrap();
        assert_eq!(intent.action, IntentAction::Close);
        assert_eq!(intent.side, Side::Long);
    }
}
