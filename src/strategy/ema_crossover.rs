//! Trend following on fast/slow EMA crosses.

use tracing::debug;

use super::intent::{OrderIntent, StrategyContext, StrategyKind};
use crate::config::EmaCrossoverConfig;
use crate::exchange::{Candle, Side};
use crate::indicators::Ema;
use crate::signal::CompositeSignal;
use crate::utils::to_f64;

#[derive(Debug, Clone)]
pub struct EmaCrossover {
    config: EmaCrossoverConfig,
    fast: Ema,
    slow: Ema,
    prev: Option<(f64, f64)>,
    curr: Option<(f64, f64)>,
    bars: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cross {
    Up,
    Down,
}

impl EmaCrossover {
    pub fn new(config: EmaCrossoverConfig) -> Self {
        Self {
            fast: Ema::new(config.fast_period),
            slow: Ema::new(config.slow_period),
            config,
            prev: None,
            curr: None,
            bars: 0,
        }
    }

    pub fn update(&mut self, candle: &Candle) {
        let close = to_f64(candle.close);
        self.prev = self.curr;
        self.curr = Some((self.fast.update(close), self.slow.update(close)));
        self.bars += 1;
    }

    /// Current (fast, slow) EMA values.
    pub fn emas(&self) -> Option<(f64, f64)> {
        self.curr
    }

    fn cross(&self) -> Option<Cross> {
        if self.bars < self.config.slow_period {
            return None;
        }
        let (pf, ps) = self.prev?;
        let (f, s) = self.curr?;
        if pf <= ps && f > s {
            Some(Cross::Up)
        } else if pf >= ps && f < s {
            Some(Cross::Down)
        } else {
            None
        }
    }

    pub fn evaluate(
        &self,
        candle: &Candle,
        composite: &CompositeSignal,
        ctx: &StrategyContext,
    ) -> Option<OrderIntent> {
        let cross = self.cross()?;
        let (side, against) = match cross {
            Cross::Up => (Side::Long, Side::Short),
            Cross::Down => (Side::Short, Side::Long),
        };

        // A cross always retires the opposite position first
        if ctx.has_open(against) {
            return Some(OrderIntent::close(
                candle,
                against,
                StrategyKind::EmaCrossover,
                composite.score,
                format!("ema cross {:?} exits {}", cross, against),
            ));
        }

        if side == Side::Short && !self.config.allow_short {
            return None;
        }
        if ctx.has_open(side) {
            return None;
        }

        // Entry needs the composite to lean the same way as the cross
        let agrees = match side {
            Side::Long => composite.score > 0.0,
            Side::Short => composite.score < 0.0,
        };
        if !agrees {
            debug!(
                instrument = %candle.instrument,
                score = composite.score,
                ?cross,
                "EMA cross vetoed by composite signal"
            );
            return None;
        }

        Some(OrderIntent::open(
            candle,
            side,
            StrategyKind::EmaCrossover,
            composite.score,
            format!("ema cross {:?}", cross),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::IntentAction;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn config() -> EmaCrossoverConfig {
        EmaCrossoverConfig {
            fast_period: 3,
            slow_period: 6,
            allow_short: false,
        }
    }

    fn candle(i: i64, close: Decimal) -> Candle {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i);
        Candle::new("BTCUSDT", t, close, close, close, close, dec!(1))
    }

    fn composite(score: f64) -> CompositeSignal {
        CompositeSignal {
            timestamp: Utc::now(),
            score,
            contributions: vec![],
        }
    }

    fn warmed_up() -> EmaCrossover {
        let mut strat = EmaCrossover::new(config());
        for i in 0..10 {
            strat.update(&candle(i, dec!(100)));
        }
        strat
    }

    #[test]
    fn test_cross_up_opens_long() {
        let mut strat = warmed_up();
        strat.update(&candle(10, dec!(101)));

        let intent = strat
            .evaluate(&candle(10, dec!(101)), &composite(0.1), &StrategyContext::default())
            .unwrap();
        assert_eq!(intent.action, IntentAction::Open);
        assert_eq!(intent.side, Side::Long);
        assert_eq!(intent.reference_price, dec!(101));
    }

    #[test]
    fn test_no_cross_no_intent() {
        let strat = warmed_up();
        assert!(strat
            .evaluate(&candle(9, dec!(100)), &composite(0.9), &StrategyContext::default())
            .is_none());
    }

    #[test]
    fn test_entry_requires_composite_sign_agreement() {
        let mut strat = warmed_up();
        strat.update(&candle(10, dec!(101)));

        let ctx = StrategyContext::default();
        assert!(strat.evaluate(&candle(10, dec!(101)), &composite(-0.25), &ctx).is_none());
        assert!(strat.evaluate(&candle(10, dec!(101)), &composite(-0.01), &ctx).is_none());
        assert!(strat.evaluate(&candle(10, dec!(101)), &composite(0.0), &ctx).is_none());

        let intent = strat
            .evaluate(&candle(10, dec!(101)), &composite(0.01), &ctx)
            .unwrap();
        assert_eq!(intent.side, Side::Long);
    }

    #[test]
    fn test_cross_down_closes_long_and_ignores_veto() {
        let mut strat = warmed_up();
        strat.update(&candle(10, dec!(101)));
        strat.update(&candle(11, dec!(95)));

        let ctx = StrategyContext {
            open_long: true,
            ..Default::default()
        };
        let intent = strat.evaluate(&candle(11, dec!(95)), &composite(0.9), &ctx).unwrap();
        assert_eq!(intent.action, IntentAction::Close);
        assert_eq!(intent.side, Side::Long);
    }

    #[test]
    fn test_short_entries_only_when_allowed() {
        let mut strat = warmed_up();
        strat.update(&candle(10, dec!(95)));
        assert!(strat
            .evaluate(&candle(10, dec!(95)), &composite(-0.5), &StrategyContext::default())
            .is_none());

        let mut short = EmaCrossover::new(EmaCrossoverConfig {
            allow_short: true,
            ..config()
        });
        for i in 0..10 {
            short.update(&candle(i, dec!(100)));
        }
        short.update(&candle(10, dec!(95)));
        let intent = short
            .evaluate(&candle(10, dec!(95)), &composite(-0.5), &StrategyContext::default())
            .unwrap();
        assert_eq!(intent.side, Side::Short);
        assert_eq!(intent.action, IntentAction::Open);
    }

    #[test]
    fn test_warmup_suppresses_crosses() {
        let mut strat = EmaCrossover::new(config());
        strat.update(&candle(0, dec!(100)));
        strat.update(&candle(1, dec!(101)));
        assert!(strat
            .evaluate(&candle(1, dec!(101)), &composite(0.5), &StrategyContext::default())
            .is_none());
    }
}
