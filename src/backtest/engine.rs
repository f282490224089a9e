//! Backtesting simulation engine.
//!
//! Replays historical candles through the same decision chain and risk
//! manager as the live runner, with the execution adapter replaced by a
//! simulated fill model.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use super::data::instruments_of;
use super::metrics::{BacktestMetrics, EquityPoint};
use crate::config::{Config, FillModel};
use crate::exchange::{Candle, EventSink, Side};
use crate::pipeline::{plan_candle, DecisionCore, Submission};
use crate::risk::{ExitReason, Position, RiskManager, RiskState};
use crate::strategy::StrategyKind;
use crate::utils::from_basis_points;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeKind {
    Entry,
    Exit,
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeKind::Entry => write!(f, "entry"),
            TradeKind::Exit => write!(f, "exit"),
        }
    }
}

/// One simulated fill.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub position_id: u64,
    pub instrument: String,
    pub strategy: StrategyKind,
    pub kind: TradeKind,
    /// Direction of the fill
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub fee: Decimal,
    /// Net of fees; the entry fee for entries
    pub realized_pnl: Decimal,
    pub exit_reason: Option<ExitReason>,
}

/// Complete result of a backtest run.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub instruments: Vec<String>,
    pub metrics: BacktestMetrics,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub closed_positions: Vec<Position>,
    /// Positions still live when the data ran out
    pub open_positions: Vec<Position>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub bars_processed: usize,
}

impl BacktestResult {
    /// Get a summary string.
    pub fn summary(&self) -> String {
        format!(
            "{}\n\nInstruments: {}\nBacktest Period: {} to {}\nBars: {}\nOpen at end: {}",
            self.metrics.summary(),
            self.instruments.join(", "),
            self.start_time.format("%Y-%m-%d %H:%M"),
            self.end_time.format("%Y-%m-%d %H:%M"),
            self.bars_processed,
            self.open_positions.len(),
        )
    }
}

/// Fill prices and fees for simulated orders.
#[derive(Debug, Clone, Copy)]
struct FillSimulator {
    fee_rate: Decimal,
    slippage: Decimal,
}

impl FillSimulator {
    /// Reference price moved against the order by the slippage.
    fn price(&self, side: Side, reference: Decimal) -> Decimal {
        match side {
            Side::Long => reference * (Decimal::ONE + self.slippage),
            Side::Short => reference * (Decimal::ONE - self.slippage),
        }
    }

    fn fee(&self, price: Decimal, size: Decimal) -> Decimal {
        (price * size * self.fee_rate).round_dp(8)
    }
}

/// The backtesting simulation engine.
pub struct BacktestEngine {
    config: Config,
    sink: Arc<dyn EventSink>,
}

impl BacktestEngine {
    /// Create a new backtest engine.
    pub fn new(config: Config, sink: Arc<dyn EventSink>) -> Self {
        Self { config, sink }
    }

    /// Replay `candles` (any instruments, any order) with a private risk state.
    ///
    /// Candles are processed by timestamp, instruments in name order within a
    /// timestamp; the same input always yields the same result.
    pub fn run(&self, candles: &[Candle]) -> Result<BacktestResult> {
        self.config.validate().context("Invalid configuration")?;

        let mut ordered = candles.to_vec();
        ordered.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.instrument.cmp(&b.instrument))
        });
        let (Some(first), Some(last)) = (ordered.first(), ordered.last()) else {
            anyhow::bail!("No candles to replay");
        };
        let (start_time, end_time) = (first.timestamp, last.timestamp);
        let instruments = instruments_of(&ordered);

        info!(
            instruments = %instruments.join(","),
            bars = ordered.len(),
            start = %start_time.format("%Y-%m-%d %H:%M"),
            end = %end_time.format("%Y-%m-%d %H:%M"),
            "Starting backtest"
        );

        let mut cores = BTreeMap::new();
        for instrument in &instruments {
            let core = DecisionCore::new(instrument.clone(), &self.config, self.sink.clone())
                .with_context(|| format!("Failed to build pipeline for {}", instrument))?;
            cores.insert(instrument.clone(), core);
        }

        let bt = &self.config.backtest;
        let mut replay = Replay {
            risk: RiskManager::new(self.config.risk.clone(), self.sink.clone()),
            state: RiskState::new(bt.initial_capital, start_time),
            fills: FillSimulator {
                fee_rate: bt.fee_rate,
                slippage: from_basis_points(bt.slippage_bps),
            },
            queued: BTreeMap::new(),
            trades: Vec::new(),
        };

        let mut last_prices: BTreeMap<String, Decimal> = BTreeMap::new();
        let mut equity_curve = Vec::new();
        let mut peak_equity = bt.initial_capital;

        for (i, candle) in ordered.iter().enumerate() {
            replay.risk.roll_day(&mut replay.state, candle.timestamp);

            // Orders decided on this instrument's previous bar fill at the open
            let due = replay.queued.remove(&candle.instrument).unwrap_or_default();
            for submission in due {
                replay.fill(&submission, candle.open, candle.timestamp);
            }

            last_prices.insert(candle.instrument.clone(), candle.close);
            let core = cores
                .get_mut(&candle.instrument)
                .with_context(|| format!("No pipeline for {}", candle.instrument))?;
            let submissions = plan_candle(core, &replay.risk, &mut replay.state, candle)?;

            match bt.fill_model {
                FillModel::NextBarOpen => replay.queue(submissions),
                FillModel::SignalBarClose => {
                    for submission in submissions {
                        replay.fill(&submission, candle.close, candle.timestamp);
                    }
                }
            }

            let group_done = ordered
                .get(i + 1)
                .map_or(true, |next| next.timestamp != candle.timestamp);
            if group_done {
                let balance = replay.state.capital();
                let unrealized = replay.state.unrealized_pnl(&last_prices);
                peak_equity = peak_equity.max(balance + unrealized);
                equity_curve.push(EquityPoint::new(
                    candle.timestamp,
                    balance,
                    unrealized,
                    replay.state.open_count(),
                    peak_equity,
                ));
            }

            if i % 1000 == 0 {
                debug!(
                    progress = i,
                    total = ordered.len(),
                    equity = %(replay.state.capital()),
                    "Backtest progress"
                );
            }
        }

        let unfilled: usize = replay.queued.values().map(Vec::len).sum();
        if unfilled > 0 {
            debug!(unfilled, "Orders left unfilled at end of data");
        }

        let Replay { state, trades, .. } = replay;
        let closed_pnls: Vec<Decimal> = state.closed.iter().map(|p| p.realized_pnl).collect();
        let metrics = BacktestMetrics::calculate(
            &equity_curve,
            bt.initial_capital,
            &trades,
            &closed_pnls,
            bt.bars_per_year,
        );
        let open_positions: Vec<Position> = state
            .positions
            .values()
            .filter(|p| p.state.is_live())
            .cloned()
            .collect();

        info!(
            trades = trades.len(),
            final_equity = %equity_curve.last().map(|p| p.total_equity).unwrap_or(bt.initial_capital),
            sharpe = %metrics.sharpe_ratio,
            "Backtest complete"
        );

        Ok(BacktestResult {
            instruments,
            metrics,
            trades,
            equity_curve,
            closed_positions: state.closed,
            open_positions,
            start_time,
            end_time,
            bars_processed: ordered.len(),
        })
    }
}

/// Mutable replay state: the private risk state and the simulated order book.
struct Replay {
    risk: RiskManager,
    state: RiskState,
    fills: FillSimulator,
    /// Orders waiting for their instrument's next bar
    queued: BTreeMap<String, Vec<Submission>>,
    trades: Vec<TradeRecord>,
}

impl Replay {
    fn queue(&mut self, submissions: Vec<Submission>) {
        for submission in submissions {
            self.queued
                .entry(submission.request().instrument.clone())
                .or_default()
                .push(submission);
        }
    }

    /// Fill one order at `reference`. Follow-up orders from a breaker trip
    /// wait for their instrument's next bar.
    fn fill(&mut self, submission: &Submission, reference: Decimal, at: DateTime<Utc>) {
        let request = submission.request();
        let price = self.fills.price(request.side, reference);

        let tripped = match submission {
            Submission::Entry { position_id, .. } => {
                let Some(position) = self.state.positions.get(position_id) else {
                    debug!(position_id, "Entry for a cancelled position dropped");
                    return;
                };
                let strategy = position.strategy;
                let fee = self.fills.fee(price, request.size);
                let tripped = self.risk.on_entry_fill(
                    &mut self.state,
                    *position_id,
                    price,
                    request.size,
                    fee,
                    at,
                );
                self.trades.push(TradeRecord {
                    timestamp: at,
                    position_id: *position_id,
                    instrument: request.instrument.clone(),
                    strategy,
                    kind: TradeKind::Entry,
                    side: request.side,
                    price,
                    size: request.size,
                    fee,
                    realized_pnl: -fee,
                    exit_reason: None,
                });
                tripped
            }
            Submission::Exit { position_id, .. } => {
                let Some(position) = self.state.positions.get(position_id) else {
                    debug!(position_id, "Exit for a closed position dropped");
                    return;
                };
                let Some(signal) = position.pending_exit else {
                    return;
                };
                let strategy = position.strategy;
                let size = signal.size.min(position.size);
                let fee = self.fills.fee(price, size);
                let Some(fill) = self.risk.on_exit_fill(&mut self.state, *position_id, price, fee, at)
                else {
                    return;
                };
                self.trades.push(TradeRecord {
                    timestamp: at,
                    position_id: *position_id,
                    instrument: request.instrument.clone(),
                    strategy,
                    kind: TradeKind::Exit,
                    side: request.side,
                    price,
                    size,
                    fee,
                    realized_pnl: fill.realized_pnl,
                    exit_reason: Some(signal.reason),
                });
                fill.breaker_tripped
            }
        };

        if tripped {
            let exits = self.risk.breaker_exits(&mut self.state);
            self.queue(exits.into_iter().map(Submission::from).collect());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SizingRule;
    use crate::exchange::MemoryEventSink;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i)
    }

    /// Hourly candles opening at the previous close.
    fn series(instrument: &str, closes: &[Decimal]) -> Vec<Candle> {
        let mut prev = closes[0];
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                let open = prev;
                prev = *close;
                Candle::new(
                    instrument,
                    t(i as i64),
                    open,
                    open.max(*close),
                    open.min(*close),
                    *close,
                    dec!(1),
                )
            })
            .collect()
    }

    /// Flat for 40 bars, up 0.2 a bar for 15, then down 0.2 a bar for 15.
    ///
    /// EMA(3/6) crosses up on bar 40 and down on bar 58.
    fn swing() -> Vec<Decimal> {
        let mut closes = vec![dec!(100); 40];
        for i in 1..=15 {
            closes.push(dec!(100) + dec!(0.2) * Decimal::from(i));
        }
        for i in 1..=15 {
            closes.push(dec!(103) - dec!(0.2) * Decimal::from(i));
        }
        closes
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.strategy.pinned = Some(StrategyKind::EmaCrossover);
        config.strategy.ema_crossover.fast_period = 3;
        config.strategy.ema_crossover.slow_period = 6;
        // Trend-only vote so the first rising bar reads bullish
        config.signal_weights.rsi = 0.0;
        config.signal_weights.wavetrend = 0.8;
        config.signal_weights.aux = 0.2;
        config.risk.sizing = SizingRule::FixedNotional;
        config.risk.fixed_notional = dec!(1000);
        config.backtest.fee_rate = Decimal::ZERO;
        config
    }

    fn engine(config: Config) -> (BacktestEngine, Arc<MemoryEventSink>) {
        let sink = Arc::new(MemoryEventSink::new());
        (BacktestEngine::new(config, sink.clone()), sink)
    }

    // =========================================================================
    // Fill model
    // =========================================================================

    #[test]
    fn test_fill_simulator_slippage_and_fee() {
        let fills = FillSimulator {
            fee_rate: dec!(0.0004),
            slippage: from_basis_points(dec!(10)),
        };
        assert_eq!(fills.price(Side::Long, dec!(100)), dec!(100.1));
        assert_eq!(fills.price(Side::Short, dec!(100)), dec!(99.9));
        assert_eq!(fills.fee(dec!(100.1), dec!(2)), dec!(0.08008));
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let mut config = config();
        config.strategy.grid.levels = 0;
        let (engine, _) = engine(config);

        let err = engine.run(&series("BTCUSDT", &swing())).unwrap_err();
        assert!(format!("{:#}", err).contains("grid needs at least 2 levels"));
    }

    #[test]
    fn test_empty_input_is_an_error() {
        let (engine, _) = engine(config());
        assert!(engine.run(&[]).is_err());
    }

    // =========================================================================
    // Replay
    // =========================================================================

    #[test]
    fn test_crossover_round_trip_next_bar_open() {
        let (engine, sink) = engine(config());
        let result = engine.run(&series("BTCUSDT", &swing())).unwrap();

        assert_eq!(result.trades.len(), 2);
        let (entry, exit) = (&result.trades[0], &result.trades[1]);

        assert_eq!(entry.kind, TradeKind::Entry);
        assert_eq!(entry.timestamp, t(41));
        assert_eq!(entry.side, Side::Long);
        assert_eq!(entry.price, dec!(100.2));
        assert_eq!(entry.size, dec!(9.98));

        assert_eq!(exit.kind, TradeKind::Exit);
        assert_eq!(exit.timestamp, t(59));
        assert_eq!(exit.side, Side::Short);
        assert_eq!(exit.price, dec!(102.2));
        assert_eq!(exit.exit_reason, Some(ExitReason::StrategyExit));
        assert_eq!(exit.realized_pnl, dec!(19.96));

        assert_eq!(result.closed_positions.len(), 1);
        assert!(result.open_positions.is_empty());

        // Take-profit levels anchored on the entry fill
        let risk = &Config::default().risk;
        let position = &result.closed_positions[0];
        assert_eq!(position.entry_price, entry.price);
        assert_eq!(position.tp1_price, entry.price * (Decimal::ONE + risk.tp1_pct));
        assert_eq!(position.tp2_price, entry.price * (Decimal::ONE + risk.tp2_pct));
        assert_eq!(position.tp1_price, dec!(103.206));
        assert_eq!(position.tp2_price, dec!(106.212));
        assert_eq!(position.stop_price, dec!(98.196));
        assert_eq!(result.equity_curve.len(), 70);
        assert_eq!(result.metrics.total_return, dec!(19.96));
        assert_eq!(result.metrics.win_rate, dec!(100));
        assert_eq!(sink.count("trade_executed"), 2);
        assert_eq!(sink.count("strategy_switched"), 1);
    }

    #[test]
    fn test_signal_bar_close_fills_on_decision_bar() {
        let mut config = config();
        config.backtest.fill_model = FillModel::SignalBarClose;
        let (engine, _) = engine(config);
        let result = engine.run(&series("BTCUSDT", &swing())).unwrap();

        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].timestamp, t(40));
        assert_eq!(result.trades[0].price, dec!(100.2));
        assert_eq!(result.trades[1].timestamp, t(58));
        assert_eq!(result.trades[1].price, dec!(102.2));
    }

    #[test]
    fn test_stop_loss_and_breaker() {
        // Five up bars then a gap down through the stop
        let mut closes = vec![dec!(100); 40];
        for i in 1..=5 {
            closes.push(dec!(100) + dec!(0.2) * Decimal::from(i));
        }
        closes.extend([dec!(95); 5]);

        let mut config = config();
        config.risk.daily_loss_limit = dec!(0.005);
        let (engine, sink) = engine(config);
        let result = engine.run(&series("BTCUSDT", &closes)).unwrap();

        assert_eq!(result.trades.len(), 2);
        let exit = &result.trades[1];
        assert_eq!(exit.exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(exit.timestamp, t(46));
        assert_eq!(exit.price, dec!(95));
        assert_eq!(exit.realized_pnl, dec!(-51.896));
        assert_eq!(sink.count("breaker_tripped"), 1);
        assert_eq!(result.metrics.max_consecutive_losses, 1);
    }

    #[test]
    fn test_fees_reduce_capital() {
        let mut config = config();
        config.backtest.fee_rate = dec!(0.001);
        let (engine, _) = engine(config);
        let result = engine.run(&series("BTCUSDT", &swing())).unwrap();

        let fees: Decimal = result.trades.iter().map(|t| t.fee).sum();
        assert!(fees > Decimal::ZERO);
        assert_eq!(result.metrics.total_fees, fees);
        assert_eq!(result.metrics.total_return, dec!(19.96) - fees);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let mut candles = series("BTCUSDT", &swing());
        candles.extend(series("ETHUSDT", &swing()));
        candles.reverse();

        let (a, _) = engine(config());
        let (b, _) = engine(config());
        let first = a.run(&candles).unwrap();
        let second = b.run(&candles).unwrap();

        assert_eq!(
            serde_json::to_string(&first.trades).unwrap(),
            serde_json::to_string(&second.trades).unwrap()
        );
        assert_eq!(
            serde_json::to_string(&first.equity_curve).unwrap(),
            serde_json::to_string(&second.equity_curve).unwrap()
        );
        assert_eq!(first.trades.len(), 4);
        assert_eq!(first.equity_curve.len(), 70);
    }
}
