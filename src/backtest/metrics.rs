//! Performance metrics calculation for backtesting.
//!
//! Provides Sharpe ratio, Sortino ratio, drawdown analysis, CAGR and trade
//! statistics. Ratios are computed in `f64` and stored as `Decimal`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::engine::{TradeKind, TradeRecord};
use crate::utils::{from_f64, safe_div, to_f64};

/// A point on the equity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub balance: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_equity: Decimal,
    pub drawdown: Decimal,
    pub position_count: usize,
}

impl EquityPoint {
    /// Create a new equity point.
    pub fn new(
        timestamp: DateTime<Utc>,
        balance: Decimal,
        unrealized_pnl: Decimal,
        position_count: usize,
        peak_equity: Decimal,
    ) -> Self {
        let total_equity = balance + unrealized_pnl;
        let drawdown = if peak_equity > Decimal::ZERO && total_equity < peak_equity {
            (peak_equity - total_equity) / peak_equity
        } else {
            Decimal::ZERO
        };

        Self {
            timestamp,
            balance,
            unrealized_pnl,
            total_equity,
            drawdown,
            position_count,
        }
    }
}

/// Comprehensive backtest performance metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // Returns
    /// Total absolute return (final - initial)
    pub total_return: Decimal,
    /// Total return as percentage
    pub total_return_pct: Decimal,
    /// Compound annual growth rate, percent
    pub cagr: Decimal,

    // Risk
    /// Maximum drawdown as a fraction of the running peak
    pub max_drawdown: Decimal,
    /// Longest stretch below a previous peak, in bars
    pub max_drawdown_duration_bars: usize,
    /// Annualized volatility (std dev of bar returns)
    pub volatility: Decimal,

    // Risk-adjusted
    /// Sharpe ratio (assuming 0 risk-free rate)
    pub sharpe_ratio: Decimal,
    /// Sortino ratio (downside deviation only)
    pub sortino_ratio: Decimal,
    /// Calmar ratio (CAGR / max drawdown)
    pub calmar_ratio: Decimal,

    // Trades
    /// Entry and exit fills
    pub total_trades: u64,
    pub positions_opened: u64,
    pub positions_closed: u64,
    /// Profitable closed positions, percent
    pub win_rate: Decimal,
    /// Gross profit / gross loss over closed positions
    pub profit_factor: Decimal,
    pub avg_win: Decimal,
    /// Average losing position, as a negative amount
    pub avg_loss: Decimal,
    /// Mean net result per closed position
    pub expectancy: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub max_consecutive_wins: u32,
    pub max_consecutive_losses: u32,
    pub total_fees: Decimal,

    /// Equity points the metrics were computed over
    pub bars: usize,
}

impl BacktestMetrics {
    /// Calculate metrics from the equity curve and the realized trade list.
    ///
    /// `closed_pnls` holds the net result of every closed position in close
    /// order; `bars_per_year` sets the annualization frequency.
    pub fn calculate(
        equity_curve: &[EquityPoint],
        initial_capital: Decimal,
        trades: &[TradeRecord],
        closed_pnls: &[Decimal],
        bars_per_year: f64,
    ) -> Self {
        if equity_curve.is_empty() {
            return Self::empty();
        }

        let last = &equity_curve[equity_curve.len() - 1];
        let years = (equity_curve.len() - 1) as f64 / bars_per_year;

        // Returns
        let total_return = last.total_equity - initial_capital;
        let total_return_pct = safe_div(total_return, initial_capital) * dec!(100);

        let growth = to_f64(safe_div(last.total_equity, initial_capital));
        let cagr = if years > 0.0 && growth > 0.0 {
            from_f64((growth.powf(1.0 / years) - 1.0) * 100.0)
        } else {
            Decimal::ZERO
        };

        // Drawdown
        let (max_drawdown, max_drawdown_duration_bars) = calculate_max_drawdown(equity_curve);

        // Bar returns
        let returns = calculate_period_returns(equity_curve);
        let volatility = calculate_volatility(&returns, bars_per_year);
        let sharpe_ratio = calculate_sharpe(&returns, bars_per_year);
        let sortino_ratio = calculate_sortino(&returns, bars_per_year);
        let calmar_ratio = if max_drawdown > Decimal::ZERO {
            cagr / (max_drawdown * dec!(100))
        } else {
            Decimal::ZERO
        };

        // Trades
        let positions_opened = trades.iter().filter(|t| t.kind == TradeKind::Entry).count() as u64;
        let total_fees: Decimal = trades.iter().map(|t| t.fee).sum();
        let stats = TradeStats::from_pnls(closed_pnls);

        Self {
            total_return,
            total_return_pct,
            cagr,
            max_drawdown,
            max_drawdown_duration_bars,
            volatility,
            sharpe_ratio,
            sortino_ratio,
            calmar_ratio,
            total_trades: trades.len() as u64,
            positions_opened,
            positions_closed: closed_pnls.len() as u64,
            win_rate: stats.win_rate,
            profit_factor: stats.profit_factor,
            avg_win: stats.avg_win,
            avg_loss: stats.avg_loss,
            expectancy: stats.expectancy,
            largest_win: stats.largest_win,
            largest_loss: stats.largest_loss,
            max_consecutive_wins: stats.max_consecutive_wins,
            max_consecutive_losses: stats.max_consecutive_losses,
            total_fees,
            bars: equity_curve.len(),
        }
    }

    /// Create empty metrics (for error cases).
    pub fn empty() -> Self {
        Self {
            total_return: Decimal::ZERO,
            total_return_pct: Decimal::ZERO,
            cagr: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            max_drawdown_duration_bars: 0,
            volatility: Decimal::ZERO,
            sharpe_ratio: Decimal::ZERO,
            sortino_ratio: Decimal::ZERO,
            calmar_ratio: Decimal::ZERO,
            total_trades: 0,
            positions_opened: 0,
            positions_closed: 0,
            win_rate: Decimal::ZERO,
            profit_factor: Decimal::ZERO,
            avg_win: Decimal::ZERO,
            avg_loss: Decimal::ZERO,
            expectancy: Decimal::ZERO,
            largest_win: Decimal::ZERO,
            largest_loss: Decimal::ZERO,
            max_consecutive_wins: 0,
            max_consecutive_losses: 0,
            total_fees: Decimal::ZERO,
            bars: 0,
        }
    }

    /// Format metrics as a summary string.
    pub fn summary(&self) -> String {
        format!(
            r#"═══════════════════════════════════════════════
BACKTEST RESULTS ({} bars)
═══════════════════════════════════════════════
RETURNS
  Total Return:      ${:.2} ({:.2}%)
  CAGR:              {:.2}%

RISK
  Max Drawdown:      {:.2}% ({} bars)
  Volatility:        {:.2}%

RISK-ADJUSTED
  Sharpe Ratio:      {:.3}
  Sortino Ratio:     {:.3}
  Calmar Ratio:      {:.3}

TRADES
  Total Trades:      {}
  Positions Opened:  {}
  Positions Closed:  {}
  Win Rate:          {:.1}%
  Profit Factor:     {:.2}
  Avg Win / Loss:    ${:.2} / ${:.2}
  Expectancy:        ${:.2}
  Largest Win/Loss:  ${:.2} / ${:.2}
  Max Streak W/L:    {} / {}
  Fees Paid:         ${:.2}
═══════════════════════════════════════════════"#,
            self.bars,
            self.total_return,
            self.total_return_pct,
            self.cagr,
            self.max_drawdown * dec!(100),
            self.max_drawdown_duration_bars,
            self.volatility * dec!(100),
            self.sharpe_ratio,
            self.sortino_ratio,
            self.calmar_ratio,
            self.total_trades,
            self.positions_opened,
            self.positions_closed,
            self.win_rate,
            self.profit_factor,
            self.avg_win,
            self.avg_loss,
            self.expectancy,
            self.largest_win,
            self.largest_loss,
            self.max_consecutive_wins,
            self.max_consecutive_losses,
            self.total_fees,
        )
    }
}

/// Win/loss statistics over closed positions.
#[derive(Debug, Default)]
struct TradeStats {
    win_rate: Decimal,
    profit_factor: Decimal,
    avg_win: Decimal,
    avg_loss: Decimal,
    expectancy: Decimal,
    largest_win: Decimal,
    largest_loss: Decimal,
    max_consecutive_wins: u32,
    max_consecutive_losses: u32,
}

impl TradeStats {
    fn from_pnls(pnls: &[Decimal]) -> Self {
        if pnls.is_empty() {
            return Self::default();
        }

        let wins: Vec<Decimal> = pnls.iter().copied().filter(|p| *p > Decimal::ZERO).collect();
        let losses: Vec<Decimal> = pnls.iter().copied().filter(|p| *p < Decimal::ZERO).collect();
        let gross_profit: Decimal = wins.iter().sum();
        let gross_loss: Decimal = losses.iter().sum::<Decimal>().abs();
        let count = |v: &[Decimal]| Decimal::from(v.len() as u64);

        // Streaks; a flat result breaks both
        let (mut win_streak, mut loss_streak) = (0u32, 0u32);
        let (mut max_wins, mut max_losses) = (0u32, 0u32);
        for pnl in pnls {
            if *pnl > Decimal::ZERO {
                win_streak += 1;
                loss_streak = 0;
            } else if *pnl < Decimal::ZERO {
                loss_streak += 1;
                win_streak = 0;
            } else {
                win_streak = 0;
                loss_streak = 0;
            }
            max_wins = max_wins.max(win_streak);
            max_losses = max_losses.max(loss_streak);
        }

        Self {
            win_rate: count(&wins) / count(pnls) * dec!(100),
            profit_factor: if gross_loss > Decimal::ZERO {
                gross_profit / gross_loss
            } else if gross_profit > Decimal::ZERO {
                dec!(100) // No losses; cap like Sortino
            } else {
                Decimal::ZERO
            },
            avg_win: safe_div(gross_profit, count(&wins)),
            avg_loss: safe_div(-gross_loss, count(&losses)),
            expectancy: pnls.iter().sum::<Decimal>() / count(pnls),
            largest_win: wins.iter().copied().max().unwrap_or(Decimal::ZERO),
            largest_loss: losses.iter().copied().min().unwrap_or(Decimal::ZERO),
            max_consecutive_wins: max_wins,
            max_consecutive_losses: max_losses,
        }
    }
}

/// Calculate period returns from equity curve.
fn calculate_period_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| {
            let (prev, curr) = (&w[0], &w[1]);
            if prev.total_equity > Decimal::ZERO {
                to_f64((curr.total_equity - prev.total_equity) / prev.total_equity)
            } else {
                0.0
            }
        })
        .collect()
}

/// Calculate maximum drawdown and the longest underwater stretch in bars.
fn calculate_max_drawdown(equity_curve: &[EquityPoint]) -> (Decimal, usize) {
    let Some(first) = equity_curve.first() else {
        return (Decimal::ZERO, 0);
    };

    let mut peak = first.total_equity;
    let mut max_dd = Decimal::ZERO;
    let mut underwater = 0usize;
    let mut max_underwater = 0usize;

    for point in equity_curve {
        if point.total_equity >= peak {
            peak = point.total_equity;
            underwater = 0;
            continue;
        }
        underwater += 1;
        max_underwater = max_underwater.max(underwater);
        if peak > Decimal::ZERO {
            max_dd = max_dd.max((peak - point.total_equity) / peak);
        }
    }

    (max_dd, max_underwater)
}

fn mean_and_std(returns: &[f64]) -> (f64, f64) {
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Calculate annualized volatility from bar returns.
fn calculate_volatility(returns: &[f64], bars_per_year: f64) -> Decimal {
    if returns.len() < 2 {
        return Decimal::ZERO;
    }
    let (_, std_dev) = mean_and_std(returns);
    from_f64(std_dev * bars_per_year.sqrt())
}

/// Calculate Sharpe ratio (assuming 0 risk-free rate).
fn calculate_sharpe(returns: &[f64], bars_per_year: f64) -> Decimal {
    if returns.is_empty() {
        return Decimal::ZERO;
    }

    let (mean, std_dev) = mean_and_std(returns);
    if std_dev < 1e-10 {
        return Decimal::ZERO;
    }

    from_f64(mean / std_dev * bars_per_year.sqrt())
}

/// Calculate Sortino ratio (downside deviation only).
fn calculate_sortino(returns: &[f64], bars_per_year: f64) -> Decimal {
    if returns.is_empty() {
        return Decimal::ZERO;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;

    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        // No negative returns = infinite Sortino (cap at a large value)
        return if mean > 0.0 { dec!(100) } else { Decimal::ZERO };
    }

    let downside_deviation = (downside.iter().map(|r| r.powi(2)).sum::<f64>() / n).sqrt();
    if downside_deviation < 1e-10 {
        return dec!(100);
    }

    from_f64(mean / downside_deviation * bars_per_year.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Side;
    use crate::strategy::StrategyKind;
    use chrono::{Duration, TimeZone};

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i)
    }

    fn curve(equities: &[Decimal]) -> Vec<EquityPoint> {
        let mut peak = Decimal::ZERO;
        equities
            .iter()
            .enumerate()
            .map(|(i, e)| {
                peak = peak.max(*e);
                EquityPoint::new(t(i as i64), *e, Decimal::ZERO, 0, peak)
            })
            .collect()
    }

    fn trade(kind: TradeKind, fee: Decimal) -> TradeRecord {
        TradeRecord {
            timestamp: t(0),
            position_id: 1,
            instrument: "BTCUSDT".to_string(),
            strategy: StrategyKind::EmaCrossover,
            kind,
            side: Side::Long,
            price: dec!(100),
            size: dec!(1),
            fee,
            realized_pnl: -fee,
            exit_reason: None,
        }
    }

    // =========================================================================
    // Equity curve
    // =========================================================================

    #[test]
    fn test_equity_point_drawdown() {
        let point = EquityPoint::new(
            t(0),
            dec!(9500),  // balance
            dec!(0),     // unrealized
            2,           // positions
            dec!(10000), // peak
        );

        assert_eq!(point.total_equity, dec!(9500));
        assert_eq!(point.drawdown, dec!(0.05)); // 5% drawdown
    }

    #[test]
    fn test_max_drawdown_calculation() {
        let curve = curve(&[dec!(10000), dec!(10500), dec!(9500), dec!(10000), dec!(11000)]);

        let (max_dd, duration) = calculate_max_drawdown(&curve);
        // Max DD was from 10500 to 9500 = 9.52%
        assert!(max_dd > dec!(0.09) && max_dd < dec!(0.10));
        assert_eq!(duration, 2);
    }

    #[test]
    fn test_period_returns() {
        let curve = curve(&[dec!(10000), dec!(10100), dec!(10000)]);
        let returns = calculate_period_returns(&curve);
        assert_eq!(returns.len(), 2);
        assert!((returns[0] - 0.01).abs() < 1e-12);
        assert!(returns[1] < 0.0);
    }

    // =========================================================================
    // Ratios
    // =========================================================================

    #[test]
    fn test_flat_curve_has_zero_ratios() {
        let curve = curve(&[dec!(10000); 10]);
        let m = BacktestMetrics::calculate(&curve, dec!(10000), &[], &[], 8760.0);
        assert_eq!(m.total_return, Decimal::ZERO);
        assert_eq!(m.cagr, Decimal::ZERO);
        assert_eq!(m.sharpe_ratio, Decimal::ZERO);
        assert_eq!(m.sortino_ratio, Decimal::ZERO);
        assert_eq!(m.max_drawdown, Decimal::ZERO);
        assert_eq!(m.bars, 10);
    }

    #[test]
    fn test_cagr_over_one_year() {
        // Two points one bar-year apart: 10% growth is 10% CAGR
        let curve = curve(&[dec!(10000), dec!(11000)]);
        let m = BacktestMetrics::calculate(&curve, dec!(10000), &[], &[], 1.0);
        assert_eq!(m.total_return_pct, dec!(10));
        assert!((to_f64(m.cagr) - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_sharpe_sign_follows_returns() {
        let up = curve(&[dec!(100), dec!(101), dec!(103), dec!(102), dec!(105)]);
        let m = BacktestMetrics::calculate(&up, dec!(100), &[], &[], 4.0);
        assert!(m.sharpe_ratio > Decimal::ZERO);
        assert!(m.sortino_ratio > Decimal::ZERO);
        assert!(m.calmar_ratio > Decimal::ZERO);

        let down = curve(&[dec!(105), dec!(102), dec!(103), dec!(101), dec!(100)]);
        let m = BacktestMetrics::calculate(&down, dec!(105), &[], &[], 4.0);
        assert!(m.sharpe_ratio < Decimal::ZERO);
        assert!(m.total_return < Decimal::ZERO);
    }

    #[test]
    fn test_sortino_capped_without_downside() {
        let curve = curve(&[dec!(100), dec!(101), dec!(102)]);
        let m = BacktestMetrics::calculate(&curve, dec!(100), &[], &[], 8760.0);
        assert_eq!(m.sortino_ratio, dec!(100));
    }

    // =========================================================================
    // Trade statistics
    // =========================================================================

    #[test]
    fn test_trade_statistics() {
        let pnls = [dec!(30), dec!(-10), dec!(-20), dec!(50), dec!(0), dec!(10)];
        let trades = [trade(TradeKind::Entry, dec!(1)), trade(TradeKind::Exit, dec!(0.5))];
        let curve = curve(&[dec!(10000), dec!(10060)]);
        let m = BacktestMetrics::calculate(&curve, dec!(10000), &trades, &pnls, 8760.0);

        assert_eq!(m.total_trades, 2);
        assert_eq!(m.positions_opened, 1);
        assert_eq!(m.positions_closed, 6);
        assert_eq!(m.win_rate, dec!(50));
        assert_eq!(m.profit_factor, dec!(3));
        assert_eq!(m.avg_win, dec!(30));
        assert_eq!(m.avg_loss, dec!(-15));
        assert_eq!(m.expectancy, dec!(10));
        assert_eq!(m.largest_win, dec!(50));
        assert_eq!(m.largest_loss, dec!(-20));
        assert_eq!(m.max_consecutive_wins, 1);
        assert_eq!(m.max_consecutive_losses, 2);
        assert_eq!(m.total_fees, dec!(1.5));
    }

    #[test]
    fn test_no_closed_positions() {
        let m = BacktestMetrics::calculate(&curve(&[dec!(100)]), dec!(100), &[], &[], 8760.0);
        assert_eq!(m.win_rate, Decimal::ZERO);
        assert_eq!(m.profit_factor, Decimal::ZERO);
        assert_eq!(m.expectancy, Decimal::ZERO);
    }

    #[test]
    fn test_metrics_summary() {
        let curve = curve(&[dec!(10000), dec!(10500)]);
        let m = BacktestMetrics::calculate(&curve, dec!(10000), &[], &[dec!(500)], 8760.0);
        let summary = m.summary();
        assert!(summary.contains("500.00"));
        assert!(summary.contains("Sharpe"));
        assert!(summary.contains("Profit Factor"));
    }
}
