//! Configuration management for the regime trader.
//!
//! Loads settings from an optional config file and `RTE__`-prefixed
//! environment variables.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::regime::Regime;
use crate::signal::SignalWeights;
use crate::strategy::{StrategyKind, StrategyState};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Weights of the composite signal vote
    #[serde(default)]
    pub signal_weights: SignalWeightsConfig,
    /// Indicator periods and thresholds
    #[serde(default)]
    pub indicators: IndicatorConfig,
    /// Regime classifier parameters
    #[serde(default)]
    pub regime: RegimeConfig,
    /// Strategy dispatch and per-strategy parameters
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Risk management parameters
    #[serde(default)]
    pub risk: RiskConfig,
    /// Cross-venue arbitrage monitor
    #[serde(default)]
    pub arbitrage: ArbitrageConfig,
    /// Historical replay settings
    #[serde(default)]
    pub backtest: BacktestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalWeightsConfig {
    #[serde(default = "default_rsi_weight")]
    pub rsi: f64,
    #[serde(default = "default_wavetrend_weight")]
    pub wavetrend: f64,
    #[serde(default = "default_aux_weight")]
    pub aux: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    /// RSI at or below this is fully bullish (+1)
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: f64,
    /// RSI at or above this is fully bearish (-1)
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: f64,
    #[serde(default = "default_wt_channel")]
    pub wt_channel_length: usize,
    #[serde(default = "default_wt_average")]
    pub wt_average_length: usize,
    #[serde(default = "default_wt_signal")]
    pub wt_signal_length: usize,
    /// |wt1| beyond this counts as an extreme crossover
    #[serde(default = "default_wt_extreme")]
    pub wt_extreme_level: f64,
    #[serde(default = "default_momentum_short")]
    pub momentum_short: usize,
    #[serde(default = "default_momentum_long")]
    pub momentum_long: usize,
    /// Candles retained per instrument for indicator computation
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Bars used for the efficiency ratio
    #[serde(default = "default_efficiency_period")]
    pub efficiency_period: usize,
    /// Bars used for return volatility
    #[serde(default = "default_volatility_period")]
    pub volatility_period: usize,
    /// Per-bar return volatility considered fully volatile
    #[serde(default = "default_volatile_threshold")]
    pub volatile_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Strategy run in each regime. Missing regimes map to idle.
    #[serde(default = "default_regime_map")]
    pub regime_map: BTreeMap<Regime, StrategyState>,
    /// Run this strategy regardless of regime
    #[serde(default)]
    pub pinned: Option<StrategyKind>,
    #[serde(default)]
    pub ema_crossover: EmaCrossoverConfig,
    #[serde(default)]
    pub mean_reversion: MeanReversionConfig,
    #[serde(default)]
    pub grid: GridConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmaCrossoverConfig {
    #[serde(default = "default_ema_fast")]
    pub fast_period: usize,
    #[serde(default = "default_ema_slow")]
    pub slow_period: usize,
    /// Emit short entries on bearish crosses
    #[serde(default)]
    pub allow_short: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeanReversionConfig {
    #[serde(default = "default_bb_period")]
    pub bb_period: usize,
    #[serde(default = "default_bb_std_mult")]
    pub bb_std_mult: f64,
    /// Also require RSI beyond the oversold/overbought thresholds
    #[serde(default = "default_true")]
    pub rsi_confirm: bool,
    #[serde(default)]
    pub allow_short: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Number of intervals between the range low and high
    #[serde(default = "default_grid_levels")]
    pub levels: usize,
    /// Bars used to anchor the grid range
    #[serde(default = "default_grid_lookback")]
    pub lookback: usize,
}

/// How a new position is sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingRule {
    /// Risk `per_trade_risk_pct` of capital between entry and stop
    FixedFractional,
    /// Always deploy `fixed_notional`
    FixedNotional,
}

/// What tripping the daily breaker does to open positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerPolicy {
    BlockNewEntries,
    ForceClose,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Realized loss per day, as a fraction of day-start capital, that trips the breaker
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: Decimal,
    /// Capital risked per trade under fixed fractional sizing
    #[serde(default = "default_per_trade_risk_pct")]
    pub per_trade_risk_pct: Decimal,
    #[serde(default = "default_sizing")]
    pub sizing: SizingRule,
    #[serde(default = "default_fixed_notional")]
    pub fixed_notional: Decimal,

    // Exit levels, as fractions of entry price
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    #[serde(default = "default_tp1_pct")]
    pub tp1_pct: Decimal,
    #[serde(default = "default_tp2_pct")]
    pub tp2_pct: Decimal,
    /// Fraction of the initial size closed at TP1
    #[serde(default = "default_tp1_close_fraction")]
    pub tp1_close_fraction: Decimal,
    /// Fraction of the initial size closed at TP2
    #[serde(default = "default_tp2_close_fraction")]
    pub tp2_close_fraction: Decimal,
    /// Runner trailing distance from the best price seen
    #[serde(default = "default_trailing_stop_pct")]
    pub trailing_stop_pct: Decimal,
    #[serde(default = "default_true")]
    pub move_stop_to_breakeven: bool,

    // Allocation limits
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    /// Maximum notional on one instrument as a fraction of capital
    #[serde(default = "default_max_instrument_allocation")]
    pub max_instrument_allocation: Decimal,
    /// Maximum total notional as a fraction of capital
    #[serde(default = "default_max_total_utilization")]
    pub max_total_utilization: Decimal,
    /// Quantity precision
    #[serde(default = "default_size_step")]
    pub size_step: Decimal,

    #[serde(default = "default_breaker_policy")]
    pub breaker_policy: BreakerPolicy,
    /// Submissions of a rejected entry before it is cancelled
    #[serde(default = "default_max_submit_attempts")]
    pub max_submit_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_calls")]
    pub max_calls: u32,
    #[serde(default = "default_rate_limit_window")]
    pub window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub instruments: Vec<String>,
    #[serde(default)]
    pub venues: Vec<String>,
    /// Relative spread that must be exceeded, as a fraction (0.003 = 0.3%)
    #[serde(default = "default_spread_threshold")]
    pub spread_threshold_pct: Decimal,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_opportunity_ttl_ms")]
    pub opportunity_ttl_ms: u64,
    /// Per-venue token bucket
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Attempts per quote fetch before the failure is reported
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Price at which simulated orders fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillModel {
    /// Open of the bar after the decision
    NextBarOpen,
    /// Close of the decision bar
    SignalBarClose,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_initial_capital")]
    pub initial_capital: Decimal,
    /// Fee rate per fill (taker)
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,
    /// Adverse slippage in basis points
    #[serde(default)]
    pub slippage_bps: Decimal,
    #[serde(default = "default_fill_model")]
    pub fill_model: FillModel,
    /// Bars per year at the data frequency (8760 for hourly)
    #[serde(default = "default_bars_per_year")]
    pub bars_per_year: f64,
}

fn default_true() -> bool {
    true
}

fn default_rsi_weight() -> f64 {
    0.4
}

fn default_wavetrend_weight() -> f64 {
    0.4
}

fn default_aux_weight() -> f64 {
    0.2
}

fn default_rsi_period() -> usize {
    14
}

fn default_rsi_oversold() -> f64 {
    30.0
}

fn default_rsi_overbought() -> f64 {
    70.0
}

fn default_wt_channel() -> usize {
    10
}

fn default_wt_average() -> usize {
    21
}

fn default_wt_signal() -> usize {
    4
}

fn default_wt_extreme() -> f64 {
    50.0
}

fn default_momentum_short() -> usize {
    5
}

fn default_momentum_long() -> usize {
    20
}

fn default_window_size() -> usize {
    300 // Comfortably above the longest lookback (grid 200)
}

fn default_efficiency_period() -> usize {
    20
}

fn default_volatility_period() -> usize {
    20
}

fn default_volatile_threshold() -> f64 {
    0.02 // 2% per-bar return stddev
}

fn default_regime_map() -> BTreeMap<Regime, StrategyState> {
    BTreeMap::from([
        (Regime::Trend, StrategyState::EmaCrossover),
        (Regime::Range, StrategyState::MeanReversion),
        (Regime::Volatile, StrategyState::Grid),
    ])
}

fn default_ema_fast() -> usize {
    20
}

fn default_ema_slow() -> usize {
    50
}

fn default_bb_period() -> usize {
    20
}

fn default_bb_std_mult() -> f64 {
    2.0
}

fn default_grid_levels() -> usize {
    8
}

fn default_grid_lookback() -> usize {
    200
}

fn default_daily_loss_limit() -> Decimal {
    Decimal::new(5, 2) // 0.05 = 5% of day-start capital
}

fn default_per_trade_risk_pct() -> Decimal {
    Decimal::new(1, 2) // 0.01 = 1% of capital at risk per trade
}

fn default_sizing() -> SizingRule {
    SizingRule::FixedFractional
}

fn default_fixed_notional() -> Decimal {
    Decimal::new(1000, 0) // 1000 USDT
}

fn default_stop_loss_pct() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

fn default_tp1_pct() -> Decimal {
    Decimal::new(3, 2) // 0.03
}

fn default_tp2_pct() -> Decimal {
    Decimal::new(6, 2) // 0.06
}

fn default_tp1_close_fraction() -> Decimal {
    Decimal::new(5, 1) // 0.5 of initial size
}

fn default_tp2_close_fraction() -> Decimal {
    Decimal::new(3, 1) // 0.3 of initial size, 0.2 left as runner
}

fn default_trailing_stop_pct() -> Decimal {
    Decimal::new(15, 3) // 0.015
}

fn default_max_positions() -> usize {
    5
}

fn default_max_instrument_allocation() -> Decimal {
    Decimal::new(50, 2) // 0.50
}

fn default_max_total_utilization() -> Decimal {
    Decimal::new(90, 2) // 0.90
}

fn default_size_step() -> Decimal {
    Decimal::new(1, 4) // 0.0001
}

fn default_breaker_policy() -> BreakerPolicy {
    BreakerPolicy::BlockNewEntries
}

fn default_max_submit_attempts() -> u32 {
    3
}

fn default_rate_limit_calls() -> u32 {
    10
}

fn default_rate_limit_window() -> u64 {
    1000
}

fn default_spread_threshold() -> Decimal {
    Decimal::new(3, 3) // 0.003 (0.3%)
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_opportunity_ttl_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_initial_capital() -> Decimal {
    Decimal::new(10_000, 0) // 10,000 USDT
}

fn default_fee_rate() -> Decimal {
    Decimal::new(4, 4) // 0.0004 (0.04% taker)
}

fn default_fill_model() -> FillModel {
    FillModel::NextBarOpen
}

fn default_bars_per_year() -> f64 {
    8760.0 // hourly bars
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("RTE"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Load from an explicit file path (extension selects the format).
    pub fn load_from(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::default().separator("__").prefix("RTE"))
            .build()
            .with_context(|| format!("Failed to build configuration from {}", path))?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values. Any error here is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        SignalWeights::from_config(&self.signal_weights)?;

        let ind = &self.indicators;
        anyhow::ensure!(
            ind.rsi_period > 0
                && ind.wt_channel_length > 0
                && ind.wt_average_length > 0
                && ind.wt_signal_length > 0
                && ind.momentum_short > 0
                && ind.momentum_long > 0,
            "indicator periods must be positive"
        );
        anyhow::ensure!(
            ind.rsi_oversold < 50.0 && ind.rsi_overbought > 50.0,
            "rsi_oversold must be below 50 and rsi_overbought above 50"
        );
        anyhow::ensure!(
            self.regime.efficiency_period > 0 && self.regime.volatility_period > 1,
            "regime periods must be positive"
        );
        anyhow::ensure!(
            self.regime.volatile_threshold > 0.0,
            "volatile_threshold must be positive"
        );

        let strat = &self.strategy;
        anyhow::ensure!(
            strat.ema_crossover.fast_period > 0
                && strat.ema_crossover.fast_period < strat.ema_crossover.slow_period,
            "ema fast_period must be positive and below slow_period"
        );
        anyhow::ensure!(
            strat.mean_reversion.bb_period > 1 && strat.mean_reversion.bb_std_mult > 0.0,
            "bollinger period must exceed 1 with a positive multiplier"
        );
        anyhow::ensure!(
            strat.grid.levels >= 2 && strat.grid.lookback > 1,
            "grid needs at least 2 levels and a lookback above 1"
        );
        anyhow::ensure!(
            ind.window_size >= strat.grid.lookback && ind.window_size > strat.ema_crossover.slow_period,
            "window_size must cover the longest strategy lookback"
        );

        let risk = &self.risk;
        anyhow::ensure!(
            risk.daily_loss_limit > Decimal::ZERO && risk.daily_loss_limit <= Decimal::ONE,
            "daily_loss_limit must be between 0 and 1"
        );
        anyhow::ensure!(
            risk.per_trade_risk_pct > Decimal::ZERO && risk.per_trade_risk_pct <= Decimal::ONE,
            "per_trade_risk_pct must be between 0 and 1"
        );
        anyhow::ensure!(
            risk.stop_loss_pct > Decimal::ZERO && risk.stop_loss_pct < Decimal::ONE,
            "stop_loss_pct must be between 0 and 1"
        );
        anyhow::ensure!(
            risk.tp1_pct > Decimal::ZERO && risk.tp1_pct < risk.tp2_pct,
            "tp1_pct must be positive and below tp2_pct"
        );
        anyhow::ensure!(
            risk.tp1_close_fraction > Decimal::ZERO
                && risk.tp2_close_fraction > Decimal::ZERO
                && risk.tp1_close_fraction + risk.tp2_close_fraction < Decimal::ONE,
            "close fractions must be positive and leave a runner"
        );
        anyhow::ensure!(
            risk.trailing_stop_pct > Decimal::ZERO && risk.trailing_stop_pct < Decimal::ONE,
            "trailing_stop_pct must be between 0 and 1"
        );
        anyhow::ensure!(risk.max_positions > 0, "max_positions must be positive");
        anyhow::ensure!(
            risk.max_instrument_allocation > Decimal::ZERO
                && risk.max_instrument_allocation <= risk.max_total_utilization
                && risk.max_total_utilization <= Decimal::ONE,
            "allocation limits must satisfy 0 < instrument <= total <= 1"
        );
        anyhow::ensure!(risk.size_step > Decimal::ZERO, "size_step must be positive");
        anyhow::ensure!(
            risk.max_submit_attempts > 0,
            "max_submit_attempts must be positive"
        );

        let arb = &self.arbitrage;
        if arb.enabled {
            anyhow::ensure!(
                arb.venues.len() >= 2,
                "arbitrage needs at least two venues, got {}",
                arb.venues.len()
            );
            anyhow::ensure!(
                !arb.instruments.is_empty(),
                "arbitrage needs at least one instrument"
            );
        }
        anyhow::ensure!(
            arb.spread_threshold_pct > Decimal::ZERO,
            "spread_threshold_pct must be positive"
        );
        anyhow::ensure!(
            arb.poll_interval_ms > 0 && arb.rate_limit.max_calls > 0 && arb.rate_limit.window_ms > 0,
            "arbitrage polling and rate limit must be positive"
        );
        anyhow::ensure!(
            arb.max_attempts > 0 && arb.queue_capacity > 0,
            "arbitrage max_attempts and queue_capacity must be positive"
        );

        anyhow::ensure!(
            self.backtest.initial_capital > Decimal::ZERO,
            "initial_capital must be positive"
        );
        anyhow::ensure!(
            self.backtest.fee_rate >= Decimal::ZERO && self.backtest.slippage_bps >= Decimal::ZERO,
            "fee_rate and slippage_bps must not be negative"
        );
        anyhow::ensure!(
            self.backtest.bars_per_year > 0.0,
            "bars_per_year must be positive"
        );

        Ok(())
    }
}

impl Default for SignalWeightsConfig {
    fn default() -> Self {
        Self {
            rsi: default_rsi_weight(),
            wavetrend: default_wavetrend_weight(),
            aux: default_aux_weight(),
        }
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: default_rsi_period(),
            rsi_oversold: default_rsi_oversold(),
            rsi_overbought: default_rsi_overbought(),
            wt_channel_length: default_wt_channel(),
            wt_average_length: default_wt_average(),
            wt_signal_length: default_wt_signal(),
            wt_extreme_level: default_wt_extreme(),
            momentum_short: default_momentum_short(),
            momentum_long: default_momentum_long(),
            window_size: default_window_size(),
        }
    }
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            efficiency_period: default_efficiency_period(),
            volatility_period: default_volatility_period(),
            volatile_threshold: default_volatile_threshold(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            regime_map: default_regime_map(),
            pinned: None,
            ema_crossover: EmaCrossoverConfig::default(),
            mean_reversion: MeanReversionConfig::default(),
            grid: GridConfig::default(),
        }
    }
}

impl Default for EmaCrossoverConfig {
    fn default() -> Self {
        Self {
            fast_period: default_ema_fast(),
            slow_period: default_ema_slow(),
            allow_short: false,
        }
    }
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            bb_period: default_bb_period(),
            bb_std_mult: default_bb_std_mult(),
            rsi_confirm: true,
            allow_short: false,
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            levels: default_grid_levels(),
            lookback: default_grid_lookback(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            daily_loss_limit: default_daily_loss_limit(),
            per_trade_risk_pct: default_per_trade_risk_pct(),
            sizing: default_sizing(),
            fixed_notional: default_fixed_notional(),
            stop_loss_pct: default_stop_loss_pct(),
            tp1_pct: default_tp1_pct(),
            tp2_pct: default_tp2_pct(),
            tp1_close_fraction: default_tp1_close_fraction(),
            tp2_close_fraction: default_tp2_close_fraction(),
            trailing_stop_pct: default_trailing_stop_pct(),
            move_stop_to_breakeven: true,
            max_positions: default_max_positions(),
            max_instrument_allocation: default_max_instrument_allocation(),
            max_total_utilization: default_max_total_utilization(),
            size_step: default_size_step(),
            breaker_policy: default_breaker_policy(),
            max_submit_attempts: default_max_submit_attempts(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: default_rate_limit_calls(),
            window_ms: default_rate_limit_window(),
        }
    }
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            instruments: Vec::new(),
            venues: Vec::new(),
            spread_threshold_pct: default_spread_threshold(),
            poll_interval_ms: default_poll_interval_ms(),
            opportunity_ttl_ms: default_opportunity_ttl_ms(),
            rate_limit: RateLimitConfig::default(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: default_initial_capital(),
            fee_rate: default_fee_rate(),
            slippage_bps: Decimal::ZERO,
            fill_model: default_fill_model(),
            bars_per_year: default_bars_per_year(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_regime_map() {
        let config = Config::default();
        assert_eq!(
            config.strategy.regime_map.get(&Regime::Trend),
            Some(&StrategyState::EmaCrossover)
        );
        assert_eq!(config.strategy.regime_map.len(), 3);
    }

    #[test]
    fn test_bad_weights_rejected() {
        let mut config = Config::default();
        config.signal_weights.aux = 0.25;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn test_tp_ordering_enforced() {
        let mut config = Config::default();
        config.risk.tp1_pct = dec!(0.08);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_close_fractions_must_leave_runner() {
        let mut config = Config::default();
        config.risk.tp1_close_fraction = dec!(0.6);
        config.risk.tp2_close_fraction = dec!(0.4);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_arbitrage_needs_two_venues() {
        let mut config = Config::default();
        config.arbitrage.enabled = true;
        config.arbitrage.instruments = vec!["BTCUSDT".to_string()];
        config.arbitrage.venues = vec!["alpha".to_string()];
        assert!(config.validate().is_err());

        config.arbitrage.venues.push("beta".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial_json() {
        let json = r#"{
            "risk": { "breaker_policy": "force_close", "stop_loss_pct": "0.03" },
            "strategy": { "pinned": "grid", "regime_map": { "trend": "idle" } }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.risk.breaker_policy, BreakerPolicy::ForceClose);
        assert_eq!(config.risk.stop_loss_pct, dec!(0.03));
        assert_eq!(config.risk.tp1_pct, dec!(0.03));
        assert_eq!(config.strategy.pinned, Some(StrategyKind::Grid));
        assert_eq!(
            config.strategy.regime_map.get(&Regime::Trend),
            Some(&StrategyState::Idle)
        );
        assert_eq!(config.signal_weights.rsi, 0.4);
    }
}
