//! # Regime Trader
//!
//! A trading decision engine: indicator signals are combined into a composite
//! vote, the market regime selects one strategy per instrument, and a risk
//! manager sizes, approves and manages the resulting positions. The same
//! decision chain drives live trading and deterministic historical replay.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Boundary types, adapter traits, event sinks, paper/replay implementations
//! - `indicators`: RSI, WaveTrend, Bollinger bands, momentum
//! - `signal`: Weighted composite signal
//! - `regime`: Trend/range/volatile classification
//! - `strategy`: EMA crossover, mean reversion and grid strategies, regime dispatch
//! - `risk`: Position lifecycle, sizing, capital ledger, daily loss breaker
//! - `arbitrage`: Cross-venue spread monitor
//! - `pipeline`: Per-instrument decision chain and live runner
//! - `backtest`: Historical replay and performance metrics
//! - `utils`: Shared utilities and decimal arithmetic

pub mod arbitrage;
pub mod backtest;
pub mod config;
pub mod exchange;
pub mod indicators;
pub mod pipeline;
pub mod regime;
pub mod risk;
pub mod signal;
pub mod strategy;
pub mod utils;

pub use config::Config;
