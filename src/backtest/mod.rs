//! Deterministic historical replay.
//!
//! This module provides:
//! - Candle CSV import and trade/equity export
//! - A replay engine running the live decision chain against a simulated fill model
//! - Parallel multi-instrument replay with a private ledger per run
//! - Performance metrics calculation
//!
//! # Example
//!
//! ```rust,ignore
//! use regime_trader::backtest::{BacktestEngine, CsvDataLoader, DataLoader};
//!
//! let loader = CsvDataLoader::new("data/candles.csv")?;
//! let candles = loader.load_candles("BTCUSDT", start, end)?;
//! let engine = BacktestEngine::new(config, Arc::new(TracingEventSink));
//!
//! let result = engine.run(&candles)?;
//! println!("Return: {:.2}%", result.metrics.total_return_pct);
//! ```

mod data;
mod engine;
mod metrics;
mod runner;

pub use data::{
    equity_to_csv, instruments_of, load_quote_sources, save_results, trades_to_csv, CsvDataLoader,
    DataLoader,
};
pub use engine::{BacktestEngine, BacktestResult, TradeKind, TradeRecord};
pub use metrics::{BacktestMetrics, EquityPoint};
pub use runner::{PortfolioResults, PortfolioRunner};
