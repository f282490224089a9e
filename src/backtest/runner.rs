//! Multi-instrument replay.
//!
//! Each instrument is replayed by its own engine with a private risk state,
//! so runs are independent and can execute in parallel.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::data::DataLoader;
use super::engine::{BacktestEngine, BacktestResult};
use crate::config::Config;
use crate::exchange::{Candle, EventSink};

/// Per-instrument outcome of a portfolio replay.
#[derive(Debug, Clone)]
pub struct PortfolioResults {
    /// Successful runs keyed by instrument
    pub runs: BTreeMap<String, BacktestResult>,
    /// Failed runs and their error
    pub failed: BTreeMap<String, String>,
}

impl PortfolioResults {
    /// Instrument with the highest Sharpe ratio.
    pub fn best_sharpe(&self) -> Option<(&String, &BacktestResult)> {
        self.runs
            .iter()
            .max_by(|a, b| a.1.metrics.sharpe_ratio.cmp(&b.1.metrics.sharpe_ratio))
    }

    /// Export one row per instrument to CSV.
    pub fn to_csv(&self, path: &str) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path))?;

        writeln!(
            file,
            "instrument,total_return_pct,cagr,sharpe_ratio,sortino_ratio,calmar_ratio,max_dd_pct,win_rate,profit_factor,trades"
        )?;

        for (instrument, result) in &self.runs {
            let m = &result.metrics;
            writeln!(
                file,
                "{},{},{},{},{},{},{},{},{},{}",
                instrument,
                m.total_return_pct,
                m.cagr,
                m.sharpe_ratio,
                m.sortino_ratio,
                m.calmar_ratio,
                m.max_drawdown * dec!(100),
                m.win_rate,
                m.profit_factor,
                m.total_trades,
            )?;
        }

        Ok(())
    }

    /// Generate a summary comparison table.
    pub fn summary(&self) -> String {
        let mut s = String::new();

        s.push_str("═══════════════════════════════════════════════════════════════\n");
        s.push_str("PORTFOLIO RESULTS\n");
        s.push_str("═══════════════════════════════════════════════════════════════\n");
        s.push_str(&format!(
            "Successful: {} | Failed: {}\n\n",
            self.runs.len(),
            self.failed.len()
        ));

        for (instrument, result) in &self.runs {
            let m = &result.metrics;
            s.push_str(&format!(
                "  {:<12} Return: {:>8.2}% | Sharpe: {:>7.3} | MaxDD: {:>6.2}% | Win: {:>5.1}% | Trades: {}\n",
                instrument,
                m.total_return_pct,
                m.sharpe_ratio,
                m.max_drawdown * dec!(100),
                m.win_rate,
                m.total_trades,
            ));
        }

        for (instrument, error) in &self.failed {
            s.push_str(&format!("  {:<12} FAILED: {}\n", instrument, error));
        }

        if let Some((instrument, result)) = self.best_sharpe() {
            s.push_str(&format!(
                "\nBEST BY SHARPE: {} ({:.3})\n",
                instrument, result.metrics.sharpe_ratio
            ));
        }

        s.push_str("═══════════════════════════════════════════════════════════════\n");

        s
    }
}

/// Replays several instruments in parallel.
pub struct PortfolioRunner {
    config: Config,
    sink: Arc<dyn EventSink>,
    parallelism: usize,
}

impl PortfolioRunner {
    pub fn new(config: Config, sink: Arc<dyn EventSink>, parallelism: usize) -> Self {
        Self {
            config,
            sink,
            parallelism: parallelism.max(1),
        }
    }

    /// Replay every instrument in `[start, end]` from `loader`.
    pub async fn run<D: DataLoader>(
        &self,
        loader: &D,
        instruments: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PortfolioResults> {
        info!(
            instruments = instruments.len(),
            parallelism = self.parallelism,
            "Starting portfolio replay"
        );

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut handles = Vec::with_capacity(instruments.len());
        let mut failed = BTreeMap::new();

        for instrument in instruments {
            let candles = match loader.load_candles(instrument, start, end) {
                Ok(candles) => candles,
                Err(e) => {
                    warn!(%instrument, error = %e, "Failed to load candles");
                    failed.insert(instrument.clone(), format!("{:#}", e));
                    continue;
                }
            };

            let sem = semaphore.clone();
            let engine = BacktestEngine::new(self.config.clone(), self.sink.clone());
            let name = instrument.clone();

            handles.push((name, tokio::spawn(replay(engine, candles, sem))));
        }

        let mut runs = BTreeMap::new();
        for (instrument, handle) in handles {
            match handle.await {
                Ok(Ok(result)) => {
                    info!(
                        %instrument,
                        sharpe = %result.metrics.sharpe_ratio,
                        return_pct = %result.metrics.total_return_pct,
                        "Replay complete"
                    );
                    runs.insert(instrument, result);
                }
                Ok(Err(e)) => {
                    warn!(%instrument, error = %e, "Replay failed");
                    failed.insert(instrument, format!("{:#}", e));
                }
                Err(e) => {
                    warn!(%instrument, error = %e, "Replay task panicked");
                    failed.insert(instrument, e.to_string());
                }
            }
        }

        Ok(PortfolioResults { runs, failed })
    }
}

/// One replay on the blocking pool, holding a permit for its duration.
async fn replay(
    engine: BacktestEngine,
    candles: Vec<Candle>,
    semaphore: Arc<Semaphore>,
) -> Result<BacktestResult> {
    let _permit = semaphore
        .acquire_owned()
        .await
        .context("Replay semaphore closed")?;
    tokio::task::spawn_blocking(move || engine.run(&candles))
        .await
        .context("Replay task panicked")?
}
