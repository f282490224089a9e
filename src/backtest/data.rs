//! Historical data loading and result export for backtesting.
//!
//! Provides candle and quote CSV import plus trade/equity CSV export.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

use super::engine::TradeRecord;
use super::metrics::EquityPoint;
use crate::exchange::{Candle, ReplayFeed, ReplayQuoteSource};

/// Trait for loading historical candles.
pub trait DataLoader: Send + Sync {
    /// Ordered candles for one instrument in the given time range (inclusive).
    fn load_candles(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    /// Get the available date range in the data.
    fn available_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)>;

    /// Get all available instruments.
    fn available_instruments(&self) -> Vec<String>;
}

/// CSV candle loader.
///
/// Expected CSV format:
/// ```csv
/// timestamp,instrument,open,high,low,close,volume
/// 2024-01-01T00:00:00Z,BTCUSDT,42000.5,42100,41950,42050.25,1250.5
/// ```
#[derive(Debug, Clone)]
pub struct CsvDataLoader {
    /// Candles per instrument, sorted by timestamp
    series: BTreeMap<String, Vec<Candle>>,
}

impl CsvDataLoader {
    /// Load data from a CSV file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

        Self::from_csv_content(&content)
    }

    /// Load data from CSV content string.
    ///
    /// Rows may come in any order; a duplicate timestamp within an instrument is an error.
    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut series: BTreeMap<String, Vec<Candle>> = BTreeMap::new();

        for (line_num, line) in content.lines().enumerate() {
            // Skip header
            if line_num == 0 && line.starts_with("timestamp") {
                continue;
            }

            if line.trim().is_empty() {
                continue;
            }

            let candle = parse_candle(line)
                .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;
            series.entry(candle.instrument.clone()).or_default().push(candle);
        }

        if series.is_empty() {
            anyhow::bail!("CSV file contains no data rows");
        }

        for (instrument, candles) in series.iter_mut() {
            candles.sort_by_key(|c| c.timestamp);
            if let Some(pair) = candles.windows(2).find(|w| w[0].timestamp == w[1].timestamp) {
                anyhow::bail!("Duplicate {} candle at {}", instrument, pair[0].timestamp);
            }
        }

        Ok(Self { series })
    }

    /// Create a loader from in-memory candles.
    pub fn from_candles(candles: Vec<Candle>) -> Self {
        let mut series: BTreeMap<String, Vec<Candle>> = BTreeMap::new();
        for candle in candles {
            series.entry(candle.instrument.clone()).or_default().push(candle);
        }
        for candles in series.values_mut() {
            candles.sort_by_key(|c| c.timestamp);
        }
        Self { series }
    }

    /// Total number of candles across instruments.
    pub fn len(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// A replay feed over the same candles, for the live pipeline.
    pub fn to_feed(&self) -> ReplayFeed {
        ReplayFeed::new(self.series.values().flatten().cloned().collect())
    }
}

impl DataLoader for CsvDataLoader {
    fn load_candles(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let candles = self
            .series
            .get(instrument)
            .with_context(|| format!("No data for instrument {}", instrument))?;

        Ok(candles
            .iter()
            .filter(|c| c.timestamp >= start && c.timestamp <= end)
            .cloned()
            .collect())
    }

    fn available_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.series.values().filter_map(|s| s.first()).map(|c| c.timestamp).min()?;
        let end = self.series.values().filter_map(|s| s.last()).map(|c| c.timestamp).max()?;
        Some((start, end))
    }

    fn available_instruments(&self) -> Vec<String> {
        self.series.keys().cloned().collect()
    }
}

fn parse_candle(line: &str) -> Result<Candle> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 7 {
        anyhow::bail!(
            "Expected 7 columns (timestamp,instrument,open,high,low,close,volume), got {}",
            parts.len()
        );
    }

    let decimal = |idx: usize, name: &str| -> Result<Decimal> {
        parts[idx]
            .parse()
            .with_context(|| format!("Invalid {}: {}", name, parts[idx]))
    };

    let candle = Candle {
        timestamp: parts[0]
            .parse()
            .with_context(|| format!("Invalid timestamp: {}", parts[0]))?,
        instrument: parts[1].to_string(),
        open: decimal(2, "open")?,
        high: decimal(3, "high")?,
        low: decimal(4, "low")?,
        close: decimal(5, "close")?,
        volume: decimal(6, "volume")?,
    };

    if candle.low > candle.high || candle.close <= Decimal::ZERO {
        anyhow::bail!("Inconsistent OHLC values");
    }
    Ok(candle)
}

/// Load recorded venue quotes into replay sources.
///
/// Expected CSV format, one price per row in replay order:
/// ```csv
/// venue,instrument,price
/// alpha,BTCUSDT,42000.5
/// ```
pub fn load_quote_sources(content: &str) -> Result<Vec<ReplayQuoteSource>> {
    let mut paths: BTreeMap<String, BTreeMap<String, Vec<Decimal>>> = BTreeMap::new();

    for (line_num, line) in content.lines().enumerate() {
        if (line_num == 0 && line.starts_with("venue")) || line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 3 {
            anyhow::bail!("Line {}: expected venue,instrument,price", line_num + 1);
        }
        let price: Decimal = parts[2]
            .parse()
            .with_context(|| format!("Line {}: invalid price {}", line_num + 1, parts[2]))?;
        paths
            .entry(parts[0].to_string())
            .or_default()
            .entry(parts[1].to_string())
            .or_default()
            .push(price);
    }

    Ok(paths
        .into_iter()
        .map(|(venue, instruments)| {
            instruments
                .into_iter()
                .fold(ReplayQuoteSource::new(venue), |source, (instrument, prices)| {
                    source.with_prices(&instrument, prices)
                })
        })
        .collect())
}

/// Trade list as CSV.
pub fn trades_to_csv(trades: &[TradeRecord]) -> String {
    let mut out = String::from(
        "timestamp,position_id,instrument,strategy,kind,side,price,size,fee,realized_pnl,exit_reason\n",
    );
    for t in trades {
        let reason = t
            .exit_reason
            .and_then(|r| serde_json::to_value(r).ok())
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{}",
            t.timestamp.to_rfc3339(),
            t.position_id,
            t.instrument,
            t.strategy,
            t.kind,
            t.side,
            t.price,
            t.size,
            t.fee,
            t.realized_pnl,
            reason
        );
    }
    out
}

/// Equity curve as CSV.
pub fn equity_to_csv(curve: &[EquityPoint]) -> String {
    let mut out = String::from("timestamp,balance,unrealized_pnl,total_equity,drawdown,position_count\n");
    for p in curve {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{}",
            p.timestamp.to_rfc3339(),
            p.balance,
            p.unrealized_pnl,
            p.total_equity,
            p.drawdown,
            p.position_count
        );
    }
    out
}

/// Write `trades.csv`, `equity.csv` and `metrics.json` for a run into `dir`.
pub fn save_results(dir: &Path, result: &super::engine::BacktestResult) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    std::fs::write(dir.join("trades.csv"), trades_to_csv(&result.trades))
        .context("Failed to write trades.csv")?;
    std::fs::write(dir.join("equity.csv"), equity_to_csv(&result.equity_curve))
        .context("Failed to write equity.csv")?;
    let metrics = serde_json::to_string_pretty(&result.metrics).context("Failed to serialize metrics")?;
    std::fs::write(dir.join("metrics.json"), metrics).context("Failed to write metrics.json")?;

    Ok(())
}

/// Instruments present in a set of candles, sorted.
pub fn instruments_of(candles: &[Candle]) -> Vec<String> {
    candles
        .iter()
        .map(|c| c.instrument.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
