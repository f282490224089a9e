//! Regime Trader - Main Entry Point
//!
//! Historical replay, paper trading over a replay feed, and config checks.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use regime_trader::arbitrage::{opportunity_queue, ArbitrageEngine};
use regime_trader::backtest::{
    load_quote_sources, save_results, BacktestEngine, CsvDataLoader, DataLoader, PortfolioRunner,
};
use regime_trader::config::Config;
use regime_trader::exchange::{
    EventSink, ExecutionAdapter, MarketDataFeed, PaperExecutionAdapter, QuoteSource,
    TracingEventSink,
};
use regime_trader::pipeline::LiveRunner;
use regime_trader::risk::RiskState;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Regime Trader CLI
#[derive(Parser)]
#[command(name = "regime-trader")]
#[command(version, about = "Regime-driven trading decision engine")]
struct Cli {
    /// Config file (toml/yaml/json); defaults to ./config.* when present
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay historical candles and report performance
    Backtest {
        /// Path to candle CSV file
        #[arg(short, long)]
        data: String,

        /// Start date (YYYY-MM-DD), defaults to the first candle
        #[arg(short, long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD), defaults to the last candle
        #[arg(short, long)]
        end: Option<String>,

        /// Initial capital, overrides the config
        #[arg(short = 'b', long)]
        initial_capital: Option<Decimal>,

        /// Replay each instrument with its own ledger, in parallel
        #[arg(long)]
        independent: bool,

        /// Number of parallel replays with --independent
        #[arg(short, long, default_value = "4")]
        parallelism: usize,

        /// Output directory for results
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Run the live pipeline against a candle replay with paper execution
    Paper {
        /// Path to candle CSV file
        #[arg(short, long)]
        data: String,

        /// Quote CSV (venue,instrument,price) to run the arbitrage monitor on
        #[arg(short, long)]
        quotes: Option<String>,
    },

    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e);
    }

    match cli.command {
        Commands::Backtest {
            data,
            start,
            end,
            initial_capital,
            independent,
            parallelism,
            output,
        } => {
            let mut config = config;
            if let Some(capital) = initial_capital {
                config.backtest.initial_capital = capital;
                config.validate()?;
            }
            run_backtest(
                config,
                &data,
                start.as_deref(),
                end.as_deref(),
                independent.then_some(parallelism),
                output.as_deref(),
            )
            .await
        }
        Commands::Paper { data, quotes } => run_paper(config, &data, quotes.as_deref()).await,
        Commands::CheckConfig => {
            log_config(&config);
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // File appender for detailed logs
    let file_appender = tracing_appender::rolling::hourly("logs", "regime-trader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("regime_trader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!(
        "   Signal weights: rsi {} / wavetrend {} / aux {}",
        config.signal_weights.rsi, config.signal_weights.wavetrend, config.signal_weights.aux
    );
    match config.strategy.pinned {
        Some(kind) => info!("   Strategy pinned to {}", kind),
        None => info!("   Regime map: {:?}", config.strategy.regime_map),
    }
    info!(
        "   Stop {:.1}% | TP1 {:.1}% | TP2 {:.1}% | Trail {:.1}%",
        config.risk.stop_loss_pct * dec!(100),
        config.risk.tp1_pct * dec!(100),
        config.risk.tp2_pct * dec!(100),
        config.risk.trailing_stop_pct * dec!(100)
    );
    info!(
        "   Daily loss limit: {:.1}% ({:?})",
        config.risk.daily_loss_limit * dec!(100),
        config.risk.breaker_policy
    );
    info!(
        "   Max positions: {} | Instrument allocation: {:.0}% | Total: {:.0}%",
        config.risk.max_positions,
        config.risk.max_instrument_allocation * dec!(100),
        config.risk.max_total_utilization * dec!(100)
    );
    if config.arbitrage.enabled {
        info!(
            "   Arbitrage: {} venues, threshold {:.2}%",
            config.arbitrage.venues.len(),
            config.arbitrage.spread_threshold_pct * dec!(100)
        );
    }
}

fn parse_date(value: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}'", value))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .with_context(|| format!("Invalid date '{}'", value))
}

/// Run a backtest on historical data.
async fn run_backtest(
    config: Config,
    data_path: &str,
    start: Option<&str>,
    end: Option<&str>,
    parallelism: Option<usize>,
    output_dir: Option<&str>,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              BACKTEST MODE                                 ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    info!("📊 Loading data from: {}", data_path);
    let loader = CsvDataLoader::new(data_path)?;
    let (data_start, data_end) = loader
        .available_range()
        .context("Data file contains no candles")?;
    let instruments = loader.available_instruments();

    let start = start.map(|s| parse_date(s, false)).transpose()?.unwrap_or(data_start);
    let end = end.map(|s| parse_date(s, true)).transpose()?.unwrap_or(data_end);
    anyhow::ensure!(start <= end, "start {} is after end {}", start, end);

    info!("   Instruments: {}", instruments.join(", "));
    info!("   Candles: {}", loader.len());
    info!("💰 Initial capital: ${:.2}", config.backtest.initial_capital);
    info!(
        "📅 Period: {} to {}",
        start.format("%Y-%m-%d %H:%M"),
        end.format("%Y-%m-%d %H:%M")
    );

    let sink: Arc<dyn EventSink> = Arc::new(TracingEventSink);

    if let Some(parallelism) = parallelism {
        let runner = PortfolioRunner::new(config, sink, parallelism);
        let results = runner.run(&loader, &instruments, start, end).await?;
        println!("\n{}", results.summary());

        if let Some(dir) = output_dir {
            for (instrument, result) in &results.runs {
                save_results(&Path::new(dir).join(instrument), result)?;
            }
            std::fs::create_dir_all(dir)?;
            results.to_csv(&format!("{}/portfolio.csv", dir))?;
            info!("📁 Results saved to: {}", dir);
        }
        return Ok(());
    }

    let mut candles = Vec::new();
    for instrument in &instruments {
        candles.extend(loader.load_candles(instrument, start, end)?);
    }

    let engine = BacktestEngine::new(config, sink);
    let result = tokio::task::spawn_blocking(move || engine.run(&candles))
        .await
        .context("Backtest task panicked")??;

    println!("\n{}", result.summary());

    if let Some(dir) = output_dir {
        save_results(Path::new(dir), &result)?;
        info!("📁 Results saved to: {}", dir);
    }

    Ok(())
}

/// Run the live pipeline with paper execution over recorded candles.
async fn run_paper(mut config: Config, data_path: &str, quotes_path: Option<&str>) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              PAPER TRADING MODE                            ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let loader = CsvDataLoader::new(data_path)?;
    let start = loader
        .available_range()
        .map(|(start, _)| start)
        .context("Data file contains no candles")?;
    let instruments = loader.available_instruments();

    let sink: Arc<dyn EventSink> = Arc::new(TracingEventSink);
    let feed: Arc<dyn MarketDataFeed> = Arc::new(loader.to_feed());
    let adapter: Arc<dyn ExecutionAdapter> =
        Arc::new(PaperExecutionAdapter::new(config.backtest.fee_rate));
    let state = RiskState::new(config.backtest.initial_capital, start).shared();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Stop on Ctrl+C
    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Shutdown signal received");
            let _ = ctrl_c_tx.send(true);
        }
    });

    let mut monitor = None;
    if let Some(path) = quotes_path {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read quotes file: {}", path))?;
        let sources: Vec<Arc<dyn QuoteSource>> = load_quote_sources(&content)?
            .into_iter()
            .map(|s| Arc::new(s) as Arc<dyn QuoteSource>)
            .collect();
        anyhow::ensure!(sources.len() >= 2, "arbitrage needs at least two venues");
        if config.arbitrage.instruments.is_empty() {
            config.arbitrage.instruments = instruments.clone();
        }

        let (tx, mut rx) = opportunity_queue(config.arbitrage.queue_capacity);
        let engine = ArbitrageEngine::new(config.arbitrage.clone(), sources, tx, sink.clone());
        let arb_shutdown = shutdown_rx.clone();
        let poller = tokio::spawn(async move { engine.run(arb_shutdown).await });
        let consumer = tokio::spawn(async move {
            while let Some(opportunity) = rx.recv().await {
                info!(
                    id = opportunity.id,
                    instrument = %opportunity.instrument,
                    buy = %opportunity.buy_venue,
                    sell = %opportunity.sell_venue,
                    spread = %opportunity.spread,
                    "Opportunity available"
                );
            }
        });
        monitor = Some((poller, consumer));
    }

    info!("🚀 Paper trading {} instrument(s)", instruments.len());
    let runner = Arc::new(LiveRunner::new(config, state.clone(), feed, adapter, sink));
    runner.run(instruments, shutdown_rx).await?;

    // Feeds are finite; stop the monitor once they are drained
    let _ = shutdown_tx.send(true);
    if let Some((poller, consumer)) = monitor {
        if let Err(e) = poller.await {
            error!(error = %e, "Arbitrage monitor panicked");
        }
        // The queue closes once the poller and its sender are gone
        if let Err(e) = consumer.await {
            error!(error = %e, "Opportunity consumer panicked");
        }
    }

    let state = state.lock().await;
    info!("═══════════════════════════════════════════════");
    info!("💰 Final capital: ${:.2}", state.capital());
    info!("📈 Open positions: {}", state.open_count());
    info!("📁 Closed positions: {}", state.closed.len());
    info!("═══════════════════════════════════════════════");

    Ok(())
}
