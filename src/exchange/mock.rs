//! Paper trading and replay implementations of the boundary traits.

use super::traits::{ExecutionAdapter, MarketDataFeed, QuoteError, QuoteSource};
use super::types::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Simulated account state for paper trading.
#[derive(Debug, Clone, Default)]
pub struct PaperTradingState {
    /// Open exposure keyed by client order id of the opening order
    pub positions: BTreeMap<String, ExchangePosition>,
    pub total_fees: Decimal,
    pub order_count: u64,
}

/// Execution adapter that fills every order immediately at its reference price.
pub struct PaperExecutionAdapter {
    state: Arc<RwLock<PaperTradingState>>,
    order_id_counter: AtomicU64,
    /// Taker fee rate applied to fill notional
    fee_rate: Decimal,
    /// Instruments whose orders are rejected (venue halts, tests)
    rejected_instruments: Arc<RwLock<HashSet<String>>>,
}

impl PaperExecutionAdapter {
    /// Create a paper adapter with the given fee rate.
    pub fn new(fee_rate: Decimal) -> Self {
        Self {
            state: Arc::new(RwLock::new(PaperTradingState::default())),
            order_id_counter: AtomicU64::new(1),
            fee_rate,
            rejected_instruments: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Reject every subsequent order for an instrument.
    pub async fn reject_instrument(&self, instrument: &str) {
        self.rejected_instruments
            .write()
            .await
            .insert(instrument.to_string());
    }

    /// Get a copy of the paper state.
    pub async fn get_state(&self) -> PaperTradingState {
        self.state.read().await.clone()
    }

    fn next_order_id(&self) -> String {
        format!("paper-{}", self.order_id_counter.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for PaperExecutionAdapter {
    fn default() -> Self {
        Self::new(dec!(0.0004))
    }
}

#[async_trait]
impl ExecutionAdapter for PaperExecutionAdapter {
    async fn submit(&self, order: &OrderRequest) -> Result<OrderResult> {
        if self
            .rejected_instruments
            .read()
            .await
            .contains(&order.instrument)
        {
            debug!(instrument = %order.instrument, "Paper adapter rejecting order");
            return Ok(OrderResult::Rejected {
                reason: format!("{} trading halted", order.instrument),
            });
        }

        let order_id = self.next_order_id();
        let fee = (order.reference_price * order.size * self.fee_rate).round_dp(8);

        let mut state = self.state.write().await;
        state.order_count += 1;
        state.total_fees += fee;

        if order.reduce_only {
            let opening_id = OrderRequest::entry_client_id(order.position_id);
            let fully_closed = match state.positions.get_mut(&opening_id) {
                Some(position) => {
                    position.size = (position.size - order.size).max(Decimal::ZERO);
                    position.size == Decimal::ZERO
                }
                None => false,
            };
            if fully_closed {
                state.positions.remove(&opening_id);
            }
        } else {
            state.positions.insert(
                order.client_order_id.clone(),
                ExchangePosition {
                    client_order_id: order.client_order_id.clone(),
                    instrument: order.instrument.clone(),
                    side: order.side,
                    size: order.size,
                    entry_price: order.reference_price,
                },
            );
        }

        info!(
            %order_id,
            instrument = %order.instrument,
            side = %order.side,
            size = %order.size,
            price = %order.reference_price,
            reduce_only = order.reduce_only,
            "Paper order filled"
        );

        Ok(OrderResult::Filled {
            order_id,
            fill_price: order.reference_price,
            size: order.size,
            fee,
        })
    }

    async fn cancel(&self, order_id: &str) -> Result<()> {
        // Paper orders fill synchronously; there is never anything resting.
        debug!(%order_id, "Paper cancel is a no-op");
        Ok(())
    }

    async fn get_open_positions(&self) -> Result<Vec<ExchangePosition>> {
        Ok(self.state.read().await.positions.values().cloned().collect())
    }
}

/// In-memory candle feed that replays stored history as if it were live.
#[derive(Debug, Clone, Default)]
pub struct ReplayFeed {
    candles: HashMap<String, Vec<Candle>>,
}

impl ReplayFeed {
    /// Build a feed from candles, grouping by instrument and sorting by time.
    pub fn new(candles: Vec<Candle>) -> Self {
        let mut by_instrument: HashMap<String, Vec<Candle>> = HashMap::new();
        for candle in candles {
            by_instrument
                .entry(candle.instrument.clone())
                .or_default()
                .push(candle);
        }
        for series in by_instrument.values_mut() {
            series.sort_by_key(|c| c.timestamp);
        }
        Self {
            candles: by_instrument,
        }
    }
}

#[async_trait]
impl MarketDataFeed for ReplayFeed {
    async fn subscribe(
        &self,
        instrument: &str,
    ) -> Result<BoxStream<'static, Result<Candle>>> {
        let series = self
            .candles
            .get(instrument)
            .cloned()
            .ok_or_else(|| anyhow!("No replay data for {}", instrument))?;

        Ok(stream::iter(series.into_iter().map(Ok)).boxed())
    }

    async fn load(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        Ok(self
            .candles
            .get(instrument)
            .map(|series| {
                series
                    .iter()
                    .filter(|c| c.timestamp >= start && c.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Quote source that cycles through a recorded price path.
pub struct ReplayQuoteSource {
    venue: String,
    prices: HashMap<String, Vec<Decimal>>,
    cursor: AtomicUsize,
}

impl ReplayQuoteSource {
    pub fn new(venue: impl Into<String>) -> Self {
        Self {
            venue: venue.into(),
            prices: HashMap::new(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Add a price path for an instrument.
    pub fn with_prices(mut self, instrument: &str, prices: Vec<Decimal>) -> Self {
        self.prices.insert(instrument.to_string(), prices);
        self
    }
}

#[async_trait]
impl QuoteSource for ReplayQuoteSource {
    fn venue(&self) -> &str {
        &self.venue
    }

    async fn fetch_quote(&self, instrument: &str) -> Result<Quote, QuoteError> {
        let path = self
            .prices
            .get(instrument)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| QuoteError::Transient {
                venue: self.venue.clone(),
                reason: format!("no quotes for {}", instrument),
            })?;

        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % path.len();

        Ok(Quote {
            venue: self.venue.clone(),
            instrument: instrument.to_string(),
            price: path[idx],
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn order(position_id: u64, side: Side, size: Decimal, reduce_only: bool) -> OrderRequest {
        OrderRequest {
            client_order_id: if reduce_only {
                OrderRequest::exit_client_id(position_id, 1)
            } else {
                OrderRequest::entry_client_id(position_id)
            },
            position_id,
            instrument: "BTCUSDT".to_string(),
            side,
            size,
            reference_price: dec!(50000),
            reduce_only,
        }
    }

    #[tokio::test]
    async fn test_paper_fill_and_reduce() {
        let adapter = PaperExecutionAdapter::new(dec!(0.0004));

        let result = adapter.submit(&order(1, Side::Long, dec!(0.1), false)).await.unwrap();
        match result {
            OrderResult::Filled { fill_price, fee, .. } => {
                assert_eq!(fill_price, dec!(50000));
                assert_eq!(fee, dec!(2)); // 5000 * 0.0004
            }
            other => panic!("Expected fill, got {:?}", other),
        }
        assert_eq!(adapter.get_open_positions().await.unwrap().len(), 1);

        adapter.submit(&order(1, Side::Short, dec!(0.04), true)).await.unwrap();
        let open = adapter.get_open_positions().await.unwrap();
        assert_eq!(open[0].size, dec!(0.06));

        adapter.submit(&order(1, Side::Short, dec!(0.06), true)).await.unwrap();
        assert!(adapter.get_open_positions().await.unwrap().is_empty());
        assert_eq!(adapter.get_state().await.order_count, 3);
    }

    #[tokio::test]
    async fn test_paper_rejects_halted_instrument() {
        let adapter = PaperExecutionAdapter::default();
        adapter.reject_instrument("BTCUSDT").await;

        let result = adapter.submit(&order(1, Side::Long, dec!(1), false)).await.unwrap();
        assert!(matches!(result, OrderResult::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_replay_feed_orders_and_filters() {
        let t = |h| Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap();
        let candle = |h, px| Candle::new("ETHUSDT", t(h), px, px, px, px, dec!(1));
        let feed = ReplayFeed::new(vec![candle(2, dec!(3)), candle(0, dec!(1)), candle(1, dec!(2))]);

        let mut stream = feed.subscribe("ETHUSDT").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.close, dec!(1));

        let window = feed.load("ETHUSDT", t(1), t(2)).await.unwrap();
        assert_eq!(window.len(), 2);
        assert!(feed.subscribe("SOLUSDT").await.is_err());
    }

    #[tokio::test]
    async fn test_replay_quotes_cycle() {
        let source = ReplayQuoteSource::new("alpha").with_prices("BTCUSDT", vec![dec!(1), dec!(2)]);
        assert_eq!(source.fetch_quote("BTCUSDT").await.unwrap().price, dec!(1));
        assert_eq!(source.fetch_quote("BTCUSDT").await.unwrap().price, dec!(2));
        assert_eq!(source.fetch_quote("BTCUSDT").await.unwrap().price, dec!(1));
        assert!(source.fetch_quote("ETHUSDT").await.is_err());
    }
}
