//! Boundary contracts between the decision core and the outside world.
//!
//! Implementations live outside the core (exchange connectivity is out of
//! scope); the paper/replay implementations in [`super::mock`] exist so the
//! pipeline can be exercised end to end.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use std::time::Duration;

use super::types::{Candle, ExchangePosition, OrderRequest, OrderResult, Quote};

/// Source of candles, live or historical.
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Unbounded stream of closed candles for an instrument.
    async fn subscribe(
        &self,
        instrument: &str,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<Candle>>>;

    /// Finite, ordered history for an instrument. Restartable.
    async fn load(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Candle>>;
}

/// Order routing boundary.
///
/// The core never assumes a synchronous fill: only `OrderResult::Filled`
/// (or a reconciled open position) moves a position to OPEN. An `Err` is an
/// unknown outcome and must be followed by `get_open_positions`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn submit(&self, order: &OrderRequest) -> anyhow::Result<OrderResult>;

    async fn cancel(&self, order_id: &str) -> anyhow::Result<()>;

    async fn get_open_positions(&self) -> anyhow::Result<Vec<ExchangePosition>>;
}

/// Failure modes of a single quote fetch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuoteError {
    #[error("{venue} rate limited the request")]
    RateLimited {
        venue: String,
        retry_after: Option<Duration>,
    },

    #[error("{venue} timed out")]
    Timeout { venue: String },

    #[error("{venue} transient failure: {reason}")]
    Transient { venue: String, reason: String },
}

/// One venue's quote endpoint, as seen by the arbitrage monitor.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Venue identifier, unique across sources.
    fn venue(&self) -> &str;

    async fn fetch_quote(&self, instrument: &str) -> Result<Quote, QuoteError>;
}
