//! Cross-venue spread monitor.
//!
//! Polls every venue for each configured instrument, compares every pair of
//! quotes and publishes an [`ArbitrageOpportunity`] when the relative spread
//! exceeds the threshold. Never places orders.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use super::queue::OpportunitySender;
use super::rate_limiter::RateLimiter;
use crate::config::ArbitrageConfig;
use crate::exchange::{EngineEvent, EventSink, Quote, QuoteError, QuoteSource};
use crate::utils::relative_spread;

/// A detected price gap between two venues. Read-only to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbitrageOpportunity {
    pub id: u64,
    pub instrument: String,
    /// Venue quoting the lower price
    pub buy_venue: String,
    pub sell_venue: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    /// |a - b| / min(a, b)
    pub spread: Decimal,
    pub detected_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ArbitrageOpportunity {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Compare every pair of quotes and keep the gaps strictly above `threshold`.
///
/// Returned opportunities carry id 0; the engine assigns ids.
pub fn detect_opportunities(
    instrument: &str,
    quotes: &[Quote],
    threshold: Decimal,
    ttl: ChronoDuration,
    now: DateTime<Utc>,
) -> Vec<ArbitrageOpportunity> {
    let mut found = Vec::new();
    for (i, a) in quotes.iter().enumerate() {
        for b in &quotes[i + 1..] {
            let spread = relative_spread(a.price, b.price);
            if spread <= threshold {
                continue;
            }
            let (low, high) = if a.price <= b.price { (a, b) } else { (b, a) };
            found.push(ArbitrageOpportunity {
                id: 0,
                instrument: instrument.to_string(),
                buy_venue: low.venue.clone(),
                sell_venue: high.venue.clone(),
                buy_price: low.price,
                sell_price: high.price,
                spread,
                detected_at: now,
                expires_at: now + ttl,
            });
        }
    }
    found
}

pub struct ArbitrageEngine {
    config: ArbitrageConfig,
    sources: Vec<Arc<dyn QuoteSource>>,
    limiter: RateLimiter,
    queue: OpportunitySender,
    sink: Arc<dyn EventSink>,
    next_id: AtomicU64,
}

impl ArbitrageEngine {
    pub fn new(
        config: ArbitrageConfig,
        sources: Vec<Arc<dyn QuoteSource>>,
        queue: OpportunitySender,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let limiter = RateLimiter::from_config(&config.rate_limit);
        Self {
            config,
            sources,
            limiter,
            queue,
            sink,
            next_id: AtomicU64::new(1),
        }
    }

    /// Poll until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            instruments = ?self.config.instruments,
            venues = self.sources.len(),
            threshold = %self.config.spread_threshold_pct,
            "Arbitrage monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for instrument in &self.config.instruments {
                        self.poll_once(instrument).await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Arbitrage monitor stopped");
    }

    /// One polling round for `instrument`. Failures are reported, never raised.
    #[instrument(skip(self))]
    pub async fn poll_once(&self, instrument: &str) -> Vec<ArbitrageOpportunity> {
        let results = join_all(
            self.sources
                .iter()
                .map(|source| self.fetch_with_retry(source.as_ref(), instrument)),
        )
        .await;

        let quotes: Vec<Quote> = results.into_iter().flatten().collect();
        if quotes.len() < 2 {
            debug!(quotes = quotes.len(), "Not enough quotes to compare");
            return Vec::new();
        }

        let ttl = ChronoDuration::milliseconds(self.config.opportunity_ttl_ms as i64);
        let mut found = detect_opportunities(
            instrument,
            &quotes,
            self.config.spread_threshold_pct,
            ttl,
            Utc::now(),
        );

        for opportunity in &mut found {
            opportunity.id = self.next_id.fetch_add(1, Ordering::SeqCst);
            info!(
                id = opportunity.id,
                buy_venue = %opportunity.buy_venue,
                sell_venue = %opportunity.sell_venue,
                spread = %opportunity.spread,
                "Arbitrage opportunity"
            );
            self.sink.emit(EngineEvent::ArbitrageOpportunity(opportunity.clone()));
            self.queue.publish(opportunity.clone());
        }

        found
    }

    async fn fetch_with_retry(&self, source: &dyn QuoteSource, instrument: &str) -> Option<Quote> {
        let venue = source.venue();
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let result = match self.limiter.try_acquire(venue) {
                Ok(()) => source.fetch_quote(instrument).await,
                Err(limited) => Err(QuoteError::RateLimited {
                    venue: venue.to_string(),
                    retry_after: Some(limited.retry_after),
                }),
            };

            match result {
                Ok(quote) => return Some(quote),
                Err(e) => {
                    let delay = self.backoff(attempt, &e);
                    warn!(
                        %venue,
                        attempt,
                        max_attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Quote fetch failed, retrying"
                    );
                    last_error = Some(e);

                    if attempt < max_attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let error = last_error.map(|e| e.to_string()).unwrap_or_default();
        warn!(%venue, attempts = max_attempts, %error, "Quote fetch gave up");
        self.sink.emit(EngineEvent::ArbitragePollFailed {
            timestamp: Utc::now(),
            venue: venue.to_string(),
            instrument: instrument.to_string(),
            attempts: max_attempts,
            error,
        });
        None
    }

    /// Exponential backoff capped at `max_backoff_ms`; a venue's retry-after wins when longer.
    fn backoff(&self, attempt: u32, error: &QuoteError) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let millis = self
            .config
            .base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.max_backoff_ms);
        let backoff = Duration::from_millis(millis);

        match error {
            QuoteError::RateLimited {
                retry_after: Some(wait),
                ..
            } => backoff.max(*wait),
            _ => backoff,
        }
    }
}
