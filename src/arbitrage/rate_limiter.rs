//! Per-venue token bucket.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("rate limit exceeded for {venue}, retry after {retry_after:?}")]
pub struct RateLimitExceeded {
    pub venue: String,
    pub retry_after: Duration,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// At most `max_calls` per `window` for each venue, refilled continuously.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    /// Tokens per second
    refill_rate: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        let capacity = f64::from(max_calls.max(1));
        let window = window.as_secs_f64().max(f64::EPSILON);
        Self {
            capacity,
            refill_rate: capacity / window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_calls, Duration::from_millis(config.window_ms))
    }

    /// Take one token for `venue`, or report how long until one is available.
    pub fn try_acquire(&self, venue: &str) -> Result<(), RateLimitExceeded> {
        let now = Instant::now();
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let bucket = buckets.entry(venue.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let retry_after = Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_rate);
        Err(RateLimitExceeded {
            venue: venue.to_string(),
            retry_after,
        })
    }

    /// Wait until a token for `venue` is available, then take it.
    pub async fn acquire(&self, venue: &str) {
        while let Err(limited) = self.try_acquire(venue) {
            tokio::time::sleep(limited.retry_after).await;
        }
    }
}
