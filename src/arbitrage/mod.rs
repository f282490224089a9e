//! Cross-venue arbitrage monitoring.
//!
//! An independent polling task that compares venue quotes and hands
//! opportunities to the execution boundary through a bounded, expiring queue.

mod engine;
mod queue;
mod rate_limiter;

pub use engine::{detect_opportunities, ArbitrageEngine, ArbitrageOpportunity};
pub use queue::{opportunity_queue, OpportunityReceiver, OpportunitySender};
pub use rate_limiter::{RateLimitExceeded, RateLimiter};
