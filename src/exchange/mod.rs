//! Boundary types and contracts between the decision core and the outside world.
//!
//! - `types`: candles, orders, fills, quotes
//! - `traits`: market data, execution and quote source contracts
//! - `events`: engine events and sinks
//! - `mock`: paper execution and replay implementations

mod events;
pub mod mock;
mod traits;
mod types;

pub use events::{EngineEvent, EventSink, MemoryEventSink, TracingEventSink};
pub use mock::{PaperExecutionAdapter, ReplayFeed, ReplayQuoteSource};
pub use traits::{ExecutionAdapter, MarketDataFeed, QuoteError, QuoteSource};
#[cfg(test)]
pub use traits::MockExecutionAdapter;
pub use types::*;
