//! Engine events pushed to the write-only event sink.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::arbitrage::ArbitrageOpportunity;
use crate::exchange::Side;
use crate::regime::Regime;
use crate::risk::{ExitReason, PositionState};
use crate::strategy::StrategyState;

/// Everything the core reports to the outside world.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A fill that opened or reduced a position
    TradeExecuted {
        timestamp: DateTime<Utc>,
        position_id: u64,
        instrument: String,
        side: Side,
        price: Decimal,
        size: Decimal,
        realized_pnl: Decimal,
        exit_reason: Option<ExitReason>,
    },
    PositionStateChanged {
        timestamp: DateTime<Utc>,
        position_id: u64,
        instrument: String,
        from: PositionState,
        to: PositionState,
    },
    IntentRejected {
        timestamp: DateTime<Utc>,
        instrument: String,
        reason: String,
    },
    StrategySwitched {
        timestamp: DateTime<Utc>,
        instrument: String,
        regime: Regime,
        from: StrategyState,
        to: StrategyState,
    },
    BreakerTripped {
        timestamp: DateTime<Utc>,
        realized_loss: Decimal,
        limit: Decimal,
    },
    ExecutionFailed {
        timestamp: DateTime<Utc>,
        position_id: u64,
        instrument: String,
        reason: String,
    },
    ArbitrageOpportunity(ArbitrageOpportunity),
    ArbitragePollFailed {
        timestamp: DateTime<Utc>,
        venue: String,
        instrument: String,
        attempts: u32,
        error: String,
    },
}

impl EngineEvent {
    /// Short name used as the log message.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::TradeExecuted { .. } => "trade_executed",
            EngineEvent::PositionStateChanged { .. } => "position_state_changed",
            EngineEvent::IntentRejected { .. } => "intent_rejected",
            EngineEvent::StrategySwitched { .. } => "strategy_switched",
            EngineEvent::BreakerTripped { .. } => "breaker_tripped",
            EngineEvent::ExecutionFailed { .. } => "execution_failed",
            EngineEvent::ArbitrageOpportunity(_) => "arbitrage_opportunity",
            EngineEvent::ArbitragePollFailed { .. } => "arbitrage_poll_failed",
        }
    }
}

/// Write-only consumer of engine events (logging, persistence, dashboards).
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Emits each event as a structured JSON log line.
#[derive(Debug, Default, Clone)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: EngineEvent) {
        let json = serde_json::to_string(&event).unwrap_or_default();

        match &event {
            EngineEvent::BreakerTripped { .. } | EngineEvent::ExecutionFailed { .. } => {
                error!(target: "engine_event", kind = event.kind(), "ENGINE_EVENT: {}", json)
            }
            EngineEvent::IntentRejected { .. } | EngineEvent::ArbitragePollFailed { .. } => {
                warn!(target: "engine_event", kind = event.kind(), "ENGINE_EVENT: {}", json)
            }
            _ => info!(target: "engine_event", kind = event.kind(), "ENGINE_EVENT: {}", json),
        }
    }
}

/// Collects events in memory; used by replays and tests.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Number of events of the given kind.
    pub fn count(&self, kind: &str) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: EngineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemoryEventSink::new();
        sink.emit(EngineEvent::BreakerTripped {
            timestamp: Utc::now(),
            realized_loss: dec!(500),
            limit: dec!(500),
        });
        sink.emit(EngineEvent::IntentRejected {
            timestamp: Utc::now(),
            instrument: "ETHUSDT".to_string(),
            reason: "daily breaker tripped".to_string(),
        });

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.count("breaker_tripped"), 1);
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = EngineEvent::IntentRejected {
            timestamp: Utc::now(),
            instrument: "ETHUSDT".to_string(),
            reason: "max positions".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"intent_rejected\""));
    }
}
