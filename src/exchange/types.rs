//! Core market and order types shared across the engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One OHLCV bar for an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Create a new candle.
    pub fn new(
        instrument: impl Into<String>,
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Typical price (high + low + close) / 3.
    pub fn hlc3(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }
}

/// Direction of a position or order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The side that closes a position on this side.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Long => Decimal::ONE,
            Side::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// An approved order handed to the execution boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Client-side identifier, stable across resubmissions
    pub client_order_id: String,
    /// Position this order opens or reduces
    pub position_id: u64,
    pub instrument: String,
    /// Direction of the fill (a long exit is a `Short` order)
    pub side: Side,
    pub size: Decimal,
    /// Price the decision was made at
    pub reference_price: Decimal,
    /// True for exits; never increases exposure
    pub reduce_only: bool,
}

impl OrderRequest {
    /// Client order id of the order that opens a position.
    pub fn entry_client_id(position_id: u64) -> String {
        format!("rt-{}", position_id)
    }

    /// Client order id of a position's `seq`-th exit.
    pub fn exit_client_id(position_id: u64, seq: u32) -> String {
        format!("rt-{}-x{}", position_id, seq)
    }
}

/// Outcome reported by an execution adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrderResult {
    Filled {
        order_id: String,
        fill_price: Decimal,
        size: Decimal,
        fee: Decimal,
    },
    Rejected {
        reason: String,
    },
    Pending {
        order_id: String,
    },
}

/// A position as reported by the venue, used to reconcile unknown outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub client_order_id: String,
    pub instrument: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
}

/// A price snapshot from one venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub venue: String,
    pub instrument: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_candle_hlc3() {
        let candle = Candle::new(
            "BTCUSDT",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            dec!(100),
            dec!(103),
            dec!(97),
            dec!(100),
            dec!(10),
        );
        assert_eq!(candle.hlc3(), dec!(100));
    }

    #[test]
    fn test_side_helpers() {
        assert_eq!(Side::Long.opposite(), Side::Short);
        assert_eq!(Side::Short.sign(), dec!(-1));
        assert_eq!(Side::Long.to_string(), "long");
    }

    #[test]
    fn test_order_result_serialization() {
        let result = OrderResult::Rejected {
            reason: "insufficient margin".to_string(),
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"status\":\"rejected\""));
    }

    #[test]
    fn test_client_ids_distinguish_exits() {
        assert_eq!(OrderRequest::entry_client_id(7), "rt-7");
        assert_eq!(OrderRequest::exit_client_id(7, 2), "rt-7-x2");
    }
}
