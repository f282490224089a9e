//! Per-day realized loss ledger and circuit breaker.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Realized results for one UTC trading day.
///
/// Losses accumulate until the day boundary; the breaker trips at most once
/// per day and only a new day resets it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRiskState {
    pub date: NaiveDate,
    /// Capital at the start of the day, the base of the loss limit
    pub start_capital: Decimal,
    /// Net realized PnL (fees included)
    pub realized_pnl: Decimal,
    /// Sum of realized losses as a positive amount
    pub realized_loss: Decimal,
    pub breaker_tripped: bool,
    pub tripped_at: Option<DateTime<Utc>>,
}

impl DailyRiskState {
    pub fn new(date: NaiveDate, start_capital: Decimal) -> Self {
        Self {
            date,
            start_capital,
            realized_pnl: Decimal::ZERO,
            realized_loss: Decimal::ZERO,
            breaker_tripped: false,
            tripped_at: None,
        }
    }

    /// Reset if `at` falls on a later day. Returns true when a reset happened.
    pub fn roll(&mut self, at: DateTime<Utc>, capital: Decimal) -> bool {
        let date = at.date_naive();
        if date <= self.date {
            return false;
        }
        *self = Self::new(date, capital);
        true
    }

    /// Loss amount that trips the breaker.
    pub fn loss_limit(&self, daily_loss_limit: Decimal) -> Decimal {
        self.start_capital * daily_loss_limit
    }

    /// Record a realized result. Returns true only on the event that trips the breaker.
    pub fn record(&mut self, pnl: Decimal, at: DateTime<Utc>, daily_loss_limit: Decimal) -> bool {
        self.realized_pnl += pnl;
        if pnl < Decimal::ZERO {
            self.realized_loss -= pnl;
        }

        if !self.breaker_tripped && self.realized_loss >= self.loss_limit(daily_loss_limit) {
            self.breaker_tripped = true;
            self.tripped_at = Some(at);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn state() -> DailyRiskState {
        DailyRiskState::new(at(1, 0).date_naive(), dec!(10000))
    }

    #[test]
    fn test_trips_once_when_losses_cross_limit() {
        let mut daily = state();
        assert!(!daily.record(dec!(-300), at(1, 1), dec!(0.05)));
        assert!(!daily.record(dec!(400), at(1, 2), dec!(0.05)));
        // Profits do not offset losses
        assert!(daily.record(dec!(-200), at(1, 3), dec!(0.05)));
        assert!(daily.breaker_tripped);
        assert!(!daily.record(dec!(-100), at(1, 4), dec!(0.05)));
        assert_eq!(daily.realized_loss, dec!(600));
        assert_eq!(daily.realized_pnl, dec!(-200));
        assert_eq!(daily.tripped_at, Some(at(1, 3)));
    }

    #[test]
    fn test_resets_at_day_boundary() {
        let mut daily = state();
        daily.record(dec!(-600), at(1, 5), dec!(0.05));
        assert!(daily.breaker_tripped);

        assert!(!daily.roll(at(1, 23), dec!(9400)));
        assert!(daily.breaker_tripped);

        assert!(daily.roll(at(2, 0), dec!(9400)));
        assert!(!daily.breaker_tripped);
        assert_eq!(daily.realized_loss, Decimal::ZERO);
        assert_eq!(daily.start_capital, dec!(9400));
    }

    #[test]
    fn test_earlier_timestamp_does_not_roll_back() {
        let mut daily = DailyRiskState::new(at(2, 0).date_naive(), dec!(100));
        assert!(!daily.roll(at(1, 12), dec!(100)));
        assert_eq!(daily.date, at(2, 0).date_naive());
    }
}
