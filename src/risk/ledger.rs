//! Capital allocation ledger.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Reservation {
    instrument: String,
    notional: Decimal,
}

/// Notional reserved per position against the account's capital.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapitalLedger {
    capital: Decimal,
    reservations: BTreeMap<u64, Reservation>,
}

impl CapitalLedger {
    pub fn new(capital: Decimal) -> Self {
        Self {
            capital,
            reservations: BTreeMap::new(),
        }
    }

    pub fn capital(&self) -> Decimal {
        self.capital
    }

    /// Apply realized PnL to capital.
    pub fn realize(&mut self, pnl: Decimal) {
        self.capital += pnl;
    }

    pub fn reserved_total(&self) -> Decimal {
        self.reservations.values().map(|r| r.notional).sum()
    }

    pub fn reserved_for(&self, instrument: &str) -> Decimal {
        self.reservations
            .values()
            .filter(|r| r.instrument == instrument)
            .map(|r| r.notional)
            .sum()
    }

    /// Notional still allowed on `instrument` under both limits.
    pub fn available_for(
        &self,
        instrument: &str,
        max_instrument_allocation: Decimal,
        max_total_utilization: Decimal,
    ) -> Decimal {
        let instrument_room = self.capital * max_instrument_allocation - self.reserved_for(instrument);
        let total_room = self.capital * max_total_utilization - self.reserved_total();
        instrument_room.min(total_room).max(Decimal::ZERO)
    }

    pub fn reserve(&mut self, position_id: u64, instrument: &str, notional: Decimal) {
        self.reservations.insert(
            position_id,
            Reservation {
                instrument: instrument.to_string(),
                notional,
            },
        );
    }

    /// Replace a reservation's notional (after a fill or partial exit).
    pub fn resize(&mut self, position_id: u64, notional: Decimal) {
        if let Some(r) = self.reservations.get_mut(&position_id) {
            r.notional = notional.max(Decimal::ZERO);
        }
    }

    pub fn release(&mut self, position_id: u64) -> Option<Decimal> {
        self.reservations.remove(&position_id).map(|r| r.notional)
    }
}
