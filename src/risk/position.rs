//! Position lifecycle with staged take-profits and a trailing runner.
//!
//! ```text
//! PENDING -> OPEN -> PARTIAL_TP1 -> PARTIAL_TP2 -> RUNNER -> CLOSED
//!              \__________\______________\___________\____/ (stop / exit)
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::RiskConfig;
use crate::exchange::Side;
use crate::strategy::StrategyKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    /// Approved and submitted, not yet filled
    Pending,
    Open,
    PartialTp1,
    PartialTp2,
    /// Remainder managed by the trailing stop
    Runner,
    Closed,
}

impl PositionState {
    pub fn is_live(&self) -> bool {
        !matches!(self, PositionState::Pending | PositionState::Closed)
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PositionState::Pending => "pending",
            PositionState::Open => "open",
            PositionState::PartialTp1 => "partial_tp1",
            PositionState::PartialTp2 => "partial_tp2",
            PositionState::Runner => "runner",
            PositionState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    Tp1,
    Tp2,
    TrailingStop,
    StrategyExit,
    BreakerForceClose,
    Manual,
}

impl ExitReason {
    /// Whether this exit closes the whole remaining size.
    pub fn is_final(&self) -> bool {
        !matches!(self, ExitReason::Tp1 | ExitReason::Tp2)
    }
}

/// A requested reduction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExitSignal {
    pub reason: ExitReason,
    pub size: Decimal,
    /// Price that triggered the exit
    pub price: Decimal,
}

/// Exit parameters taken from the risk configuration at approval time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExitPlan {
    pub stop_loss_pct: Decimal,
    pub tp1_pct: Decimal,
    pub tp2_pct: Decimal,
    pub tp1_close_fraction: Decimal,
    pub tp2_close_fraction: Decimal,
    pub trailing_stop_pct: Decimal,
    pub move_stop_to_breakeven: bool,
}

impl ExitPlan {
    pub fn from_config(config: &RiskConfig) -> Self {
        Self {
            stop_loss_pct: config.stop_loss_pct,
            tp1_pct: config.tp1_pct,
            tp2_pct: config.tp2_pct,
            tp1_close_fraction: config.tp1_close_fraction,
            tp2_close_fraction: config.tp2_close_fraction,
            trailing_stop_pct: config.trailing_stop_pct,
            move_stop_to_breakeven: config.move_stop_to_breakeven,
        }
    }

    /// (stop, tp1, tp2) for an entry on `side`.
    pub fn levels(&self, side: Side, entry: Decimal) -> (Decimal, Decimal, Decimal) {
        match side {
            Side::Long => (
                entry * (Decimal::ONE - self.stop_loss_pct),
                entry * (Decimal::ONE + self.tp1_pct),
                entry * (Decimal::ONE + self.tp2_pct),
            ),
            Side::Short => (
                entry * (Decimal::ONE + self.stop_loss_pct),
                entry * (Decimal::ONE - self.tp1_pct),
                entry * (Decimal::ONE - self.tp2_pct),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub id: u64,
    pub instrument: String,
    pub side: Side,
    pub strategy: StrategyKind,
    pub grid_level: Option<Decimal>,
    pub state: PositionState,
    /// Reference price while pending, fill price once open
    pub entry_price: Decimal,
    pub initial_size: Decimal,
    /// Remaining size
    pub size: Decimal,
    pub stop_price: Decimal,
    pub tp1_price: Decimal,
    pub tp2_price: Decimal,
    /// Set by the TP2 fill; the remainder trails
    pub runner: bool,
    /// Best price seen since the runner was armed
    pub best_price: Decimal,
    pub plan: ExitPlan,
    pub realized_pnl: Decimal,
    pub fees: Decimal,
    pub last_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
    /// Entry submissions so far
    pub submit_attempts: u32,
    /// Exit orders issued so far
    pub exit_seq: u32,
    /// Exit awaiting a fill
    pub pending_exit: Option<ExitSignal>,
    /// Entry was rejected and waits for resubmission
    pub awaiting_resubmit: bool,
    /// Venue id of an acknowledged order that has not filled yet
    pub working_order: Option<String>,
}

/// Change applied by one exit fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitApplied {
    pub from: PositionState,
    pub to: PositionState,
    pub realized_pnl: Decimal,
    pub size: Decimal,
}

impl Position {
    /// A pending position with levels anchored at the reference price.
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        id: u64,
        instrument: impl Into<String>,
        side: Side,
        strategy: StrategyKind,
        grid_level: Option<Decimal>,
        reference_price: Decimal,
        size: Decimal,
        plan: ExitPlan,
        opened_at: DateTime<Utc>,
    ) -> Self {
        let (stop_price, tp1_price, tp2_price) = plan.levels(side, reference_price);
        Self {
            id,
            instrument: instrument.into(),
            side,
            strategy,
            grid_level,
            state: PositionState::Pending,
            entry_price: reference_price,
            initial_size: size,
            size,
            stop_price,
            tp1_price,
            tp2_price,
            runner: false,
            best_price: reference_price,
            plan,
            realized_pnl: Decimal::ZERO,
            fees: Decimal::ZERO,
            last_price: reference_price,
            opened_at,
            closed_at: None,
            exit_reason: None,
            submit_attempts: 0,
            exit_seq: 0,
            pending_exit: None,
            awaiting_resubmit: false,
            working_order: None,
        }
    }

    /// TP1 strictly between entry and TP2, stop on the other side of entry.
    pub fn levels_valid(&self) -> bool {
        let (e, s, t1, t2) = (self.entry_price, self.stop_price, self.tp1_price, self.tp2_price);
        match self.side {
            Side::Long => s < e && e < t1 && t1 < t2,
            Side::Short => s > e && e > t1 && t1 > t2,
        }
    }

    /// Confirmed entry fill: re-anchor levels on the fill price.
    pub fn fill_entry(&mut self, fill_price: Decimal, size: Decimal, fee: Decimal, at: DateTime<Utc>) {
        let (stop, tp1, tp2) = self.plan.levels(self.side, fill_price);
        self.entry_price = fill_price;
        self.stop_price = stop;
        self.tp1_price = tp1;
        self.tp2_price = tp2;
        self.initial_size = size;
        self.size = size;
        self.best_price = fill_price;
        self.last_price = fill_price;
        self.fees += fee;
        self.realized_pnl -= fee;
        self.opened_at = at;
        self.awaiting_resubmit = false;
        self.working_order = None;
        self.state = PositionState::Open;
    }

    fn at_or_beyond(&self, price: Decimal, level: Decimal) -> bool {
        match self.side {
            Side::Long => price >= level,
            Side::Short => price <= level,
        }
    }

    fn stop_hit(&self, price: Decimal) -> bool {
        match self.side {
            Side::Long => price <= self.stop_price,
            Side::Short => price >= self.stop_price,
        }
    }

    fn partial(&self, fraction: Decimal) -> Decimal {
        (self.initial_size * fraction).min(self.size)
    }

    /// Mark to `price` and return the exit it triggers, at most one per mark.
    ///
    /// Stops take precedence over take-profits; TP1 always fires before TP2.
    pub fn mark(&mut self, price: Decimal) -> Option<ExitSignal> {
        self.last_price = price;
        if !self.state.is_live() || self.pending_exit.is_some() {
            return None;
        }

        if self.state == PositionState::PartialTp2 {
            self.state = PositionState::Runner;
        }

        if self.state == PositionState::Runner {
            self.trail(price);
            if self.stop_hit(price) {
                return Some(ExitSignal {
                    reason: ExitReason::TrailingStop,
                    size: self.size,
                    price,
                });
            }
            return None;
        }

        if self.stop_hit(price) {
            return Some(ExitSignal {
                reason: ExitReason::StopLoss,
                size: self.size,
                price,
            });
        }

        match self.state {
            PositionState::Open if self.at_or_beyond(price, self.tp1_price) => Some(ExitSignal {
                reason: ExitReason::Tp1,
                size: self.partial(self.plan.tp1_close_fraction),
                price,
            }),
            PositionState::PartialTp1 if self.at_or_beyond(price, self.tp2_price) => {
                Some(ExitSignal {
                    reason: ExitReason::Tp2,
                    size: self.partial(self.plan.tp2_close_fraction),
                    price,
                })
            }
            _ => None,
        }
    }

    /// Ratchet the runner stop behind the best price seen.
    fn trail(&mut self, price: Decimal) {
        match self.side {
            Side::Long => {
                self.best_price = self.best_price.max(price);
                let trail = self.best_price * (Decimal::ONE - self.plan.trailing_stop_pct);
                self.stop_price = self.stop_price.max(trail);
            }
            Side::Short => {
                self.best_price = self.best_price.min(price);
                let trail = self.best_price * (Decimal::ONE + self.plan.trailing_stop_pct);
                self.stop_price = self.stop_price.min(trail);
            }
        }
    }

    /// PnL of closing `size` at `price`, before fees.
    pub fn pnl_at(&self, price: Decimal, size: Decimal) -> Decimal {
        (price - self.entry_price) * size * self.side.sign()
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        if self.state.is_live() {
            self.pnl_at(price, self.size)
        } else {
            Decimal::ZERO
        }
    }

    pub fn notional(&self) -> Decimal {
        self.entry_price * self.size
    }

    /// Apply a filled exit and advance the lifecycle.
    pub fn apply_exit(
        &mut self,
        exit: &ExitSignal,
        fill_price: Decimal,
        fee: Decimal,
        at: DateTime<Utc>,
    ) -> ExitApplied {
        let from = self.state;
        let size = exit.size.min(self.size);
        let realized = self.pnl_at(fill_price, size) - fee;

        self.size -= size;
        self.realized_pnl += realized;
        self.fees += fee;
        self.last_price = fill_price;
        self.pending_exit = None;

        match exit.reason {
            ExitReason::Tp1 => {
                self.state = PositionState::PartialTp1;
                if self.plan.move_stop_to_breakeven {
                    self.stop_price = self.entry_price;
                }
            }
            ExitReason::Tp2 => {
                self.state = PositionState::PartialTp2;
                self.runner = true;
                self.best_price = fill_price;
            }
            _ => {}
        }

        if exit.reason.is_final() || self.size <= Decimal::ZERO {
            self.state = PositionState::Closed;
            self.closed_at = Some(at);
            self.exit_reason = Some(exit.reason);
        }

        ExitApplied {
            from,
            to: self.state,
            realized_pnl: realized,
            size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn plan() -> ExitPlan {
        ExitPlan {
            stop_loss_pct: dec!(0.02),
            tp1_pct: dec!(0.03),
            tp2_pct: dec!(0.06),
            tp1_close_fraction: dec!(0.5),
            tp2_close_fraction: dec!(0.3),
            trailing_stop_pct: dec!(0.01),
            move_stop_to_breakeven: true,
        }
    }

    fn open_long() -> Position {
        let mut p = Position::pending(
            1,
            "BTCUSDT",
            Side::Long,
            StrategyKind::EmaCrossover,
            None,
            dec!(100),
            dec!(10),
            plan(),
            Utc::now(),
        );
        p.fill_entry(dec!(100), dec!(10), Decimal::ZERO, Utc::now());
        p
    }

    fn fill(p: &mut Position, price: Decimal) -> Option<ExitApplied> {
        let exit = p.mark(price)?;
        p.pending_exit = Some(exit);
        Some(p.apply_exit(&exit, price, Decimal::ZERO, Utc::now()))
    }

    #[test]
    fn test_levels_from_entry() {
        let p = open_long();
        assert_eq!(p.stop_price, dec!(98));
        assert_eq!(p.tp1_price, dec!(103));
        assert_eq!(p.tp2_price, dec!(106));
        assert!(p.levels_valid());
    }

    #[test]
    fn test_short_levels_mirror() {
        let (stop, tp1, tp2) = plan().levels(Side::Short, dec!(100));
        assert_eq!((stop, tp1, tp2), (dec!(102), dec!(97), dec!(94)));
    }

    #[test]
    fn test_pending_never_exits() {
        let mut p = Position::pending(
            1,
            "BTCUSDT",
            Side::Long,
            StrategyKind::Grid,
            None,
            dec!(100),
            dec!(1),
            plan(),
            Utc::now(),
        );
        assert!(p.mark(dec!(50)).is_none());
        assert_eq!(p.state, PositionState::Pending);
    }

    #[test]
    fn test_stop_loss_closes_everything() {
        let mut p = open_long();
        let applied = fill(&mut p, dec!(97.5)).unwrap();
        assert_eq!(applied.to, PositionState::Closed);
        assert_eq!(applied.realized_pnl, dec!(-25));
        assert_eq!(p.exit_reason, Some(ExitReason::StopLoss));
    }

    #[test]
    fn test_full_staged_sequence() {
        let mut p = open_long();

        // Gap through both targets: TP1 first
        let tp1 = fill(&mut p, dec!(107)).unwrap();
        assert_eq!(tp1.to, PositionState::PartialTp1);
        assert_eq!(tp1.size, dec!(5));
        assert_eq!(p.stop_price, dec!(100)); // breakeven

        let tp2 = fill(&mut p, dec!(107)).unwrap();
        assert_eq!(tp2.to, PositionState::PartialTp2);
        assert_eq!(tp2.size, dec!(3));
        assert!(p.runner);

        // Runner arms on the next mark and trails the high
        assert!(p.mark(dec!(110)).is_none());
        assert_eq!(p.state, PositionState::Runner);
        assert_eq!(p.stop_price, dec!(108.9));

        let last = fill(&mut p, dec!(108.5)).unwrap();
        assert_eq!(last.to, PositionState::Closed);
        assert_eq!(last.size, dec!(2));
        assert_eq!(p.exit_reason, Some(ExitReason::TrailingStop));
        // 5*7 + 3*7 + 2*8.5
        assert_eq!(p.realized_pnl, dec!(73));
    }

    #[test]
    fn test_breakeven_stop_after_tp1() {
        let mut p = open_long();
        fill(&mut p, dec!(103)).unwrap();
        let applied = fill(&mut p, dec!(100)).unwrap();
        assert_eq!(applied.from, PositionState::PartialTp1);
        assert_eq!(applied.to, PositionState::Closed);
        assert_eq!(applied.realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_trailing_stop_never_loosens() {
        let mut p = open_long();
        fill(&mut p, dec!(103));
        fill(&mut p, dec!(106));
        p.mark(dec!(120));
        let high_stop = p.stop_price;
        p.mark(dec!(119));
        assert_eq!(p.stop_price, high_stop);
    }

    #[test]
    fn test_no_new_exit_while_one_is_pending() {
        let mut p = open_long();
        let exit = p.mark(dec!(90)).unwrap();
        p.pending_exit = Some(exit);
        assert!(p.mark(dec!(80)).is_none());
    }

    #[test]
    fn test_short_pnl() {
        let mut p = Position::pending(
            2,
            "ETHUSDT",
            Side::Short,
            StrategyKind::MeanReversion,
            None,
            dec!(100),
            dec!(2),
            plan(),
            Utc::now(),
        );
        p.fill_entry(dec!(100), dec!(2), dec!(0.1), Utc::now());
        assert_eq!(p.unrealized_pnl(dec!(95)), dec!(10));
        let applied = fill(&mut p, dec!(102.5)).unwrap();
        assert_eq!(applied.realized_pnl, dec!(-5));
        assert_eq!(p.realized_pnl, dec!(-5.1));
    }
}
