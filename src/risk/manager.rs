//! The risk manager: sole approver of order intents and owner of positions.
//!
//! All mutable risk data lives in [`RiskState`], passed explicitly into every
//! call. Live trading shares one state behind a mutex; each replay owns a
//! private copy.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::daily::DailyRiskState;
use super::ledger::CapitalLedger;
use super::position::{ExitPlan, ExitReason, ExitSignal, Position, PositionState};
use super::sizing::{position_size, SizingInput};
use crate::config::{BreakerPolicy, RiskConfig};
use crate::exchange::{EngineEvent, EventSink, OrderRequest, Side};
use crate::strategy::{IntentAction, OrderIntent, StrategyKind};

/// Why an intent was not approved. Returned, never raised.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskRejection {
    #[error("daily loss breaker tripped")]
    BreakerTripped,

    #[error("risk limit exceeded: requested {requested}, available {available}")]
    RiskLimitExceeded {
        requested: Decimal,
        available: Decimal,
    },

    #[error("max positions reached ({open}/{max})")]
    MaxPositions { open: usize, max: usize },

    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    #[error("invalid levels: stop {stop}, entry {entry}, tp1 {tp1}, tp2 {tp2}")]
    InvalidLevels {
        stop: Decimal,
        entry: Decimal,
        tp1: Decimal,
        tp2: Decimal,
    },
}

/// Mutable risk data for one account.
#[derive(Debug, Clone, Serialize)]
pub struct RiskState {
    pub positions: BTreeMap<u64, Position>,
    pub closed: Vec<Position>,
    pub daily: DailyRiskState,
    pub ledger: CapitalLedger,
    next_id: u64,
}

/// Live risk state shared by every instrument task.
pub type SharedRiskState = Arc<tokio::sync::Mutex<RiskState>>;

impl RiskState {
    pub fn new(capital: Decimal, start: DateTime<Utc>) -> Self {
        Self {
            positions: BTreeMap::new(),
            closed: Vec::new(),
            daily: DailyRiskState::new(start.date_naive(), capital),
            ledger: CapitalLedger::new(capital),
            next_id: 1,
        }
    }

    pub fn shared(self) -> SharedRiskState {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn capital(&self) -> Decimal {
        self.ledger.capital()
    }

    /// Positions that are pending or live.
    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    pub fn positions_for<'a>(&'a self, instrument: &'a str) -> impl Iterator<Item = &'a Position> + 'a {
        self.positions.values().filter(move |p| p.instrument == instrument)
    }

    pub fn unrealized_pnl(&self, prices: &BTreeMap<String, Decimal>) -> Decimal {
        self.positions
            .values()
            .map(|p| {
                let price = prices.get(&p.instrument).copied().unwrap_or(p.last_price);
                p.unrealized_pnl(price)
            })
            .sum()
    }
}

/// An approved entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Approval {
    pub position_id: u64,
    pub request: OrderRequest,
    pub notional: Decimal,
}

/// An exit to submit for a position.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitOrder {
    pub position_id: u64,
    pub signal: ExitSignal,
    pub request: OrderRequest,
}

/// What to do after an entry was rejected by the venue.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryRetry {
    /// Stays pending; resubmitted on the next bar
    Retry { attempts: u32 },
    /// Attempts exhausted; allocation released
    Cancelled,
}

/// An order the venue acknowledged but has not filled.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingOrder {
    pub position_id: u64,
    /// Venue-assigned order id
    pub order_id: String,
    /// The order as submitted (entries are never `reduce_only`)
    pub request: OrderRequest,
}

/// Result of an exit fill.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitFill {
    pub realized_pnl: Decimal,
    pub closed: bool,
    /// Breaker tripped by this fill
    pub breaker_tripped: bool,
}

/// Policy half of risk management; all state is in [`RiskState`].
pub struct RiskManager {
    config: RiskConfig,
    sink: Arc<dyn EventSink>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, sink: Arc<dyn EventSink>) -> Self {
        Self { config, sink }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Reset the daily ledger when `at` is on a new day.
    pub fn roll_day(&self, state: &mut RiskState, at: DateTime<Utc>) {
        let capital = state.capital();
        let was_tripped = state.daily.breaker_tripped;
        if state.daily.roll(at, capital) {
            info!(
                date = %state.daily.date,
                %capital,
                breaker_was_tripped = was_tripped,
                "Daily risk state reset"
            );
        }
    }

    /// Approve an entry intent, reserving capital and creating a PENDING position.
    pub fn approve(
        &self,
        state: &mut RiskState,
        intent: &OrderIntent,
    ) -> Result<Approval, RiskRejection> {
        let result = self.try_approve(state, intent);
        if let Err(rejection) = &result {
            warn!(
                instrument = %intent.instrument,
                strategy = %intent.strategy,
                side = %intent.side,
                %rejection,
                "Intent rejected"
            );
            self.sink.emit(EngineEvent::IntentRejected {
                timestamp: intent.timestamp,
                instrument: intent.instrument.clone(),
                reason: rejection.to_string(),
            });
        }
        result
    }

    fn try_approve(
        &self,
        state: &mut RiskState,
        intent: &OrderIntent,
    ) -> Result<Approval, RiskRejection> {
        if intent.action != IntentAction::Open {
            return Err(RiskRejection::InvalidIntent(
                "only entries need approval".to_string(),
            ));
        }
        if intent.reference_price <= Decimal::ZERO {
            return Err(RiskRejection::InvalidIntent(format!(
                "non-positive reference price {}",
                intent.reference_price
            )));
        }

        self.roll_day(state, intent.timestamp);
        if state.daily.breaker_tripped {
            return Err(RiskRejection::BreakerTripped);
        }

        if state.open_count() >= self.config.max_positions {
            return Err(RiskRejection::MaxPositions {
                open: state.open_count(),
                max: self.config.max_positions,
            });
        }

        let size = position_size(
            self.config.sizing,
            &SizingInput {
                capital: state.capital(),
                entry_price: intent.reference_price,
                stop_loss_pct: self.config.stop_loss_pct,
                per_trade_risk_pct: self.config.per_trade_risk_pct,
                fixed_notional: self.config.fixed_notional,
                size_step: self.config.size_step,
            },
        );
        let notional = size * intent.reference_price;
        let available = state.ledger.available_for(
            &intent.instrument,
            self.config.max_instrument_allocation,
            self.config.max_total_utilization,
        );
        if size <= Decimal::ZERO || notional > available {
            return Err(RiskRejection::RiskLimitExceeded {
                requested: notional,
                available,
            });
        }

        let id = state.next_id;
        let mut position = Position::pending(
            id,
            intent.instrument.clone(),
            intent.side,
            intent.strategy,
            intent.grid_level,
            intent.reference_price,
            size,
            ExitPlan::from_config(&self.config),
            intent.timestamp,
        );
        if !position.levels_valid() {
            return Err(RiskRejection::InvalidLevels {
                stop: position.stop_price,
                entry: position.entry_price,
                tp1: position.tp1_price,
                tp2: position.tp2_price,
            });
        }
        position.submit_attempts = 1;

        state.next_id += 1;
        state.ledger.reserve(id, &intent.instrument, notional);

        info!(
            position_id = id,
            instrument = %intent.instrument,
            strategy = %intent.strategy,
            side = %intent.side,
            %size,
            %notional,
            stop = %position.stop_price,
            tp1 = %position.tp1_price,
            tp2 = %position.tp2_price,
            "Intent approved"
        );

        let request = entry_request(&position);
        state.positions.insert(id, position);

        Ok(Approval {
            position_id: id,
            request,
            notional,
        })
    }

    /// Confirmed entry fill: PENDING -> OPEN.
    pub fn on_entry_fill(
        &self,
        state: &mut RiskState,
        position_id: u64,
        fill_price: Decimal,
        size: Decimal,
        fee: Decimal,
        at: DateTime<Utc>,
    ) -> bool {
        let Some(position) = state.positions.get_mut(&position_id) else {
            warn!(position_id, "Entry fill for unknown position");
            return false;
        };
        if position.state != PositionState::Pending {
            debug!(position_id, state = %position.state, "Duplicate entry fill ignored");
            return false;
        }

        position.fill_entry(fill_price, size, fee, at);
        let (instrument, side, notional) =
            (position.instrument.clone(), position.side, position.notional());
        state.ledger.resize(position_id, notional);

        info!(
            position_id,
            %instrument,
            %side,
            price = %fill_price,
            %size,
            "Position opened"
        );
        self.sink.emit(EngineEvent::PositionStateChanged {
            timestamp: at,
            position_id,
            instrument: instrument.clone(),
            from: PositionState::Pending,
            to: PositionState::Open,
        });
        self.sink.emit(EngineEvent::TradeExecuted {
            timestamp: at,
            position_id,
            instrument,
            side,
            price: fill_price,
            size,
            realized_pnl: -fee,
            exit_reason: None,
        });

        self.realize(state, -fee, at)
    }

    /// Venue refused an entry: retry on the next bar or cancel.
    pub fn on_entry_rejected(
        &self,
        state: &mut RiskState,
        position_id: u64,
        reason: &str,
        at: DateTime<Utc>,
    ) -> EntryRetry {
        let Some(position) = state.positions.get_mut(&position_id) else {
            return EntryRetry::Cancelled;
        };
        position.working_order = None;

        if position.submit_attempts < self.config.max_submit_attempts {
            position.awaiting_resubmit = true;
            warn!(
                position_id,
                attempts = position.submit_attempts,
                %reason,
                "Entry rejected, will resubmit"
            );
            return EntryRetry::Retry {
                attempts: position.submit_attempts,
            };
        }

        self.cancel_entry(state, position_id, reason, at);
        EntryRetry::Cancelled
    }

    fn cancel_entry(&self, state: &mut RiskState, position_id: u64, reason: &str, at: DateTime<Utc>) {
        let Some(position) = state.positions.remove(&position_id) else {
            return;
        };
        state.ledger.release(position_id);

        warn!(position_id, instrument = %position.instrument, %reason, "Entry cancelled");
        self.sink.emit(EngineEvent::ExecutionFailed {
            timestamp: at,
            position_id,
            instrument: position.instrument.clone(),
            reason: reason.to_string(),
        });
        self.sink.emit(EngineEvent::PositionStateChanged {
            timestamp: at,
            position_id,
            instrument: position.instrument,
            from: PositionState::Pending,
            to: PositionState::Closed,
        });
    }

    /// Entries waiting for resubmission, as fresh orders.
    pub fn resubmissions(&self, state: &mut RiskState, instrument: &str) -> Vec<OrderRequest> {
        let mut requests = Vec::new();
        for position in state.positions.values_mut() {
            if position.instrument == instrument
                && position.awaiting_resubmit
                && position.working_order.is_none()
            {
                position.awaiting_resubmit = false;
                position.submit_attempts += 1;
                debug!(
                    position_id = position.id,
                    attempt = position.submit_attempts,
                    "Resubmitting entry"
                );
                requests.push(entry_request(position));
            }
        }
        requests
    }

    /// The venue acknowledged an order without filling it.
    ///
    /// The position keeps its reservation and waits on that order. Nothing is
    /// resubmitted for it until the order is cancelled or found filled.
    pub fn on_order_working(&self, state: &mut RiskState, position_id: u64, order_id: &str) {
        if let Some(position) = state.positions.get_mut(&position_id) {
            position.working_order = Some(order_id.to_string());
            position.awaiting_resubmit = false;
            info!(position_id, %order_id, state = %position.state, "Order working at venue");
        }
    }

    /// Acknowledged, unfilled orders on `instrument`.
    pub fn working_orders(&self, state: &RiskState, instrument: &str) -> Vec<WorkingOrder> {
        state
            .positions_for(instrument)
            .filter_map(|p| {
                let order_id = p.working_order.clone()?;
                let request = match (p.state, p.pending_exit) {
                    (PositionState::Pending, _) => entry_request(p),
                    (_, Some(signal)) => exit_request(p, &signal),
                    _ => return None,
                };
                Some(WorkingOrder {
                    position_id: p.id,
                    order_id,
                    request,
                })
            })
            .collect()
    }

    /// Mark every live position on `instrument` and collect triggered exits.
    pub fn mark_positions(
        &self,
        state: &mut RiskState,
        instrument: &str,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Vec<ExitOrder> {
        let mut exits = Vec::new();
        for position in state.positions.values_mut() {
            if position.instrument != instrument {
                continue;
            }
            let before = position.state;
            let signal = position.mark(price);
            if position.state != before {
                info!(
                    position_id = position.id,
                    from = %before,
                    to = %position.state,
                    stop = %position.stop_price,
                    "Runner armed"
                );
                self.sink.emit(EngineEvent::PositionStateChanged {
                    timestamp: at,
                    position_id: position.id,
                    instrument: position.instrument.clone(),
                    from: before,
                    to: position.state,
                });
            }
            if let Some(signal) = signal {
                exits.push(issue_exit(position, signal));
            }
        }
        exits
    }

    /// Full exits for the positions a strategy asked to close.
    ///
    /// Only positions opened by the same strategy, on the same side (and grid
    /// level, when given) are affected. Never gated by the breaker.
    pub fn close_for_intent(&self, state: &mut RiskState, intent: &OrderIntent) -> Vec<ExitOrder> {
        if intent.action != IntentAction::Close {
            return Vec::new();
        }

        state
            .positions
            .values_mut()
            .filter(|p| {
                p.instrument == intent.instrument
                    && p.strategy == intent.strategy
                    && p.side == intent.side
                    && p.state.is_live()
                    && p.pending_exit.is_none()
                    && intent.grid_level.map_or(true, |level| p.grid_level == Some(level))
            })
            .map(|p| {
                let signal = ExitSignal {
                    reason: ExitReason::StrategyExit,
                    size: p.size,
                    price: intent.reference_price,
                };
                issue_exit(p, signal)
            })
            .collect()
    }

    /// Close every live position (breaker force-close policy or manual flatten).
    pub fn close_all(&self, state: &mut RiskState, reason: ExitReason) -> Vec<ExitOrder> {
        state
            .positions
            .values_mut()
            .filter(|p| p.state.is_live() && p.pending_exit.is_none())
            .map(|p| {
                let signal = ExitSignal {
                    reason,
                    size: p.size,
                    price: p.last_price,
                };
                issue_exit(p, signal)
            })
            .collect()
    }

    /// Confirmed exit fill: realize PnL and advance the lifecycle.
    pub fn on_exit_fill(
        &self,
        state: &mut RiskState,
        position_id: u64,
        fill_price: Decimal,
        fee: Decimal,
        at: DateTime<Utc>,
    ) -> Option<ExitFill> {
        let position = state.positions.get_mut(&position_id)?;
        let signal = position.pending_exit?;
        position.working_order = None;
        let applied = position.apply_exit(&signal, fill_price, fee, at);

        let (instrument, side) = (position.instrument.clone(), position.side);
        let remaining_notional = position.notional();

        info!(
            position_id,
            %instrument,
            reason = ?signal.reason,
            price = %fill_price,
            size = %applied.size,
            pnl = %applied.realized_pnl,
            from = %applied.from,
            to = %applied.to,
            "Exit filled"
        );
        self.sink.emit(EngineEvent::TradeExecuted {
            timestamp: at,
            position_id,
            instrument: instrument.clone(),
            side: side.opposite(),
            price: fill_price,
            size: applied.size,
            realized_pnl: applied.realized_pnl,
            exit_reason: Some(signal.reason),
        });
        if applied.from != applied.to {
            self.sink.emit(EngineEvent::PositionStateChanged {
                timestamp: at,
                position_id,
                instrument,
                from: applied.from,
                to: applied.to,
            });
        }

        let closed = applied.to == PositionState::Closed;
        if closed {
            state.ledger.release(position_id);
            if let Some(done) = state.positions.remove(&position_id) {
                state.closed.push(done);
            }
        } else {
            state.ledger.resize(position_id, remaining_notional);
        }

        let breaker_tripped = self.realize(state, applied.realized_pnl, at);
        Some(ExitFill {
            realized_pnl: applied.realized_pnl,
            closed,
            breaker_tripped,
        })
    }

    /// Venue refused an exit; the position is re-marked on the next bar.
    pub fn on_exit_rejected(
        &self,
        state: &mut RiskState,
        position_id: u64,
        reason: &str,
        at: DateTime<Utc>,
    ) {
        if let Some(position) = state.positions.get_mut(&position_id) {
            position.pending_exit = None;
            position.working_order = None;
            warn!(position_id, %reason, "Exit rejected");
            self.sink.emit(EngineEvent::ExecutionFailed {
                timestamp: at,
                position_id,
                instrument: position.instrument.clone(),
                reason: reason.to_string(),
            });
        }
    }

    /// Book realized PnL against capital and the daily breaker.
    ///
    /// Returns true when this result trips the breaker. A trip cancels entries
    /// still waiting for resubmission; orders already in flight are left alone.
    fn realize(&self, state: &mut RiskState, pnl: Decimal, at: DateTime<Utc>) -> bool {
        self.roll_day(state, at);
        state.ledger.realize(pnl);

        if !state.daily.record(pnl, at, self.config.daily_loss_limit) {
            return false;
        }

        let limit = state.daily.loss_limit(self.config.daily_loss_limit);
        warn!(
            realized_loss = %state.daily.realized_loss,
            %limit,
            policy = ?self.config.breaker_policy,
            "Daily loss breaker tripped"
        );
        self.sink.emit(EngineEvent::BreakerTripped {
            timestamp: at,
            realized_loss: state.daily.realized_loss,
            limit,
        });

        let queued: Vec<u64> = state
            .positions
            .values()
            .filter(|p| p.state == PositionState::Pending && p.awaiting_resubmit)
            .map(|p| p.id)
            .collect();
        for id in queued {
            self.cancel_entry(state, id, "daily breaker tripped", at);
        }
        true
    }

    /// Exits required by the breaker policy after a trip.
    pub fn breaker_exits(&self, state: &mut RiskState) -> Vec<ExitOrder> {
        match self.config.breaker_policy {
            BreakerPolicy::BlockNewEntries => Vec::new(),
            BreakerPolicy::ForceClose => self.close_all(state, ExitReason::BreakerForceClose),
        }
    }

    /// Context for a strategy: which of its own positions are open.
    pub fn strategy_exposure(
        state: &RiskState,
        instrument: &str,
        strategy: StrategyKind,
    ) -> (bool, bool, Vec<Decimal>) {
        let mut long = false;
        let mut short = false;
        let mut grid_levels = Vec::new();
        for p in state.positions_for(instrument).filter(|p| p.strategy == strategy) {
            match p.side {
                Side::Long => long = true,
                Side::Short => short = true,
            }
            if let Some(level) = p.grid_level {
                grid_levels.push(level);
            }
        }
        (long, short, grid_levels)
    }
}

fn entry_request(position: &Position) -> OrderRequest {
    OrderRequest {
        client_order_id: OrderRequest::entry_client_id(position.id),
        position_id: position.id,
        instrument: position.instrument.clone(),
        side: position.side,
        size: position.initial_size,
        reference_price: position.entry_price,
        reduce_only: false,
    }
}

fn issue_exit(position: &mut Position, signal: ExitSignal) -> ExitOrder {
    position.pending_exit = Some(signal);
    position.exit_seq += 1;
    ExitOrder {
        position_id: position.id,
        signal,
        request: exit_request(position, &signal),
    }
}

/// The latest exit order issued for `position`.
fn exit_request(position: &Position, signal: &ExitSignal) -> OrderRequest {
    OrderRequest {
        client_order_id: OrderRequest::exit_client_id(position.id, position.exit_seq),
        position_id: position.id,
        instrument: position.instrument.clone(),
        side: position.side.opposite(),
        size: signal.size,
        reference_price: signal.price,
        reduce_only: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Candle, MemoryEventSink};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    // =========================================================================
    // Test Helpers
    // =========================================================================

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    fn config() -> RiskConfig {
        RiskConfig {
            stop_loss_pct: dec!(0.02),
            tp1_pct: dec!(0.03),
            tp2_pct: dec!(0.06),
            per_trade_risk_pct: dec!(0.01),
            max_instrument_allocation: dec!(0.5),
            max_total_utilization: dec!(0.9),
            size_step: dec!(0.001),
            ..RiskConfig::default()
        }
    }

    fn manager(config: RiskConfig) -> (RiskManager, Arc<MemoryEventSink>) {
        let sink = Arc::new(MemoryEventSink::new());
        (RiskManager::new(config, sink.clone()), sink)
    }

    fn intent(instrument: &str, price: Decimal, ts: DateTime<Utc>) -> OrderIntent {
        let candle = Candle::new(instrument, ts, price, price, price, price, dec!(1));
        OrderIntent::open(&candle, Side::Long, StrategyKind::EmaCrossover, 0.2, "test")
    }

    fn open(manager: &RiskManager, state: &mut RiskState, instrument: &str, ts: DateTime<Utc>) -> u64 {
        let approval = manager.approve(state, &intent(instrument, dec!(100), ts)).unwrap();
        manager.on_entry_fill(state, approval.position_id, dec!(100), approval.request.size, Decimal::ZERO, ts);
        approval.position_id
    }

    // =========================================================================
    // Approval Tests
    // =========================================================================

    #[test]
    fn test_approval_sizes_and_attaches_levels() {
        let (rm, _) = manager(config());
        let mut state = RiskState::new(dec!(10000), at(1, 0));

        let approval = rm.approve(&mut state, &intent("BTCUSDT", dec!(100), at(1, 1))).unwrap();
        assert_eq!(approval.request.size, dec!(50));
        assert_eq!(approval.notional, dec!(5000));
        assert_eq!(approval.request.client_order_id, "rt-1");

        let position = &state.positions[&approval.position_id];
        assert_eq!(position.state, PositionState::Pending);
        assert_eq!(position.tp1_price, dec!(103));
        assert_eq!(position.tp2_price, dec!(106));
        assert_eq!(position.stop_price, dec!(98));
    }

    #[test]
    fn test_allocation_exceeded_is_rejected_not_clipped() {
        let (rm, sink) = manager(config());
        let mut state = RiskState::new(dec!(10000), at(1, 0));

        rm.approve(&mut state, &intent("BTCUSDT", dec!(100), at(1, 1))).unwrap();
        let err = rm.approve(&mut state, &intent("BTCUSDT", dec!(100), at(1, 2))).unwrap_err();
        assert!(matches!(err, RiskRejection::RiskLimitExceeded { .. }));
        assert_eq!(state.open_count(), 1);
        assert_eq!(sink.count("intent_rejected"), 1);
    }

    #[test]
    fn test_max_positions() {
        let (rm, _) = manager(RiskConfig {
            max_positions: 1,
            sizing: crate::config::SizingRule::FixedNotional,
            fixed_notional: dec!(100),
            ..config()
        });
        let mut state = RiskState::new(dec!(10000), at(1, 0));
        rm.approve(&mut state, &intent("BTCUSDT", dec!(100), at(1, 1))).unwrap();
        assert_eq!(
            rm.approve(&mut state, &intent("ETHUSDT", dec!(100), at(1, 1))).unwrap_err(),
            RiskRejection::MaxPositions { open: 1, max: 1 }
        );
    }

    #[test]
    fn test_concurrent_instruments_cannot_jointly_exceed_total() {
        let (rm, _) = manager(RiskConfig {
            max_instrument_allocation: dec!(0.5),
            max_total_utilization: dec!(0.6),
            ..config()
        });
        let mut state = RiskState::new(dec!(10000), at(1, 0));
        rm.approve(&mut state, &intent("BTCUSDT", dec!(100), at(1, 1))).unwrap();
        assert!(rm.approve(&mut state, &intent("ETHUSDT", dec!(100), at(1, 1))).is_err());
    }

    // =========================================================================
    // Lifecycle Tests
    // =========================================================================

    #[test]
    fn test_fill_reanchors_levels() {
        let (rm, sink) = manager(config());
        let mut state = RiskState::new(dec!(10000), at(1, 0));
        let approval = rm.approve(&mut state, &intent("BTCUSDT", dec!(100), at(1, 1))).unwrap();

        rm.on_entry_fill(&mut state, approval.position_id, dec!(101), dec!(50), dec!(2), at(1, 2));
        let p = &state.positions[&approval.position_id];
        assert_eq!(p.state, PositionState::Open);
        assert_eq!(p.tp1_price, dec!(104.03));
        assert_eq!(state.capital(), dec!(9998));
        assert_eq!(sink.count("position_state_changed"), 1);
        assert_eq!(sink.count("trade_executed"), 1);
    }

    #[test]
    fn test_exit_fill_closes_and_releases() {
        let (rm, _) = manager(config());
        let mut state = RiskState::new(dec!(10000), at(1, 0));
        let id = open(&rm, &mut state, "BTCUSDT", at(1, 1));

        let exits = rm.mark_positions(&mut state, "BTCUSDT", dec!(97), at(1, 2));
        assert_eq!(exits.len(), 1);
        assert!(exits[0].request.reduce_only);
        assert_eq!(exits[0].request.side, Side::Short);

        let fill = rm.on_exit_fill(&mut state, id, dec!(97), Decimal::ZERO, at(1, 2)).unwrap();
        assert!(fill.closed);
        assert_eq!(fill.realized_pnl, dec!(-150));
        assert!(state.positions.is_empty());
        assert_eq!(state.closed.len(), 1);
        assert_eq!(state.ledger.reserved_total(), Decimal::ZERO);
        assert_eq!(state.capital(), dec!(9850));
    }

    #[test]
    fn test_strategy_close_targets_own_positions_only() {
        let (rm, _) = manager(RiskConfig {
            sizing: crate::config::SizingRule::FixedNotional,
            fixed_notional: dec!(1000),
            ..config()
        });
        let mut state = RiskState::new(dec!(10000), at(1, 0));
        open(&rm, &mut state, "BTCUSDT", at(1, 1));

        let candle = Candle::new("BTCUSDT", at(1, 2), dec!(101), dec!(101), dec!(101), dec!(101), dec!(1));
        let other = OrderIntent::close(&candle, Side::Long, StrategyKind::Grid, 0.0, "grid exit");
        assert!(rm.close_for_intent(&mut state, &other).is_empty());

        let own = OrderIntent::close(&candle, Side::Long, StrategyKind::EmaCrossover, 0.0, "cross down");
        let exits = rm.close_for_intent(&mut state, &own);
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].signal.reason, ExitReason::StrategyExit);
        // Already has an exit in flight
        assert!(rm.close_for_intent(&mut state, &own).is_empty());
    }

    #[test]
    fn test_rejected_entry_retries_then_cancels() {
        let (rm, sink) = manager(RiskConfig {
            max_submit_attempts: 2,
            ..config()
        });
        let mut state = RiskState::new(dec!(10000), at(1, 0));
        let approval = rm.approve(&mut state, &intent("BTCUSDT", dec!(100), at(1, 1))).unwrap();
        let id = approval.position_id;

        assert_eq!(
            rm.on_entry_rejected(&mut state, id, "margin", at(1, 1)),
            EntryRetry::Retry { attempts: 1 }
        );
        assert_eq!(state.positions[&id].state, PositionState::Pending);

        let resubmitted = rm.resubmissions(&mut state, "BTCUSDT");
        assert_eq!(resubmitted.len(), 1);
        assert_eq!(resubmitted[0].client_order_id, "rt-1");

        assert_eq!(
            rm.on_entry_rejected(&mut state, id, "margin", at(1, 2)),
            EntryRetry::Cancelled
        );
        assert!(state.positions.is_empty());
        assert_eq!(state.ledger.reserved_total(), Decimal::ZERO);
        assert_eq!(sink.count("execution_failed"), 1);
    }

    #[test]
    fn test_working_entry_is_not_resubmitted() {
        let (rm, _) = manager(config());
        let mut state = RiskState::new(dec!(10000), at(1, 0));
        let approval = rm.approve(&mut state, &intent("BTCUSDT", dec!(100), at(1, 1))).unwrap();
        let id = approval.position_id;

        rm.on_order_working(&mut state, id, "venue-9");
        assert_eq!(state.positions[&id].state, PositionState::Pending);
        assert!(rm.resubmissions(&mut state, "BTCUSDT").is_empty());
        assert_eq!(state.ledger.reserved_total(), approval.notional);

        let working = rm.working_orders(&state, "BTCUSDT");
        assert_eq!(working.len(), 1);
        assert_eq!(working[0].order_id, "venue-9");
        assert_eq!(working[0].request, approval.request);
        assert!(rm.working_orders(&state, "ETHUSDT").is_empty());

        // A late fill of the acknowledged order opens the position
        assert!(!rm.on_entry_fill(&mut state, id, dec!(100), dec!(50), Decimal::ZERO, at(1, 2)));
        assert_eq!(state.positions[&id].state, PositionState::Open);
        assert!(rm.working_orders(&state, "BTCUSDT").is_empty());
    }

    #[test]
    fn test_working_exit_reissues_same_order() {
        let (rm, _) = manager(config());
        let mut state = RiskState::new(dec!(10000), at(1, 0));
        let id = open(&rm, &mut state, "BTCUSDT", at(1, 1));

        let exits = rm.mark_positions(&mut state, "BTCUSDT", dec!(97), at(1, 2));
        assert_eq!(exits.len(), 1);
        rm.on_order_working(&mut state, id, "venue-x");

        let working = rm.working_orders(&state, "BTCUSDT");
        assert_eq!(working.len(), 1);
        assert_eq!(working[0].request, exits[0].request);
        assert!(working[0].request.reduce_only);

        // Cancelled at the venue: cleared and re-marked on the next bar
        rm.on_exit_rejected(&mut state, id, "cancelled unfilled", at(1, 3));
        assert!(rm.working_orders(&state, "BTCUSDT").is_empty());
        assert_eq!(rm.mark_positions(&mut state, "BTCUSDT", dec!(97), at(1, 3)).len(), 1);
    }

    // =========================================================================
    // Daily Breaker Tests
    // =========================================================================

    #[test]
    fn test_breaker_blocks_entries_until_next_day() {
        let (rm, sink) = manager(RiskConfig {
            daily_loss_limit: dec!(0.01),
            ..config()
        });
        let mut state = RiskState::new(dec!(10000), at(1, 0));
        let id = open(&rm, &mut state, "BTCUSDT", at(1, 1));

        rm.mark_positions(&mut state, "BTCUSDT", dec!(97), at(1, 2));
        let fill = rm.on_exit_fill(&mut state, id, dec!(97), Decimal::ZERO, at(1, 2)).unwrap();
        assert!(fill.breaker_tripped);
        assert_eq!(sink.count("breaker_tripped"), 1);

        assert_eq!(
            rm.approve(&mut state, &intent("ETHUSDT", dec!(100), at(1, 20))).unwrap_err(),
            RiskRejection::BreakerTripped
        );
        assert!(rm.breaker_exits(&mut state).is_empty());

        // Next day
        assert!(rm.approve(&mut state, &intent("ETHUSDT", dec!(100), at(2, 0))).is_ok());
        assert_eq!(sink.count("breaker_tripped"), 1);
    }

    #[test]
    fn test_force_close_policy() {
        let (rm, _) = manager(RiskConfig {
            breaker_policy: BreakerPolicy::ForceClose,
            sizing: crate::config::SizingRule::FixedNotional,
            fixed_notional: dec!(1000),
            ..config()
        });
        let mut state = RiskState::new(dec!(10000), at(1, 0));
        open(&rm, &mut state, "BTCUSDT", at(1, 1));
        open(&rm, &mut state, "ETHUSDT", at(1, 1));

        let exits = rm.breaker_exits(&mut state);
        assert_eq!(exits.len(), 2);
        assert!(exits.iter().all(|e| e.signal.reason == ExitReason::BreakerForceClose));
    }

    #[test]
    fn test_breaker_cancels_queued_resubmissions() {
        let (rm, _) = manager(RiskConfig {
            daily_loss_limit: dec!(0.01),
            max_instrument_allocation: dec!(0.9),
            sizing: crate::config::SizingRule::FixedNotional,
            fixed_notional: dec!(4000),
            ..config()
        });
        let mut state = RiskState::new(dec!(10000), at(1, 0));
        let losing = open(&rm, &mut state, "BTCUSDT", at(1, 1));
        let queued = rm.approve(&mut state, &intent("ETHUSDT", dec!(100), at(1, 1))).unwrap();
        rm.on_entry_rejected(&mut state, queued.position_id, "busy", at(1, 1));

        rm.mark_positions(&mut state, "BTCUSDT", dec!(97), at(1, 2));
        rm.on_exit_fill(&mut state, losing, dec!(97), Decimal::ZERO, at(1, 2));
        assert!(!state.positions.contains_key(&queued.position_id));
    }

    #[test]
    fn test_switching_strategy_leaves_positions_alone() {
        let (rm, _) = manager(config());
        let mut state = RiskState::new(dec!(10000), at(1, 0));
        open(&rm, &mut state, "BTCUSDT", at(1, 1));

        let (long, short, levels) =
            RiskManager::strategy_exposure(&state, "BTCUSDT", StrategyKind::MeanReversion);
        assert!(!long && !short && levels.is_empty());
        let (long, _, _) = RiskManager::strategy_exposure(&state, "BTCUSDT", StrategyKind::EmaCrossover);
        assert!(long);
        assert_eq!(state.positions.len(), 1);
    }
}
