//! Live pipeline: one task per instrument feeding the shared risk state.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use super::decision::DecisionCore;
use crate::config::Config;
use crate::exchange::{
    Candle, EventSink, ExchangePosition, ExecutionAdapter, MarketDataFeed, OrderRequest,
    OrderResult,
};
use crate::risk::{EntryRetry, ExitOrder, RiskManager, RiskState, SharedRiskState};
use crate::strategy::IntentAction;

/// An order the runner must hand to the execution adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Entry { position_id: u64, request: OrderRequest },
    Exit { position_id: u64, request: OrderRequest },
}

impl Submission {
    pub fn request(&self) -> &OrderRequest {
        match self {
            Submission::Entry { request, .. } | Submission::Exit { request, .. } => request,
        }
    }

    fn position_id(&self) -> u64 {
        match self {
            Submission::Entry { position_id, .. } | Submission::Exit { position_id, .. } => {
                *position_id
            }
        }
    }
}

impl From<ExitOrder> for Submission {
    fn from(exit: ExitOrder) -> Self {
        Submission::Exit {
            position_id: exit.position_id,
            request: exit.request,
        }
    }
}

/// Collect everything one candle asks of the risk manager.
///
/// Runs under the risk-state lock; never awaits.
pub fn plan_candle(
    core: &mut DecisionCore,
    risk: &RiskManager,
    state: &mut RiskState,
    candle: &Candle,
) -> Result<Vec<Submission>> {
    risk.roll_day(state, candle.timestamp);
    let decision = core.on_candle(candle, state)?;

    let mut submissions: Vec<Submission> = risk
        .resubmissions(state, &candle.instrument)
        .into_iter()
        .map(|request| Submission::Entry {
            position_id: request.position_id,
            request,
        })
        .collect();

    submissions.extend(
        risk.mark_positions(state, &candle.instrument, candle.close, candle.timestamp)
            .into_iter()
            .map(Submission::from),
    );

    if let Some(intent) = decision.intent {
        match intent.action {
            IntentAction::Close => submissions.extend(
                risk.close_for_intent(state, &intent)
                    .into_iter()
                    .map(Submission::from),
            ),
            IntentAction::Open => {
                if let Ok(approval) = risk.approve(state, &intent) {
                    submissions.push(Submission::Entry {
                        position_id: approval.position_id,
                        request: approval.request,
                    });
                }
            }
        }
    }

    Ok(submissions)
}

/// Drives the decision core for each instrument against a live feed.
pub struct LiveRunner {
    config: Config,
    risk: Arc<RiskManager>,
    state: SharedRiskState,
    feed: Arc<dyn MarketDataFeed>,
    adapter: Arc<dyn ExecutionAdapter>,
    sink: Arc<dyn EventSink>,
}

impl LiveRunner {
    pub fn new(
        config: Config,
        state: SharedRiskState,
        feed: Arc<dyn MarketDataFeed>,
        adapter: Arc<dyn ExecutionAdapter>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let risk = Arc::new(RiskManager::new(config.risk.clone(), sink.clone()));
        Self {
            config,
            risk,
            state,
            feed,
            adapter,
            sink,
        }
    }

    pub fn state(&self) -> SharedRiskState {
        self.state.clone()
    }

    /// Run every instrument concurrently until the feeds end or shutdown.
    pub async fn run(self: Arc<Self>, instruments: Vec<String>, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.config.validate().context("Invalid configuration")?;

        let mut tasks = JoinSet::new();
        for instrument in instruments {
            let runner = self.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move { runner.run_instrument(instrument, shutdown).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Instrument task failed"),
                Err(e) => error!(error = %e, "Instrument task panicked"),
            }
        }
        Ok(())
    }

    #[instrument(skip(self, shutdown))]
    async fn run_instrument(&self, instrument: String, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut core = DecisionCore::new(instrument.clone(), &self.config, self.sink.clone())?;
        let mut candles = self
            .feed
            .subscribe(&instrument)
            .await
            .with_context(|| format!("Failed to subscribe to {}", instrument))?;

        info!("Instrument pipeline started");

        loop {
            tokio::select! {
                next = candles.next() => {
                    match next {
                        Some(Ok(candle)) => self.process_candle(&mut core, &candle).await,
                        Some(Err(e)) => warn!(error = %e, "Feed error, skipping"),
                        None => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Instrument pipeline stopped");
        Ok(())
    }

    /// Decide under the lock, then submit with the lock released.
    ///
    /// Orders left working at the venue by earlier bars are settled first, so
    /// a cancelled entry can be retried by this bar's plan.
    pub async fn process_candle(&self, core: &mut DecisionCore, candle: &Candle) {
        let follow_ups = self
            .settle_working_orders(&candle.instrument, candle.timestamp)
            .await;
        if !follow_ups.is_empty() {
            self.execute(follow_ups, candle.timestamp).await;
        }

        let planned = {
            let mut state = self.state.lock().await;
            plan_candle(core, &self.risk, &mut state, candle)
        };

        match planned {
            Ok(submissions) => self.execute(submissions, candle.timestamp).await,
            Err(e) => warn!(instrument = %candle.instrument, error = %e, "Candle skipped"),
        }
    }

    /// Submit orders and settle their outcomes, including follow-up orders
    /// (breaker force-close) triggered by the fills.
    pub async fn execute(&self, submissions: Vec<Submission>, at: DateTime<Utc>) {
        let mut queue: VecDeque<Submission> = submissions.into();
        while let Some(submission) = queue.pop_front() {
            let outcome = self.adapter.submit(submission.request()).await;
            let follow_ups = self.settle(&submission, outcome, at).await;
            queue.extend(follow_ups);
        }
    }

    /// Resolve acknowledged orders on `instrument` that had not filled.
    ///
    /// A working order found filled at the venue is booked. One still missing
    /// is cancelled, and only a confirmed cancel releases it to the retry
    /// budget; a failed cancel leaves it working for the next bar.
    pub async fn settle_working_orders(&self, instrument: &str, at: DateTime<Utc>) -> Vec<Submission> {
        let working = {
            let state = self.state.lock().await;
            self.risk.working_orders(&state, instrument)
        };

        let mut follow_ups = Vec::new();
        for order in working {
            let position_id = order.position_id;
            let submission = if order.request.reduce_only {
                Submission::Exit {
                    position_id,
                    request: order.request,
                }
            } else {
                Submission::Entry {
                    position_id,
                    request: order.request,
                }
            };

            match self.venue_view(&submission).await {
                VenueView::Filled { price, size } => {
                    follow_ups.extend(self.on_fill(&submission, price, size, Decimal::ZERO, at).await);
                }
                VenueView::Unknown => {
                    warn!(position_id, order_id = %order.order_id, "Working order unresolved");
                }
                VenueView::Missing => match self.adapter.cancel(&order.order_id).await {
                    Ok(()) => {
                        info!(position_id, order_id = %order.order_id, "Working order cancelled");
                        self.on_reject(&submission, "working order cancelled unfilled", at)
                            .await;
                    }
                    Err(e) => {
                        warn!(
                            position_id,
                            order_id = %order.order_id,
                            error = %e,
                            "Cancel failed, order stays working"
                        );
                    }
                },
            }
        }
        follow_ups
    }

    async fn settle(
        &self,
        submission: &Submission,
        outcome: Result<OrderResult>,
        at: DateTime<Utc>,
    ) -> Vec<Submission> {
        let position_id = submission.position_id();
        match outcome {
            Ok(OrderResult::Filled {
                fill_price,
                size,
                fee,
                ..
            }) => self.on_fill(submission, fill_price, size, fee, at).await,
            Ok(OrderResult::Rejected { reason }) => {
                self.on_reject(submission, &reason, at).await;
                Vec::new()
            }
            Ok(OrderResult::Pending { order_id }) => {
                info!(position_id, %order_id, "Order pending, reconciling");
                match self.venue_view(submission).await {
                    VenueView::Filled { price, size } => {
                        self.on_fill(submission, price, size, Decimal::ZERO, at).await
                    }
                    VenueView::Missing | VenueView::Unknown => {
                        let mut state = self.state.lock().await;
                        self.risk.on_order_working(&mut state, position_id, &order_id);
                        Vec::new()
                    }
                }
            }
            Err(e) => {
                warn!(position_id, error = %e, "Submit outcome unknown, reconciling");
                match self.venue_view(submission).await {
                    VenueView::Filled { price, size } => {
                        self.on_fill(submission, price, size, Decimal::ZERO, at).await
                    }
                    VenueView::Missing => {
                        self.on_reject(submission, "order not found after unknown outcome", at)
                            .await;
                        Vec::new()
                    }
                    VenueView::Unknown => {
                        self.on_reject(submission, "outcome unknown, reconciliation failed", at)
                            .await;
                        Vec::new()
                    }
                }
            }
        }
    }

    async fn on_fill(
        &self,
        submission: &Submission,
        fill_price: Decimal,
        size: Decimal,
        fee: Decimal,
        at: DateTime<Utc>,
    ) -> Vec<Submission> {
        let mut state = self.state.lock().await;
        let tripped = match submission {
            Submission::Entry { position_id, .. } => {
                self.risk
                    .on_entry_fill(&mut state, *position_id, fill_price, size, fee, at)
            }
            Submission::Exit { position_id, .. } => self
                .risk
                .on_exit_fill(&mut state, *position_id, fill_price, fee, at)
                .map(|fill| fill.breaker_tripped)
                .unwrap_or(false),
        };

        if tripped {
            self.risk
                .breaker_exits(&mut state)
                .into_iter()
                .map(Submission::from)
                .collect()
        } else {
            Vec::new()
        }
    }

    async fn on_reject(&self, submission: &Submission, reason: &str, at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        match submission {
            Submission::Entry { position_id, .. } => {
                if let EntryRetry::Retry { attempts } =
                    self.risk.on_entry_rejected(&mut state, *position_id, reason, at)
                {
                    info!(position_id, attempts, "Entry queued for resubmission");
                }
            }
            Submission::Exit { position_id, .. } => {
                self.risk.on_exit_rejected(&mut state, *position_id, reason, at)
            }
        }
    }

    /// Re-query venue positions to learn whether `submission` took effect.
    async fn venue_view(&self, submission: &Submission) -> VenueView {
        let request = submission.request();
        let positions = match self.adapter.get_open_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(position_id = request.position_id, error = %e, "Reconciliation failed");
                return VenueView::Unknown;
            }
        };

        let entry_id = OrderRequest::entry_client_id(request.position_id);
        let venue: Option<&ExchangePosition> =
            positions.iter().find(|p| p.client_order_id == entry_id);

        match (submission, venue) {
            (Submission::Entry { .. }, Some(position)) => VenueView::Filled {
                price: position.entry_price,
                size: position.size,
            },
            (Submission::Entry { .. }, None) => VenueView::Missing,
            (Submission::Exit { .. }, remaining) => {
                let before = {
                    let state = self.state.lock().await;
                    state.positions.get(&request.position_id).map(|p| p.size)
                };
                let remaining = remaining.map(|p| p.size).unwrap_or_default();
                match before {
                    Some(size) if remaining < size => VenueView::Filled {
                        price: request.reference_price,
                        size: request.size,
                    },
                    _ => VenueView::Missing,
                }
            }
        }
    }
}

/// What the venue's open positions say about a submitted order.
enum VenueView {
    Filled { price: Decimal, size: Decimal },
    Missing,
    Unknown,
}
