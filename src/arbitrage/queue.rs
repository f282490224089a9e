//! Bounded, expiring opportunity queue between the monitor and its consumer.
//!
//! Expired entries are evicted whenever the queue is full, so stale
//! opportunities never crowd out fresh ones.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::engine::ArbitrageOpportunity;

/// Create a queue holding at most `capacity` undelivered opportunities.
pub fn opportunity_queue(capacity: usize) -> (OpportunitySender, OpportunityReceiver) {
    let shared = Arc::new(Shared {
        capacity: capacity.max(1),
        state: Mutex::new(QueueState {
            items: VecDeque::new(),
            senders: 1,
            receiver_alive: true,
        }),
        notify: Notify::new(),
    });
    (
        OpportunitySender {
            shared: shared.clone(),
        },
        OpportunityReceiver { shared },
    )
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Debug)]
struct QueueState {
    items: VecDeque<ArbitrageOpportunity>,
    senders: usize,
    receiver_alive: bool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct OpportunitySender {
    shared: Arc<Shared>,
}

impl OpportunitySender {
    /// Append without waiting.
    ///
    /// A full queue first evicts whatever has expired; if it is still full the
    /// new opportunity is dropped. A closed queue drops it too.
    pub fn publish(&self, opportunity: ArbitrageOpportunity) -> bool {
        self.publish_at(opportunity, Utc::now())
    }

    fn publish_at(&self, opportunity: ArbitrageOpportunity, now: DateTime<Utc>) -> bool {
        let mut state = self.shared.lock();
        if !state.receiver_alive {
            debug!(id = opportunity.id, "Opportunity queue closed");
            return false;
        }

        if state.items.len() >= self.shared.capacity {
            let before = state.items.len();
            state.items.retain(|queued| !queued.is_expired(now));
            let evicted = before - state.items.len();
            if evicted > 0 {
                debug!(evicted, "Stale opportunities evicted");
            }
        }
        if state.items.len() >= self.shared.capacity {
            warn!(
                id = opportunity.id,
                instrument = %opportunity.instrument,
                "Opportunity queue full, dropping"
            );
            return false;
        }

        state.items.push_back(opportunity);
        drop(state);
        self.shared.notify.notify_one();
        true
    }
}

impl Clone for OpportunitySender {
    fn clone(&self) -> Self {
        self.shared.lock().senders += 1;
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for OpportunitySender {
    fn drop(&mut self) {
        self.shared.lock().senders -= 1;
        self.shared.notify.notify_one();
    }
}

#[derive(Debug)]
pub struct OpportunityReceiver {
    shared: Arc<Shared>,
}

impl OpportunityReceiver {
    /// Next opportunity still live at the time it is taken off the queue.
    ///
    /// Returns `None` once every sender is gone and the queue is empty.
    pub async fn recv(&mut self) -> Option<ArbitrageOpportunity> {
        loop {
            {
                let mut state = self.shared.lock();
                while let Some(opportunity) = state.items.pop_front() {
                    if let Some(live) = live(opportunity, Utc::now()) {
                        return Some(live);
                    }
                }
                if state.senders == 0 {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    /// Everything currently queued that is live at `now`.
    pub fn drain_live(&mut self, now: DateTime<Utc>) -> Vec<ArbitrageOpportunity> {
        let mut state = self.shared.lock();
        state
            .items
            .drain(..)
            .filter_map(|opportunity| live(opportunity, now))
            .collect()
    }
}

impl Drop for OpportunityReceiver {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.receiver_alive = false;
        state.items.clear();
    }
}

fn live(opportunity: ArbitrageOpportunity, now: DateTime<Utc>) -> Option<ArbitrageOpportunity> {
    if opportunity.is_expired(now) {
        debug!(
            id = opportunity.id,
            instrument = %opportunity.instrument,
            expires_at = %opportunity.expires_at,
            "Stale opportunity dropped"
        );
        None
    } else {
        Some(opportunity)
    }
}
