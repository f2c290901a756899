//! Order timeout supervisor.
//!
//! # Invariants
//!
//! - **One live deadline.** The supervisor holds a single slot. Arming a new
//!   deadline supersedes whatever was live; at most one BUY order, the
//!   pre-submission handshake, or a pending SELL retry is ever guarded at a
//!   time.
//! - **Generation tokens, not flags.** Every `arm` mints a fresh
//!   [`TimeoutToken`] with a strictly increasing generation. A firing timer
//!   carries its token back through the event queue and acts only if
//!   [`TimeoutSupervisor::claim`] accepts it, i.e. the token is still the
//!   live one. Disarmed or superseded timers still wake up, but their claim
//!   fails and the fire is a no-op.
//!
//! Scheduling itself is delegated to a [`DeadlineScheduler`] so the
//! supervisor stays synchronous and deterministic under test.

use std::time::Duration;

use serde::Serialize;

use crate::types::OrderId;

/// What a deadline guards.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum TimeoutKey {
    /// Open-order scan, position scan and id request before the BUY exists.
    Handshake,
    /// A submitted BUY order awaiting its fill.
    Order(OrderId),
    /// Back-off before asking for a fresh order id after the take-profit
    /// SELL could not be sent.
    SellRetry,
}

/// Proof of one `arm` call. Compared by value on fire.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TimeoutToken {
    pub key: TimeoutKey,
    pub generation: u64,
}

/// Delivers a [`TimeoutToken`] back to the controller after a delay.
pub trait DeadlineScheduler {
    fn schedule(&mut self, token: TimeoutToken, after: Duration);
}

#[derive(Debug)]
pub struct TimeoutSupervisor<S> {
    scheduler: S,
    next_generation: u64,
    live: Option<TimeoutToken>,
}

impl<S: DeadlineScheduler> TimeoutSupervisor<S> {
    pub fn new(scheduler: S) -> Self {
        Self {
            scheduler,
            next_generation: 1,
            live: None,
        }
    }

    /// Schedule a deadline for `key`, superseding any live one.
    pub fn arm(&mut self, key: TimeoutKey, deadline: Duration) -> TimeoutToken {
        let token = TimeoutToken {
            key,
            generation: self.next_generation,
        };
        self.next_generation += 1;
        self.live = Some(token);
        self.scheduler.schedule(token, deadline);
        token
    }

    /// Invalidate the live deadline if it guards `order_id`.
    ///
    /// Returns `true` if a live deadline was invalidated.
    pub fn disarm(&mut self, order_id: OrderId) -> bool {
        match self.live {
            Some(t) if t.key == TimeoutKey::Order(order_id) => {
                self.live = None;
                true
            }
            _ => false,
        }
    }

    /// Invalidate the live deadline only if it guards `key`.
    pub fn clear_key(&mut self, key: TimeoutKey) -> bool {
        match self.live {
            Some(t) if t.key == key => {
                self.live = None;
                true
            }
            _ => false,
        }
    }

    /// Invalidate whatever is live.
    pub fn clear(&mut self) {
        self.live = None;
    }

    /// Called when a timer fires. Accepts (and consumes) only the live token.
    pub fn claim(&mut self, token: TimeoutToken) -> bool {
        if self.live == Some(token) {
            self.live = None;
            true
        } else {
            false
        }
    }

    pub fn live(&self) -> Option<TimeoutToken> {
        self.live
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }
}
