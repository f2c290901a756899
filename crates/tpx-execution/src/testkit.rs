//! Recording doubles for the controller seams.
//!
//! Deterministic and synchronous: nothing here spawns, sleeps or talks to a
//! network. Timer fires and broker callbacks are driven by the test.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::broker::{BrokerAdapter, BrokerCommand, BrokerResult};
use crate::notify::{Notification, Notifier};
use crate::timeout::{DeadlineScheduler, TimeoutToken};
use crate::types::{ContractSpec, OrderId, OrderSpec};

/// Records every command; optionally fails some of them.
#[derive(Debug, Default)]
pub struct RecordingBroker {
    pub commands: Vec<BrokerCommand>,
    /// `place_order` returns an error (the command is still recorded).
    pub fail_place: bool,
    /// `request_open_orders`, `request_positions` and `request_ids` error.
    pub fail_requests: bool,
}

impl RecordingBroker {
    fn record(&mut self, cmd: BrokerCommand, fail: bool) -> BrokerResult {
        self.commands.push(cmd);
        if fail {
            Err("recording broker: injected failure".into())
        } else {
            Ok(())
        }
    }

    pub fn placed(&self) -> Vec<(OrderId, &OrderSpec)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                BrokerCommand::PlaceOrder {
                    order_id, order, ..
                } => Some((*order_id, order)),
                _ => None,
            })
            .collect()
    }

    pub fn cancels(&self) -> Vec<OrderId> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                BrokerCommand::CancelOrder(id) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

impl BrokerAdapter for RecordingBroker {
    fn connect(&mut self) -> BrokerResult {
        self.record(BrokerCommand::Connect, false)
    }

    fn request_current_time(&mut self) -> BrokerResult {
        self.record(BrokerCommand::RequestCurrentTime, false)
    }

    fn request_ids(&mut self, count: u32) -> BrokerResult {
        let fail = self.fail_requests;
        self.record(BrokerCommand::RequestIds(count), fail)
    }

    fn request_positions(&mut self) -> BrokerResult {
        let fail = self.fail_requests;
        self.record(BrokerCommand::RequestPositions, fail)
    }

    fn request_open_orders(&mut self) -> BrokerResult {
        let fail = self.fail_requests;
        self.record(BrokerCommand::RequestOpenOrders, fail)
    }

    fn place_order(
        &mut self,
        order_id: OrderId,
        contract: &ContractSpec,
        order: &OrderSpec,
    ) -> BrokerResult {
        let fail = self.fail_place;
        self.record(
            BrokerCommand::PlaceOrder {
                order_id,
                contract: contract.clone(),
                order: order.clone(),
            },
            fail,
        )
    }

    fn cancel_order(&mut self, order_id: OrderId) -> BrokerResult {
        self.record(BrokerCommand::CancelOrder(order_id), false)
    }
}

/// Records deadlines instead of sleeping. Tests fire tokens by hand.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    pub scheduled: Vec<(TimeoutToken, Duration)>,
}

impl DeadlineScheduler for RecordingScheduler {
    fn schedule(&mut self, token: TimeoutToken, after: Duration) {
        self.scheduled.push((token, after));
    }
}

/// Collects notifications. Clones share the same log.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, note: Notification) {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(note);
    }
}
