//! Async shell around [`Controller`].
//!
//! The controller is synchronous; this module gives it a home task, a single
//! unbounded event queue, a tokio-backed [`DeadlineScheduler`] and a cloneable
//! [`ControllerHandle`] for request handlers.
//!
//! Wiring order matters because the broker and the scheduler both feed the
//! same queue the controller drains:
//!
//! ```ignore
//! let (queue, inbox) = event_queue();
//! let broker = PaperBroker::new(queue.broker_sink(), FillMode::Immediate);
//! let controller = Controller::new(cfg, broker, queue.scheduler(), notifier);
//! let handle = spawn_controller(controller, queue, inbox);
//! ```

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::broker::{BrokerAdapter, BrokerEvent};
use crate::controller::{Controller, ControllerEvent, ControllerSnapshot, PlaceOutcome};
use crate::notify::Notifier;
use crate::timeout::{DeadlineScheduler, TimeoutToken};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The controller task is gone; nothing will answer.
    ControllerStopped,
    /// The broker did not answer a query.
    NoAnswer,
    /// The query deadline elapsed.
    TimedOut(Duration),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::ControllerStopped => write!(f, "controller task stopped"),
            RuntimeError::NoAnswer => write!(f, "broker did not answer"),
            RuntimeError::TimedOut(d) => write!(f, "no answer within {d:?}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Producer side of the controller queue.
#[derive(Clone, Debug)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<ControllerEvent>,
}

/// Consumer side; handed to [`spawn_controller`].
#[derive(Debug)]
pub struct EventInbox {
    rx: mpsc::UnboundedReceiver<ControllerEvent>,
}

pub fn event_queue() -> (EventQueue, EventInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventQueue { tx }, EventInbox { rx })
}

impl EventInbox {
    /// Next queued event without waiting. For adapters under test.
    pub fn try_recv(&mut self) -> Option<ControllerEvent> {
        self.rx.try_recv().ok()
    }
}

impl EventQueue {
    /// Sink a broker adapter uses to deliver its callbacks.
    pub fn broker_sink(&self) -> BrokerEventSender {
        BrokerEventSender {
            tx: self.tx.clone(),
        }
    }

    pub fn scheduler(&self) -> TokioScheduler {
        TokioScheduler {
            tx: self.tx.clone(),
        }
    }

    fn send(&self, ev: ControllerEvent) -> Result<(), RuntimeError> {
        self.tx.send(ev).map_err(|_| RuntimeError::ControllerStopped)
    }
}

/// Enqueues [`BrokerEvent`]s from whatever thread the adapter runs on.
#[derive(Clone, Debug)]
pub struct BrokerEventSender {
    tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl BrokerEventSender {
    /// Returns `false` once the controller has stopped.
    pub fn send(&self, ev: BrokerEvent) -> bool {
        self.tx.send(ControllerEvent::Broker(ev)).is_ok()
    }
}

// ---------------------------------------------------------------------------
// TokioScheduler
// ---------------------------------------------------------------------------

/// Sleeps on the tokio timer and enqueues the token when it wakes.
///
/// Must be used from within a tokio runtime. Superseded timers still wake;
/// the controller discards their tokens.
#[derive(Clone, Debug)]
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl DeadlineScheduler for TokioScheduler {
    fn schedule(&mut self, token: TimeoutToken, after: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if tx.send(ControllerEvent::TimeoutFired(token)).is_err() {
                debug!(?token, "timer fired after controller stopped");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Controller task
// ---------------------------------------------------------------------------

/// Cloneable front door used by the HTTP layer.
#[derive(Clone, Debug)]
pub struct ControllerHandle {
    queue: EventQueue,
    snapshots: watch::Receiver<ControllerSnapshot>,
}

/// Move `controller` onto its own task and start draining `inbox`.
///
/// The latest [`ControllerSnapshot`] is republished whenever an event changes it.
pub fn spawn_controller<B, S, N>(
    mut controller: Controller<B, S, N>,
    queue: EventQueue,
    mut inbox: EventInbox,
) -> ControllerHandle
where
    B: BrokerAdapter + Send + 'static,
    S: DeadlineScheduler + Send + 'static,
    N: Notifier + 'static,
{
    let (snap_tx, snap_rx) = watch::channel(controller.snapshot());

    tokio::spawn(async move {
        info!("controller task started");
        while let Some(ev) = inbox.rx.recv().await {
            controller.handle(ev);
            let snap = controller.snapshot();
            snap_tx.send_if_modified(|cur| {
                if *cur == snap {
                    false
                } else {
                    *cur = snap;
                    true
                }
            });
        }
        info!("controller task stopped");
    });

    ControllerHandle {
        queue,
        snapshots: snap_rx,
    }
}

impl ControllerHandle {
    /// Submit a buy signal and wait for its final outcome.
    pub async fn place(&self, message: impl Into<String>) -> PlaceOutcome {
        let (reply, rx) = oneshot::channel();
        let ev = ControllerEvent::Place {
            message: message.into(),
            reply,
        };
        if let Err(e) = self.queue.send(ev) {
            return PlaceOutcome::Error(e.to_string());
        }
        rx.await
            .unwrap_or_else(|_| PlaceOutcome::Error(RuntimeError::ControllerStopped.to_string()))
    }

    /// Ask the broker for its clock, seconds since the Unix epoch.
    pub async fn current_time(&self, within: Duration) -> Result<i64, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.queue.send(ControllerEvent::CurrentTime { reply })?;
        match tokio::time::timeout(within, rx).await {
            Ok(Ok(t)) => Ok(t),
            Ok(Err(_)) => Err(RuntimeError::NoAnswer),
            Err(_) => Err(RuntimeError::TimedOut(within)),
        }
    }

    /// Snapshot taken after every event queued before this call.
    pub async fn fresh_snapshot(&self) -> Result<ControllerSnapshot, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.queue.send(ControllerEvent::Snapshot { reply })?;
        rx.await.map_err(|_| RuntimeError::ControllerStopped)
    }

    /// Last published snapshot; never waits.
    pub fn latest(&self) -> ControllerSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerSnapshot> {
        self.snapshots.clone()
    }

    pub fn broker_events(&self) -> BrokerEventSender {
        self.queue.broker_sink()
    }
}
