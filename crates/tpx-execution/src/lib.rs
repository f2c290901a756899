//! tpx-execution
//!
//! Take-profit execution core:
//! - signal parsing and order construction (`types`)
//! - sell-target pricing and venue routing (`policy`)
//! - the broker seam (`broker`) and notification seam (`notify`)
//! - the single-owner trading cycle (`controller`) with its timeout
//!   supervisor (`timeout`)
//! - the async shell that runs it (`runtime`)
//!
//! Everything below `runtime` is synchronous and deterministic; tests drive
//! it with the doubles in `testkit`.

pub mod broker;
pub mod controller;
pub mod notify;
pub mod policy;
pub mod runtime;
pub mod testkit;
pub mod timeout;
pub mod types;

pub use broker::{
    is_benign_error, BrokerAdapter, BrokerCommand, BrokerEvent, BrokerResult, OrderStatusUpdate,
    StatusClass, DEFAULT_VENUE,
};
pub use controller::{
    ActiveOrder, Controller, ControllerConfig, ControllerEvent, ControllerSnapshot, Counters,
    PlaceOutcome, TradingState,
};
pub use notify::{Notification, Notifier};
pub use policy::{compute_sell_target, VenuePolicy, PRICE_DP};
pub use runtime::{
    event_queue, spawn_controller, BrokerEventSender, ControllerHandle, EventInbox, EventQueue,
    RuntimeError, TokioScheduler,
};
pub use timeout::{DeadlineScheduler, TimeoutKey, TimeoutSupervisor, TimeoutToken};
pub use types::{
    is_buy_signal, ContractSpec, OrderId, OrderSequence, OrderSpec, OrderType, Side, SignalError,
    MAX_SIGNAL_PRICE,
};
