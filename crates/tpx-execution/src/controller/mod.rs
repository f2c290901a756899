//! Trading cycle controller.
//!
//! One cycle is: accept a buy signal, confirm the account is flat, place a
//! limit BUY, wait (bounded) for the fill, then place a take-profit limit SELL
//! at `avg_fill_price * (1 + margin_rate)` and count a win when it fills.
//!
//! ```text
//!   READY_TO_BUY --(scans clean)--> BUYING --(BUY filled)--> READY_TO_SELL
//!        ^                            |                          |
//!        |        (timeout / cancel)  |                     (SELL placed)
//!        +----------------------------+                          v
//!        +--------------(SELL filled or cancelled)----------- SELLING
//! ```
//!
//! # Invariants
//!
//! - All mutable trading state lives in [`Controller`] and is only touched
//!   from [`Controller::handle`]. Broker callbacks, timer fires and HTTP
//!   requests reach it as [`ControllerEvent`]s through one queue.
//! - At most one place request is in flight. A second one is rejected
//!   immediately, never queued.
//! - Every accepted place request is resolved exactly once, by scan
//!   rejection, BUY fill, abort, or error. The handshake deadline covers the
//!   stretch before a BUY exists, so a silent broker cannot strand a caller.
//! - A BUY fill that arrives after its timeout cancel is adopted: the shares
//!   exist, so the cycle moves to READY_TO_SELL.
//! - A terminal status is acted on once per order id; repeats are dropped.
//! - READY_TO_SELL always has an id request or a retry deadline outstanding.
//!   A failed SELL (or id request) arms a deadline that asks for a fresh id.

mod machine;
mod state;

pub use machine::{is_legal_transition, Controller, ControllerEvent};
pub use state::{
    ActiveOrder, ControllerConfig, ControllerSnapshot, Counters, PlaceOutcome, TradingState,
};
