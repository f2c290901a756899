use std::fmt;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::policy::VenuePolicy;
use crate::types::{OrderId, OrderSequence, Side};

// ---------------------------------------------------------------------------
// TradingState
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingState {
    ReadyToBuy,
    Buying,
    ReadyToSell,
    Selling,
}

impl fmt::Display for TradingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradingState::ReadyToBuy => "READY_TO_BUY",
            TradingState::Buying => "BUYING",
            TradingState::ReadyToSell => "READY_TO_SELL",
            TradingState::Selling => "SELLING",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ActiveOrder
// ---------------------------------------------------------------------------

/// The most recently submitted order of the current (or just-reset) cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActiveOrder {
    pub order_id: OrderId,
    pub side: Side,
    /// Set once a terminal status has been acted on. Later deliveries of a
    /// terminal status for this id are duplicates and are ignored.
    pub filled_confirmed: bool,
    /// A timeout cancel was sent for this BUY. A fill reported afterwards is
    /// adopted rather than dropped.
    pub cancel_requested: bool,
}

impl ActiveOrder {
    pub fn new(order_id: OrderId, side: Side) -> Self {
        Self {
            order_id,
            side,
            filled_confirmed: false,
            cancel_requested: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Reset at the start of every open-order scan.
    pub open_orders_seen: u32,
    /// Non-zero positions; reset at the start of every position scan.
    pub positions_seen: u32,
    /// Confirmed take-profit fills for the process lifetime.
    pub win_count: u32,
}

// ---------------------------------------------------------------------------
// PlaceOutcome
// ---------------------------------------------------------------------------

/// Final answer for one place request. Every accepted request receives
/// exactly one of these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum PlaceOutcome {
    /// The BUY filled; the take-profit SELL is being placed.
    Accepted,
    RejectedOpenOrdersPending,
    RejectedPositionsExist,
    RejectedDailyCapReached,
    /// Another place request is in flight or the previous cycle is still open.
    RejectedCycleInProgress,
    /// The cycle timed out or the BUY was cancelled unfilled.
    Aborted,
    Error(String),
}

// ---------------------------------------------------------------------------
// ControllerConfig
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub margin_rate: Decimal,
    pub daily_win_cap: u32,
    /// Deadline for the handshake and for the BUY fill.
    pub buy_timeout: Duration,
    pub account_id: Option<String>,
    pub venues: VenuePolicy,
}

// ---------------------------------------------------------------------------
// ControllerSnapshot
// ---------------------------------------------------------------------------

/// Read-only view of the controller, published after every handled event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ControllerSnapshot {
    pub state: TradingState,
    pub win_count: u32,
    pub daily_win_cap: u32,
    pub sequence: Option<OrderSequence>,
    pub active_order: Option<ActiveOrder>,
    pub place_pending: bool,
    pub timeout_armed: bool,
}

impl ControllerSnapshot {
    pub fn initial(daily_win_cap: u32) -> Self {
        Self {
            state: TradingState::ReadyToBuy,
            win_count: 0,
            daily_win_cap,
            sequence: None,
            active_order: None,
            place_pending: false,
            timeout_armed: false,
        }
    }
}
