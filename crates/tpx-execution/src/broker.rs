//! Broker seam: the adapter trait the controller drives and the typed events
//! the adapter feeds back.
//!
//! Commands are fire-and-forget. An `Ok(())` only means the command left the
//! process; its effect arrives later as a [`BrokerEvent`] correlated by order
//! id. Adapters translate their raw callbacks into `BrokerEvent`s and enqueue
//! them (see [`crate::runtime::BrokerEventSender`]); they never touch
//! controller state directly.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{ContractSpec, OrderId, OrderSpec, Side};

/// Convenience alias used throughout this module.
pub type BrokerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Venue used when an adapter has no better routing for a symbol.
pub const DEFAULT_VENUE: &str = "SMART";

// ---------------------------------------------------------------------------
// BrokerAdapter trait
// ---------------------------------------------------------------------------

/// Outbound command surface of a brokerage connection.
///
/// Implemented by the paper broker and by test doubles; a live brokerage
/// client implements the same trait around its own wire protocol.
pub trait BrokerAdapter {
    fn connect(&mut self) -> BrokerResult;

    /// Venue the adapter routes `symbol` to when no override applies.
    fn default_venue(&self, _symbol: &str) -> String {
        DEFAULT_VENUE.to_string()
    }

    fn request_current_time(&mut self) -> BrokerResult;
    fn request_ids(&mut self, count: u32) -> BrokerResult;
    fn request_positions(&mut self) -> BrokerResult;
    fn request_open_orders(&mut self) -> BrokerResult;
    fn place_order(
        &mut self,
        order_id: OrderId,
        contract: &ContractSpec,
        order: &OrderSpec,
    ) -> BrokerResult;
    fn cancel_order(&mut self, order_id: OrderId) -> BrokerResult;
}

/// A command as issued to an adapter. Used by recording doubles and the
/// paper broker's command log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerCommand {
    Connect,
    RequestCurrentTime,
    RequestIds(u32),
    RequestPositions,
    RequestOpenOrders,
    PlaceOrder {
        order_id: OrderId,
        contract: ContractSpec,
        order: OrderSpec,
    },
    CancelOrder(OrderId),
}

// ---------------------------------------------------------------------------
// BrokerEvent
// ---------------------------------------------------------------------------

/// Status update for one order, as pushed by the brokerage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusUpdate {
    pub order_id: OrderId,
    pub status: String,
    pub filled: i64,
    pub remaining: i64,
    pub avg_fill_price: Decimal,
}

impl OrderStatusUpdate {
    pub fn class(&self) -> StatusClass {
        StatusClass::of(&self.status)
    }
}

/// Every callback the controller consumes, as a typed event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerEvent {
    Error {
        code: i32,
        req_id: Option<OrderId>,
        message: String,
    },
    Position {
        account: String,
        symbol: String,
        size: Decimal,
        avg_cost: Decimal,
    },
    PositionEnd,
    NextValidId(OrderId),
    OrderStatus(OrderStatusUpdate),
    OpenOrder {
        order_id: OrderId,
        symbol: String,
        side: Side,
        quantity: i64,
    },
    OpenOrderEnd,
    /// Broker clock, seconds since the Unix epoch.
    CurrentTime(i64),
}

// ---------------------------------------------------------------------------
// Status classification
// ---------------------------------------------------------------------------

/// Coarse family of a broker status string.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatusClass {
    Filled,
    /// Any status ending in `Cancelled`, plus `PendingCancel`.
    Cancelled,
    /// Everything else (`PreSubmitted`, `Submitted`, `PendingSubmit`, ...).
    Working,
}

impl StatusClass {
    pub fn of(status: &str) -> Self {
        if status == "Filled" {
            StatusClass::Filled
        } else if status.ends_with("Cancelled") || status == "PendingCancel" {
            StatusClass::Cancelled
        } else {
            StatusClass::Working
        }
    }
}

// ---------------------------------------------------------------------------
// Error code filtering
// ---------------------------------------------------------------------------

/// Error codes that are expected noise and must not raise alerts:
/// cancel-related acknowledgements and connectivity / data-farm status.
const BENIGN_ERROR_CODES: &[i32] = &[
    161,   // cancel attempted when order not in a cancellable state
    202,   // order cancelled
    10147, // order id to cancel not found
    10148, // cancel rejected: order already filled
    1100,  // connectivity lost
    1101,  // connectivity restored, data lost
    1102,  // connectivity restored, data maintained
    2103,  // market data farm connection broken
    2104,  // market data farm connection OK
    2105,  // historical data farm connection broken
    2106,  // historical data farm connection OK
    2107,  // historical data farm inactive
    2108,  // market data farm inactive
    2157,  // sec-def data farm connection broken
    2158,  // sec-def data farm connection OK
];

pub fn is_benign_error(code: i32) -> bool {
    BENIGN_ERROR_CODES.contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_families() {
        assert_eq!(StatusClass::of("Filled"), StatusClass::Filled);
        assert_eq!(StatusClass::of("Cancelled"), StatusClass::Cancelled);
        assert_eq!(StatusClass::of("ApiCancelled"), StatusClass::Cancelled);
        assert_eq!(StatusClass::of("PendingCancel"), StatusClass::Cancelled);
        assert_eq!(StatusClass::of("Submitted"), StatusClass::Working);
        assert_eq!(StatusClass::of("PreSubmitted"), StatusClass::Working);
        assert_eq!(StatusClass::of("Inactive"), StatusClass::Working);
    }

    #[test]
    fn benign_codes_are_filtered() {
        assert!(is_benign_error(202));
        assert!(is_benign_error(10148));
        assert!(is_benign_error(2104));
        assert!(!is_benign_error(201)); // order rejected
        assert!(!is_benign_error(504)); // not connected
    }
}
