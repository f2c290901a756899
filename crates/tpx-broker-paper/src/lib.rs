//! Deterministic in-memory "paper" broker adapter.
//!
//! Design decisions (kept simple and deterministic):
//! - Order ids are handed out sequentially from 1. `request_ids` reports the
//!   next unused id; `place_order` advances past whatever id it was given.
//! - Every command answers synchronously by enqueuing the same callbacks a
//!   live gateway would send, in the same order.
//! - [`FillMode::Immediate`] fills the whole order at its limit price inside
//!   `place_order`. [`FillMode::Never`] leaves it working until cancelled or
//!   executed by hand with [`PaperBroker::execute`].
//! - The clock is the wall clock unless pinned with
//!   [`PaperBroker::with_fixed_time`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use tpx_execution::{
    BrokerAdapter, BrokerCommand, BrokerEvent, BrokerEventSender, BrokerResult, ContractSpec,
    OrderId, OrderSpec, OrderStatusUpdate, Side,
};

/// Error code a gateway uses for a reused order id.
pub const CODE_DUPLICATE_ORDER_ID: i32 = 103;
/// Error code for cancelling an id the broker does not know.
pub const CODE_CANCEL_NOT_FOUND: i32 = 10147;

pub const PAPER_ACCOUNT: &str = "PAPER";

// ---------------------------------------------------------------------------
// FillMode
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FillMode {
    #[default]
    Immediate,
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFillMode(pub String);

impl fmt::Display for UnknownFillMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown paper fill mode '{}' (expected immediate|never)", self.0)
    }
}

impl std::error::Error for UnknownFillMode {}

impl FromStr for FillMode {
    type Err = UnknownFillMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(FillMode::Immediate),
            "never" => Ok(FillMode::Never),
            other => Err(UnknownFillMode(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Book
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaperOrder {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub filled: i64,
    pub limit_price: Decimal,
}

impl PaperOrder {
    pub fn remaining(&self) -> i64 {
        self.quantity - self.filled
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaperPosition {
    /// Signed share count.
    pub quantity: i64,
    pub avg_cost: Decimal,
}

pub struct PaperBroker {
    events: BrokerEventSender,
    fill_mode: FillMode,
    account: String,
    connected: bool,
    next_id: OrderId,
    fixed_time: Option<i64>,
    working: BTreeMap<OrderId, PaperOrder>,
    positions: BTreeMap<String, PaperPosition>,
    commands: Vec<BrokerCommand>,
}

impl PaperBroker {
    pub fn new(events: BrokerEventSender, fill_mode: FillMode) -> Self {
        Self {
            events,
            fill_mode,
            account: PAPER_ACCOUNT.to_string(),
            connected: false,
            next_id: 1,
            fixed_time: None,
            working: BTreeMap::new(),
            positions: BTreeMap::new(),
            commands: Vec::new(),
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    pub fn with_fixed_time(mut self, epoch_secs: i64) -> Self {
        self.fixed_time = Some(epoch_secs);
        self
    }

    /// Seed a position for scenario setup.
    pub fn set_position(&mut self, symbol: impl Into<String>, quantity: i64, avg_cost: Decimal) {
        let symbol = symbol.into().to_ascii_uppercase();
        if quantity == 0 {
            self.positions.remove(&symbol);
        } else {
            self.positions
                .insert(symbol, PaperPosition { quantity, avg_cost });
        }
    }

    pub fn fill_mode(&self) -> FillMode {
        self.fill_mode
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Deterministic listing: BTreeMap iteration order is stable.
    pub fn working_orders(&self) -> Vec<PaperOrder> {
        self.working.values().cloned().collect()
    }

    pub fn positions(&self) -> &BTreeMap<String, PaperPosition> {
        &self.positions
    }

    pub fn commands(&self) -> &[BrokerCommand] {
        &self.commands
    }

    /// Execute `quantity` shares of a working order at its limit price.
    /// Completing the order reports `Filled` and removes it from the book.
    ///
    /// Returns `false` if no such working order exists.
    pub fn execute(&mut self, order_id: OrderId, quantity: i64) -> bool {
        let Some(order) = self.working.get_mut(&order_id) else {
            return false;
        };
        let qty = quantity.clamp(0, order.remaining());
        order.filled += qty;
        let order = order.clone();
        self.apply_fill(&order.symbol, order.side, qty, order.limit_price);

        if order.remaining() == 0 {
            self.working.remove(&order_id);
            self.emit_status(&order, "Filled");
        } else {
            self.emit_status(&order, "Submitted");
        }
        true
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn emit(&self, ev: BrokerEvent) {
        if !self.events.send(ev) {
            debug!("paper broker event dropped: controller stopped");
        }
    }

    fn emit_status(&self, order: &PaperOrder, status: &str) {
        let avg_fill_price = if order.filled > 0 {
            order.limit_price
        } else {
            Decimal::ZERO
        };
        self.emit(BrokerEvent::OrderStatus(OrderStatusUpdate {
            order_id: order.order_id,
            status: status.to_string(),
            filled: order.filled,
            remaining: order.remaining(),
            avg_fill_price,
        }));
    }

    fn apply_fill(&mut self, symbol: &str, side: Side, qty: i64, price: Decimal) {
        if qty == 0 {
            return;
        }
        let signed = match side {
            Side::Buy => qty,
            Side::Sell => -qty,
        };
        let pos = self
            .positions
            .entry(symbol.to_string())
            .or_insert(PaperPosition {
                quantity: 0,
                avg_cost: Decimal::ZERO,
            });

        let new_qty = pos.quantity + signed;
        if pos.quantity == 0 || pos.quantity.signum() == signed.signum() {
            // Opening or adding: weighted average cost.
            let total = pos
                .avg_cost
                .checked_mul(Decimal::from(pos.quantity.abs()))
                .zip(price.checked_mul(Decimal::from(qty)))
                .and_then(|(held, added)| held.checked_add(added));
            pos.avg_cost = match total.and_then(|t| t.checked_div(Decimal::from(new_qty.abs()))) {
                Some(avg) => avg,
                None => {
                    warn!(%symbol, %price, qty, "average cost overflowed; using fill price");
                    price
                }
            };
        } else if new_qty != 0 && new_qty.signum() != pos.quantity.signum() {
            // Flipped through flat: remainder opened at this price.
            pos.avg_cost = price;
        }
        pos.quantity = new_qty;

        if new_qty == 0 {
            self.positions.remove(symbol);
        }
    }

    fn now(&self) -> i64 {
        self.fixed_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp())
    }

    fn require_connected(&self) -> BrokerResult {
        if self.connected {
            Ok(())
        } else {
            Err("paper broker: not connected".into())
        }
    }
}

// ---------------------------------------------------------------------------
// BrokerAdapter
// ---------------------------------------------------------------------------

impl BrokerAdapter for PaperBroker {
    fn connect(&mut self) -> BrokerResult {
        self.commands.push(BrokerCommand::Connect);
        self.connected = true;
        info!(account = %self.account, fill_mode = ?self.fill_mode, "paper broker connected");
        // Gateways announce the first usable id on connect.
        self.emit(BrokerEvent::NextValidId(self.next_id));
        Ok(())
    }

    fn request_current_time(&mut self) -> BrokerResult {
        self.commands.push(BrokerCommand::RequestCurrentTime);
        self.require_connected()?;
        self.emit(BrokerEvent::CurrentTime(self.now()));
        Ok(())
    }

    fn request_ids(&mut self, count: u32) -> BrokerResult {
        self.commands.push(BrokerCommand::RequestIds(count));
        self.require_connected()?;
        self.emit(BrokerEvent::NextValidId(self.next_id));
        Ok(())
    }

    fn request_positions(&mut self) -> BrokerResult {
        self.commands.push(BrokerCommand::RequestPositions);
        self.require_connected()?;
        for (symbol, pos) in &self.positions {
            self.emit(BrokerEvent::Position {
                account: self.account.clone(),
                symbol: symbol.clone(),
                size: Decimal::from(pos.quantity),
                avg_cost: pos.avg_cost,
            });
        }
        self.emit(BrokerEvent::PositionEnd);
        Ok(())
    }

    fn request_open_orders(&mut self) -> BrokerResult {
        self.commands.push(BrokerCommand::RequestOpenOrders);
        self.require_connected()?;
        for order in self.working.values() {
            self.emit(BrokerEvent::OpenOrder {
                order_id: order.order_id,
                symbol: order.symbol.clone(),
                side: order.side,
                quantity: order.quantity,
            });
        }
        self.emit(BrokerEvent::OpenOrderEnd);
        Ok(())
    }

    fn place_order(
        &mut self,
        order_id: OrderId,
        contract: &ContractSpec,
        order: &OrderSpec,
    ) -> BrokerResult {
        self.commands.push(BrokerCommand::PlaceOrder {
            order_id,
            contract: contract.clone(),
            order: order.clone(),
        });
        self.require_connected()?;

        if order_id < self.next_id {
            self.emit(BrokerEvent::Error {
                code: CODE_DUPLICATE_ORDER_ID,
                req_id: Some(order_id),
                message: "Duplicate order id".to_string(),
            });
            return Ok(());
        }
        self.next_id = order_id + 1;

        let paper = PaperOrder {
            order_id,
            symbol: contract.symbol.clone(),
            side: order.action,
            quantity: order.quantity,
            filled: 0,
            limit_price: order.limit_price,
        };
        debug!(
            order_id,
            symbol = %paper.symbol,
            side = %paper.side,
            quantity = paper.quantity,
            limit = %paper.limit_price,
            exchange = %contract.exchange,
            "paper order accepted"
        );
        self.emit_status(&paper, "Submitted");
        self.working.insert(order_id, paper);

        if self.fill_mode == FillMode::Immediate {
            self.execute(order_id, order.quantity);
        }
        Ok(())
    }

    fn cancel_order(&mut self, order_id: OrderId) -> BrokerResult {
        self.commands.push(BrokerCommand::CancelOrder(order_id));
        self.require_connected()?;

        match self.working.remove(&order_id) {
            Some(order) => {
                debug!(order_id, filled = order.filled, "paper order cancelled");
                self.emit_status(&order, "Cancelled");
            }
            None => self.emit(BrokerEvent::Error {
                code: CODE_CANCEL_NOT_FOUND,
                req_id: Some(order_id),
                message: format!("OrderId {order_id} that needs to be cancelled is not found."),
            }),
        }
        Ok(())
    }
}
