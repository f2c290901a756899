//! Notification seam.
//!
//! The controller hands notifications to a [`Notifier`] and moves on. Sinks
//! must not block and must swallow (log) their own delivery failures.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::OrderId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// A take-profit SELL filled.
    Win {
        symbol: String,
        quantity: i64,
        bought_at: Decimal,
        sold_at: Decimal,
        win_count: u32,
        daily_win_cap: u32,
    },
    DailyCapReached { win_count: u32 },
    /// The BUY leg did not fill and the cycle was abandoned.
    BuyAborted {
        symbol: String,
        order_id: Option<OrderId>,
        reason: String,
    },
    /// The take-profit SELL was cancelled before filling.
    SellCancelled {
        symbol: String,
        order_id: OrderId,
        filled: i64,
    },
    /// The take-profit SELL could not be handed to the broker.
    SellNotPlaced { symbol: String, reason: String },
    BrokerWarning { code: i32, message: String },
    /// Free-form message relayed from the control gateway.
    Relay { message: String },
}

impl Notification {
    /// Human-readable text for SMS-style sinks.
    pub fn body(&self) -> String {
        match self {
            Notification::Win {
                symbol,
                quantity,
                bought_at,
                sold_at,
                win_count,
                daily_win_cap,
            } => format!(
                "WIN {win_count}/{daily_win_cap}: {symbol} x{quantity} bought @ {bought_at}, sold @ {sold_at}"
            ),
            Notification::DailyCapReached { win_count } => {
                format!("Daily cap reached after {win_count} win(s); buying disabled")
            }
            Notification::BuyAborted {
                symbol,
                order_id,
                reason,
            } => match order_id {
                Some(id) => format!("LOSS/ABORT: {symbol} buy #{id} abandoned ({reason})"),
                None => format!("LOSS/ABORT: {symbol} buy abandoned ({reason})"),
            },
            Notification::SellCancelled {
                symbol,
                order_id,
                filled,
            } => format!(
                "WARNING: {symbol} take-profit #{order_id} cancelled after {filled} filled; position needs attention"
            ),
            Notification::SellNotPlaced { symbol, reason } => {
                format!("WARNING: {symbol} take-profit not placed: {reason}")
            }
            Notification::BrokerWarning { code, message } => {
                format!("WARNING: broker error {code}: {message}")
            }
            Notification::Relay { message } => message.clone(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, note: Notification);
}

impl<N: Notifier + ?Sized> Notifier for std::sync::Arc<N> {
    fn notify(&self, note: Notification) {
        (**self).notify(note)
    }
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn notify(&self, note: Notification) {
        (**self).notify(note)
    }
}
