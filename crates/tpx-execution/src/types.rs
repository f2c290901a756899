use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Broker-assigned order identifier (`nextValidId` sequence).
pub type OrderId = i64;

/// Highest limit price a buy signal may carry.
pub const MAX_SIGNAL_PRICE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

// ---------------------------------------------------------------------------
// OrderSequence
// ---------------------------------------------------------------------------

/// The buy signal for one trading cycle.
///
/// Parsed once from `"b SYMBOL QTY PRICE"`. After the BUY fills, `price` is
/// overwritten with the average fill price (and `quantity` with the filled
/// quantity on a partial fill) so the SELL leg is computed from what was
/// actually bought.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSequence {
    pub symbol: String,
    pub quantity: i64,
    pub price: Decimal,
}

/// Returns `true` when the first token of `message` is the buy marker `b`.
///
/// Anything else is not a trading signal at all (the gateway relays those to
/// the notification sink).
pub fn is_buy_signal(message: &str) -> bool {
    message
        .split_whitespace()
        .next()
        .map(|t| t.eq_ignore_ascii_case("b"))
        .unwrap_or(false)
}

/// Why a buy signal could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    Empty,
    NotABuy(String),
    WrongArity(usize),
    BadQuantity(String),
    BadPrice(String),
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalError::Empty => write!(f, "empty signal"),
            SignalError::NotABuy(tok) => write!(f, "signal must start with 'b', got '{tok}'"),
            SignalError::WrongArity(n) => write!(
                f,
                "signal must be 'b <SYMBOL> <QTY> <PRICE>' (4 tokens), got {n} token(s)"
            ),
            SignalError::BadQuantity(q) => write!(f, "quantity must be a positive integer: '{q}'"),
            SignalError::BadPrice(p) => write!(
                f,
                "price must be a positive decimal no greater than {MAX_SIGNAL_PRICE}: '{p}'"
            ),
        }
    }
}

impl std::error::Error for SignalError {}

impl FromStr for OrderSequence {
    type Err = SignalError;

    fn from_str(message: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = message.split_whitespace().collect();
        let first = tokens.first().ok_or(SignalError::Empty)?;
        if !first.eq_ignore_ascii_case("b") {
            return Err(SignalError::NotABuy(first.to_string()));
        }
        if tokens.len() != 4 {
            return Err(SignalError::WrongArity(tokens.len()));
        }

        let symbol = tokens[1].to_ascii_uppercase();

        let quantity = tokens[2]
            .parse::<i64>()
            .ok()
            .filter(|q| *q > 0)
            .ok_or_else(|| SignalError::BadQuantity(tokens[2].to_string()))?;

        let price = Decimal::from_str(tokens[3])
            .ok()
            .filter(|p| p.is_sign_positive() && !p.is_zero() && *p <= MAX_SIGNAL_PRICE)
            .ok_or_else(|| SignalError::BadPrice(tokens[3].to_string()))?;

        Ok(Self {
            symbol,
            quantity,
            price,
        })
    }
}

// ---------------------------------------------------------------------------
// Order wire shapes handed to the broker adapter
// ---------------------------------------------------------------------------

/// Instrument description for a place-order command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    pub symbol: String,
    /// Always `"STK"`; the controller only trades common stock.
    pub sec_type: String,
    pub exchange: String,
    pub currency: String,
}

impl ContractSpec {
    pub fn stock(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            sec_type: "STK".to_string(),
            exchange: exchange.into(),
            currency: "USD".to_string(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "LMT")]
    Limit,
}

/// Limit order parameters for a place-order command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub action: Side,
    pub order_type: OrderType,
    pub limit_price: Decimal,
    pub quantity: i64,
    pub account: Option<String>,
}

impl OrderSpec {
    pub fn limit(action: Side, quantity: i64, limit_price: Decimal, account: Option<String>) -> Self {
        debug_assert!(quantity > 0, "OrderSpec.quantity must be > 0");
        Self {
            action,
            order_type: OrderType::Limit,
            limit_price,
            quantity,
            account,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_well_formed_signal() {
        let seq: OrderSequence = "b acme 100 10.00".parse().unwrap();
        assert_eq!(seq.symbol, "ACME");
        assert_eq!(seq.quantity, 100);
        assert_eq!(seq.price, dec!(10.00));
    }

    #[test]
    fn tolerates_extra_whitespace_and_upper_marker() {
        let seq: OrderSequence = "  B  SPCE   25  18.5 ".parse().unwrap();
        assert_eq!(seq.symbol, "SPCE");
        assert_eq!(seq.quantity, 25);
        assert_eq!(seq.price, dec!(18.5));
    }

    #[test]
    fn rejects_malformed_signals() {
        assert_eq!("".parse::<OrderSequence>(), Err(SignalError::Empty));
        assert_eq!(
            "s ACME 1 1".parse::<OrderSequence>(),
            Err(SignalError::NotABuy("s".to_string()))
        );
        assert_eq!(
            "b ACME 100".parse::<OrderSequence>(),
            Err(SignalError::WrongArity(3))
        );
        assert!(matches!(
            "b ACME 0 10".parse::<OrderSequence>(),
            Err(SignalError::BadQuantity(_))
        ));
        assert!(matches!(
            "b ACME 1.5 10".parse::<OrderSequence>(),
            Err(SignalError::BadQuantity(_))
        ));
        assert!(matches!(
            "b ACME 10 -3".parse::<OrderSequence>(),
            Err(SignalError::BadPrice(_))
        ));
        assert!(matches!(
            "b ACME 10 ten".parse::<OrderSequence>(),
            Err(SignalError::BadPrice(_))
        ));
    }

    #[test]
    fn rejects_prices_above_the_ceiling() {
        assert!(matches!(
            "b ACME 1 79228162514264337593543950335".parse::<OrderSequence>(),
            Err(SignalError::BadPrice(_))
        ));
        assert!(matches!(
            "b ACME 1 1000000.01".parse::<OrderSequence>(),
            Err(SignalError::BadPrice(_))
        ));
        let at_cap: OrderSequence = "b ACME 1 1000000".parse().unwrap();
        assert_eq!(at_cap.price, MAX_SIGNAL_PRICE);
    }

    #[test]
    fn buy_marker_detection() {
        assert!(is_buy_signal("b ACME 1 1"));
        assert!(is_buy_signal("B"));
        assert!(!is_buy_signal("buy ACME 1 1"));
        assert!(!is_buy_signal("market looks hot"));
        assert!(!is_buy_signal("   "));
    }
}
