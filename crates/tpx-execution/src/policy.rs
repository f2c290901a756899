//! Pricing / exchange policy.
//!
//! Pure functions only: no state beyond the immutable override table, no IO.
//!
//! Prices stay in [`Decimal`] from signal parsing to the broker wire so the
//! take-profit target is rounded exactly once, half-up at two decimal places.
//! Binary-float truncation (`Math.round(x * 100) / 100` style) is never used.

use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places of the take-profit limit price (cents).
pub const PRICE_DP: u32 = 2;

/// Per-symbol venue routing rules.
///
/// A symbol listed in the override table always routes to its override venue;
/// every other symbol uses the adapter's default venue.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VenuePolicy {
    overrides: BTreeMap<String, String>,
}

impl VenuePolicy {
    pub fn new<I, S, V>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<String>,
    {
        Self {
            overrides: overrides
                .into_iter()
                .map(|(s, v)| (s.into().to_ascii_uppercase(), v.into()))
                .collect(),
        }
    }

    /// Venue for `symbol`: the override if one exists, else `default_venue`.
    pub fn resolve_venue(&self, symbol: &str, default_venue: &str) -> String {
        self.overrides
            .get(&symbol.to_ascii_uppercase())
            .cloned()
            .unwrap_or_else(|| default_venue.to_string())
    }

    pub fn overrides(&self) -> &BTreeMap<String, String> {
        &self.overrides
    }
}

/// Take-profit limit price: `round(avg_fill_price * (1 + margin_rate), 2)`,
/// rounding midpoints away from zero (half-up for positive prices).
///
/// `None` when the product does not fit in a [`Decimal`].
pub fn compute_sell_target(avg_fill_price: Decimal, margin_rate: Decimal) -> Option<Decimal> {
    let factor = Decimal::ONE.checked_add(margin_rate)?;
    avg_fill_price
        .checked_mul(factor)
        .map(|p| p.round_dp_with_strategy(PRICE_DP, RoundingStrategy::MidpointAwayFromZero))
}
