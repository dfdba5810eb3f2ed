//! Pure money arithmetic shared by the workers.
//!
//! Kept free of I/O so the tolerance and gain rules are testable in
//! isolation (including property tests).

use rust_decimal::{Decimal, RoundingStrategy};

/// Quote value of an order.
#[must_use]
pub fn order_value(price: Decimal, quantity: Decimal) -> Decimal {
    price * quantity
}

/// Base quantity purchasable with `capital_fraction` of `available` at
/// `price`, rounded down to `scale` decimal places.
///
/// `None` when the price is not positive.
#[must_use]
pub fn quantity_for_capital(
    available: Decimal,
    capital_fraction: Decimal,
    price: Decimal,
    scale: u32,
) -> Option<Decimal> {
    if price <= Decimal::ZERO {
        return None;
    }
    let quantity = (available * capital_fraction)
        .checked_div(price)?
        .round_dp_with_strategy(scale, RoundingStrategy::ToZero);
    Some(quantity)
}

/// Whether a summed fill quantity counts as a full fill of `reference_qty`.
///
/// Inclusive at the boundary: a fill of exactly `tolerance` (e.g. 99.0%) is
/// accepted.
#[must_use]
pub fn fill_meets_tolerance(
    total_filled: Decimal,
    reference_qty: Decimal,
    tolerance: Decimal,
) -> bool {
    total_filled >= reference_qty * tolerance
}

/// Whether an available balance covers `required` within `tolerance`
/// (compensates venue-side rounding; e.g. 0.001 = 0.1%).
#[must_use]
pub fn balance_covers(available: Decimal, required: Decimal, tolerance: Decimal) -> bool {
    available >= required * (Decimal::ONE - tolerance)
}

/// Net realized gain in quote units.
#[must_use]
pub fn realized_gain(gross_quote: Decimal, buy_cost: Decimal, fees_quote: Decimal) -> Decimal {
    gross_quote - buy_cost - fees_quote
}

/// Gain as a percentage of the buy cost. `None` for a zero cost basis.
#[must_use]
pub fn gain_percent(gain_quote: Decimal, buy_cost: Decimal) -> Option<Decimal> {
    if buy_cost <= Decimal::ZERO {
        return None;
    }
    gain_quote
        .checked_div(buy_cost)
        .map(|r| r * Decimal::ONE_HUNDRED)
}
