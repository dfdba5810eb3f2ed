//! Property-based tests for the money arithmetic behind sizing, tolerance
//! checks, and realized-gain computation.

use proptest::prelude::*;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use paircycler::workers::math;

fn decimal_in(range: std::ops::Range<f64>) -> impl Strategy<Value = Decimal> {
    range.prop_filter_map("representable as Decimal", |f| Decimal::from_f64(f))
}

proptest! {
    /// The computed quantity never commits more than the requested capital
    /// fraction of the available balance.
    #[test]
    fn quantity_never_exceeds_capital_fraction(
        available in decimal_in(1.0..1_000_000.0),
        fraction in decimal_in(0.001..0.5),
        price in decimal_in(100.0..500_000.0),
    ) {
        let quantity = math::quantity_for_capital(available, fraction, price, 8).unwrap();
        prop_assert!(quantity >= Decimal::ZERO);
        // Rounding is toward zero, so cost stays within the budget
        prop_assert!(math::order_value(price, quantity) <= available * fraction);
    }

    /// Truncation loses at most one quantum of quantity at the venue scale.
    #[test]
    fn quantity_truncation_is_bounded(
        available in decimal_in(1.0..1_000_000.0),
        fraction in decimal_in(0.001..0.5),
        price in decimal_in(100.0..500_000.0),
    ) {
        let quantity = math::quantity_for_capital(available, fraction, price, 8).unwrap();
        let exact = (available * fraction) / price;
        prop_assert!(exact - quantity < dec!(0.00000001));
    }

    /// A fill at or above the tolerance fraction is accepted, below it is
    /// rejected; the boundary itself is inclusive.
    #[test]
    fn fill_tolerance_threshold_is_sharp(
        requested in decimal_in(0.0001..10.0),
        tolerance in decimal_in(0.5..1.0),
    ) {
        let threshold = requested * tolerance;
        prop_assert!(math::fill_meets_tolerance(threshold, requested, tolerance));
        prop_assert!(math::fill_meets_tolerance(requested, requested, tolerance));
        let below = threshold - dec!(0.0000000001);
        prop_assert!(!math::fill_meets_tolerance(below, requested, tolerance));
    }

    /// Balance coverage is monotonic in the available amount.
    #[test]
    fn balance_coverage_is_monotonic(
        required in decimal_in(0.0001..10.0),
        tolerance in decimal_in(0.0..0.01),
        extra in decimal_in(0.0..1.0),
    ) {
        let floor = required * (Decimal::ONE - tolerance);
        prop_assert!(math::balance_covers(floor, required, tolerance));
        prop_assert!(math::balance_covers(floor + extra, required, tolerance));
        if extra > Decimal::ZERO {
            prop_assert!(!math::balance_covers(floor - extra, required, tolerance));
        }
    }

    /// Realized gain decomposes exactly: gross minus cost minus fees, and
    /// the percent figure is consistent with the quote figure.
    #[test]
    fn realized_gain_is_exact_and_consistent(
        quantity in decimal_in(0.0001..1.0),
        buy_price in decimal_in(1000.0..200_000.0),
        sell_price in decimal_in(1000.0..200_000.0),
        fees in decimal_in(0.0..10.0),
    ) {
        let gross = sell_price * quantity;
        let cost = buy_price * quantity;
        let gain = math::realized_gain(gross, cost, fees);
        prop_assert_eq!(gain + cost + fees, gross);

        let percent = math::gain_percent(gain, cost).unwrap();
        // Same sign, and zero exactly when the gain is zero
        prop_assert_eq!(percent.is_sign_negative() && !percent.is_zero(),
            gain.is_sign_negative() && !gain.is_zero());
        prop_assert_eq!(percent.is_zero(), gain.is_zero());
    }
}
