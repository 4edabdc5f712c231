//! Fixed-point decimal helpers shared by the grid engine, intent engine, and
//! instrument-info cache.
//!
//! All price/quantity/PnL arithmetic in this crate uses [`rust_decimal::Decimal`]
//! end to end; `f64` never enters the hot path. Rounding to an exchange's tick
//! size or quantity step rounds at the `Decimal` level (round-half-to-even),
//! never via an `f64` round-trip.

use rust_decimal::{Decimal, RoundingStrategy};

/// Round `price` to the nearest multiple of `tick_size`, half-to-even.
///
/// `tick_size <= 0` is treated as "no rounding" and returns `price` unchanged;
/// callers that need a hard failure on misconfiguration should validate
/// `tick_size` themselves before calling this.
pub fn round_to_tick(price: Decimal, tick_size: Decimal) -> Decimal {
    round_to_increment(price, tick_size)
}

/// Round `qty` to the nearest multiple of `qty_step`, half-to-even.
pub fn round_to_step(qty: Decimal, qty_step: Decimal) -> Decimal {
    round_to_increment(qty, qty_step)
}

fn round_to_increment(value: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO {
        return value;
    }
    let units = (value / increment).round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
    units * increment
}

/// Canonicalize a `Decimal` to a plain string with no exponent, trailing
/// zeros trimmed — used when building the `client_order_id` digest input so
/// that `100000` and `100000.00` hash identically once tick-rounded.
pub fn canonical_string(value: Decimal) -> String {
    value.normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_to_tick() {
        assert_eq!(round_to_tick(dec!(99800.23), dec!(0.1)), dec!(99800.2));
        assert_eq!(round_to_tick(dec!(99800.25), dec!(0.1)), dec!(99800.2));
        assert_eq!(round_to_tick(dec!(100000.0), dec!(0.1)), dec!(100000.0));
    }

    #[test]
    fn zero_tick_is_noop() {
        assert_eq!(round_to_tick(dec!(123.456), Decimal::ZERO), dec!(123.456));
    }

    #[test]
    fn canonical_string_trims_trailing_zeros() {
        assert_eq!(canonical_string(dec!(100000.00)), "100000");
        assert_eq!(canonical_string(dec!(99800.20)), "99800.2");
    }
}
