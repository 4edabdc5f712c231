//! Deterministic, content-addressed order identity.
//!
//! `client_order_id` is derived purely from the trading decision, not from a
//! clock or a counter: any path (live, backtest, replay) that reaches the
//! same decision produces the same 16-hex-character ID, which is what makes
//! cross-path trade matching possible in the validation pipeline.

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use crate::decimal::canonical_string;
use crate::grid::GridSide;
use crate::position::Direction;

/// Derive the 16-hex-character `client_order_id` for a grid decision.
///
/// `price` must already be rounded to the symbol's tick size by the caller —
/// this function does not round, so that two callers rounding with different
/// tick sizes fail loudly rather than silently producing divergent IDs.
pub fn client_order_id(
    strat_id: &str,
    symbol: &str,
    side: GridSide,
    grid_level: i32,
    price_tick_aligned: Decimal,
    direction: Direction,
) -> String {
    let canonical = format!(
        "{strat_id}|{symbol}|{side}|{grid_level}|{price}|{direction}",
        side = side,
        price = canonical_string(price_tick_aligned),
        direction = direction,
    );
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn deterministic_across_invocations() {
        let a = client_order_id("btc_main", "BTCUSDT", GridSide::Buy, -1, dec!(99800.2), Direction::Long);
        let b = client_order_id("btc_main", "BTCUSDT", GridSide::Buy, -1, dec!(99800.2), Direction::Long);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn differs_on_any_input_change() {
        let base = client_order_id("btc_main", "BTCUSDT", GridSide::Buy, -1, dec!(99800.2), Direction::Long);
        let diff_level = client_order_id("btc_main", "BTCUSDT", GridSide::Buy, -2, dec!(99800.2), Direction::Long);
        let diff_side = client_order_id("btc_main", "BTCUSDT", GridSide::Sell, -1, dec!(99800.2), Direction::Long);
        let diff_dir = client_order_id("btc_main", "BTCUSDT", GridSide::Buy, -1, dec!(99800.2), Direction::Short);
        assert_ne!(base, diff_level);
        assert_ne!(base, diff_side);
        assert_ne!(base, diff_dir);
    }
}
