//! Pure position-value, PnL, and margin formulas.
//!
//! Deterministic, side-effect-free functions shared by the position tracker
//! and the session reporter. Ported from `gridcore.pnl` (referenced by
//! `position_tracker.py` but not present in the kept source set) using the
//! formulas as specified.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::position::Direction;
use crate::risk_limits::TierTable;

pub fn position_value(size: Decimal, entry_price: Decimal) -> Decimal {
    size * entry_price
}

/// Linear unrealized PnL: long = `(current - entry) * size`, short mirrored.
pub fn unrealized_pnl(direction: Direction, entry: Decimal, current: Decimal, size: Decimal) -> Decimal {
    match direction {
        Direction::Long => (current - entry) * size,
        Direction::Short => (entry - current) * size,
    }
}

/// ROE percentage: long = `(1/entry - 1/current) * entry * 100 * leverage`, short mirrored.
pub fn unrealized_pnl_pct(direction: Direction, entry: Decimal, current: Decimal, leverage: Decimal) -> Decimal {
    if entry.is_zero() || current.is_zero() {
        return Decimal::ZERO;
    }
    let inv_entry = Decimal::ONE / entry;
    let inv_current = Decimal::ONE / current;
    let factor = match direction {
        Direction::Long => inv_entry - inv_current,
        Direction::Short => inv_current - inv_entry,
    };
    factor * entry * dec!(100) * leverage
}

/// `IM = pv * max(tier.imr_rate, 1/leverage)`. Returns `(IM, effective_imr_rate)`.
pub fn initial_margin(pv: Decimal, leverage: Decimal, tiers: &TierTable) -> (Decimal, Decimal) {
    if leverage.is_zero() {
        return (Decimal::ZERO, Decimal::ZERO);
    }
    let tier = tiers.select(pv).unwrap_or_else(|| tiers.select(Decimal::MAX).unwrap());
    let imr = tier.imr_rate.max(Decimal::ONE / leverage);
    (pv * imr, imr)
}

/// `MM = pv * mmr_rate - mm_deduction`. Returns `(MM, mmr_rate)`.
pub fn maintenance_margin(pv: Decimal, tiers: &TierTable) -> (Decimal, Decimal) {
    let tier = tiers.select(pv).unwrap_or_else(|| tiers.select(Decimal::MAX).unwrap());
    let mm = pv * tier.mmr_rate - tier.mm_deduction;
    (mm, tier.mmr_rate)
}

/// `funding = size * mark * rate`; long pays when rate > 0, short receives.
/// Returns the signed payment (negative = paid, positive = received).
pub fn funding_snapshot(direction: Direction, size: Decimal, mark_price: Decimal, rate: Decimal) -> Decimal {
    if size.is_zero() {
        return Decimal::ZERO;
    }
    let notional = size * mark_price;
    let funding = notional * rate;
    match direction {
        Direction::Long => -funding,
        Direction::Short => funding,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk_limits::tiers::RiskLimitTier;

    fn flat_tiers() -> TierTable {
        TierTable(vec![RiskLimitTier {
            max_notional: Decimal::MAX,
            mmr_rate: dec!(0.01),
            mm_deduction: Decimal::ZERO,
            imr_rate: dec!(0.02),
        }])
    }

    #[test]
    fn unrealized_pnl_long_and_short_mirror() {
        let long = unrealized_pnl(Direction::Long, dec!(100), dec!(110), dec!(2));
        let short = unrealized_pnl(Direction::Short, dec!(100), dec!(110), dec!(2));
        assert_eq!(long, dec!(20));
        assert_eq!(short, dec!(-20));
    }

    #[test]
    fn initial_margin_uses_max_of_tier_and_leverage_floor() {
        let tiers = flat_tiers();
        let (im, imr) = initial_margin(dec!(1000), dec!(10), &tiers);
        // tier imr 0.02 vs 1/10 = 0.1: effective imr is 0.1
        assert_eq!(imr, dec!(0.1));
        assert_eq!(im, dec!(100));
    }

    #[test]
    fn maintenance_margin_applies_deduction() {
        let tiers = TierTable::hardcoded_btcusdt();
        let (mm, mmr) = maintenance_margin(dec!(5_000_000), &tiers);
        assert_eq!(mmr, dec!(0.01));
        assert_eq!(mm, dec!(5_000_000) * dec!(0.01) - dec!(22_000));
    }

    #[test]
    fn funding_long_pays_short_receives() {
        let long = funding_snapshot(Direction::Long, dec!(1), dec!(100), dec!(0.0001));
        let short = funding_snapshot(Direction::Short, dec!(1), dec!(100), dec!(0.0001));
        assert_eq!(long, dec!(-0.01));
        assert_eq!(short, dec!(0.01));
    }

    #[test]
    fn funding_on_zero_size_is_zero() {
        assert_eq!(funding_snapshot(Direction::Long, Decimal::ZERO, dec!(100), dec!(0.0001)), Decimal::ZERO);
    }
}
