//! Risk-limit tier table: tiered `(max_notional, mmr_rate, mm_deduction,
//! imr_rate)` rows, plus the tier-selection rule used by the margin math.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A single maintenance-margin bracket for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLimitTier {
    /// Upper notional bound for this bracket. The last tier's bound is
    /// treated as unbounded by callers (selection always falls through to
    /// it if no earlier tier matches).
    pub max_notional: Decimal,
    pub mmr_rate: Decimal,
    pub mm_deduction: Decimal,
    pub imr_rate: Decimal,
}

/// Ordered tier table for one symbol. Tiers must be sorted ascending by
/// `max_notional`; the caller that constructs one is responsible for that
/// invariant (this type does not re-sort, to keep tier selection a pure,
/// allocation-free scan).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTable(pub Vec<RiskLimitTier>);

impl TierTable {
    /// Select the first tier whose `max_notional >= position_value`,
    /// falling back to the last tier if `position_value` exceeds every
    /// bound (the table's last entry is conceptually unbounded).
    pub fn select(&self, position_value: Decimal) -> Option<RiskLimitTier> {
        self.0
            .iter()
            .find(|t| t.max_notional >= position_value)
            .or_else(|| self.0.last())
            .copied()
    }

    /// A conservative built-in table used when no cache, no API response,
    /// and no symbol-specific hardcoded table is available.
    pub fn default_table() -> Self {
        TierTable(vec![RiskLimitTier {
            max_notional: Decimal::MAX,
            mmr_rate: dec!(0.01),
            mm_deduction: Decimal::ZERO,
            imr_rate: dec!(0.02),
        }])
    }

    /// The hardcoded 7-tier BTCUSDT table (scenario 6 in the validation
    /// suite returns exactly this shape when no cache or API is available).
    pub fn hardcoded_btcusdt() -> Self {
        TierTable(vec![
            tier(dec!(2_000_000), dec!(0.004), dec!(0), dec!(0.01)),
            tier(dec!(4_000_000), dec!(0.005), dec!(2_000), dec!(0.0125)),
            tier(dec!(6_000_000), dec!(0.01), dec!(22_000), dec!(0.02)),
            tier(dec!(8_000_000), dec!(0.015), dec!(52_000), dec!(0.025)),
            tier(dec!(10_000_000), dec!(0.02), dec!(92_000), dec!(0.03)),
            tier(dec!(12_000_000), dec!(0.025), dec!(142_000), dec!(0.04)),
            tier(Decimal::MAX, dec!(0.05), dec!(392_000), dec!(0.05)),
        ])
    }
}

fn tier(max_notional: Decimal, mmr_rate: Decimal, mm_deduction: Decimal, imr_rate: Decimal) -> RiskLimitTier {
    RiskLimitTier { max_notional, mmr_rate, mm_deduction, imr_rate }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_first_covering_tier() {
        let tiers = TierTable::hardcoded_btcusdt();
        let selected = tiers.select(dec!(3_000_000)).unwrap();
        assert_eq!(selected.mmr_rate, dec!(0.005));
    }

    #[test]
    fn falls_back_to_last_tier_when_unbounded() {
        let tiers = TierTable::hardcoded_btcusdt();
        let selected = tiers.select(dec!(50_000_000)).unwrap();
        assert_eq!(selected.mmr_rate, dec!(0.05));
    }

    #[test]
    fn selection_is_idempotent() {
        let tiers = TierTable::hardcoded_btcusdt();
        assert_eq!(tiers.select(dec!(5_000_000)), tiers.select(dec!(5_000_000)));
    }
}
