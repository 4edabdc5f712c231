//! Operational tool: compares the hardcoded tier tables against freshly
//! fetched API tables and reports fields that drifted beyond a threshold.
//!
//! Not part of the runtime resolution path — run by the tier-drift-monitor
//! binary on a schedule, not by the trading core.

use rust_decimal::Decimal;
use serde::Serialize;

use super::tiers::{RiskLimitTier, TierTable};

#[derive(Debug, Clone, Serialize)]
pub struct TierDrift {
    pub tier_index: usize,
    pub field: &'static str,
    pub hardcoded: Decimal,
    pub fetched: Decimal,
    pub relative_delta: Decimal,
}

/// Compare two tier tables field-by-field, skipping the unbounded
/// `max_notional` sentinel on the last tier of either table.
pub fn compare(hardcoded: &TierTable, fetched: &TierTable, threshold: Decimal) -> Vec<TierDrift> {
    let mut drifts = Vec::new();
    let len = hardcoded.0.len().min(fetched.0.len());

    for i in 0..len {
        let h = &hardcoded.0[i];
        let f = &fetched.0[i];
        check_field(i, "max_notional", h.max_notional, f.max_notional, threshold, &mut drifts);
        check_field(i, "mmr_rate", h.mmr_rate, f.mmr_rate, threshold, &mut drifts);
        check_field(i, "mm_deduction", h.mm_deduction, f.mm_deduction, threshold, &mut drifts);
        check_field(i, "imr_rate", h.imr_rate, f.imr_rate, threshold, &mut drifts);
    }

    drifts
}

fn check_field(
    tier_index: usize,
    field: &'static str,
    hardcoded: Decimal,
    fetched: Decimal,
    threshold: Decimal,
    drifts: &mut Vec<TierDrift>,
) {
    if hardcoded == Decimal::MAX || fetched == Decimal::MAX {
        return;
    }
    if hardcoded.is_zero() {
        if !fetched.is_zero() {
            drifts.push(TierDrift { tier_index, field, hardcoded, fetched, relative_delta: Decimal::MAX });
        }
        return;
    }
    let relative_delta = ((fetched - hardcoded) / hardcoded).abs();
    if relative_delta > threshold {
        drifts.push(TierDrift { tier_index, field, hardcoded, fetched, relative_delta });
    }
}

/// Kept for callers that want the raw tier pair alongside a drift report.
pub fn tier_pair(hardcoded: &TierTable, fetched: &TierTable, index: usize) -> Option<(RiskLimitTier, RiskLimitTier)> {
    Some((*hardcoded.0.get(index)?, *fetched.0.get(index)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn reports_drift_beyond_threshold() {
        let hardcoded = TierTable::hardcoded_btcusdt();
        let mut fetched = hardcoded.clone();
        fetched.0[0].mmr_rate = dec!(0.01);

        let drifts = compare(&hardcoded, &fetched, dec!(0.05));
        assert_eq!(drifts.len(), 1);
        assert_eq!(drifts[0].field, "mmr_rate");
    }

    #[test]
    fn skips_unbounded_max_notional() {
        let hardcoded = TierTable::hardcoded_btcusdt();
        let fetched = hardcoded.clone();
        let drifts = compare(&hardcoded, &fetched, dec!(0.0));
        assert!(drifts.is_empty());
    }
}
