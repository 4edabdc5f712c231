//! Equity curve comparison between a live wallet-balance series and a
//! backtest equity curve: resample both to a common time grid, then report
//! divergence and correlation over the overlap.

use rust_decimal::Decimal;

use crate::metrics::pearson_correlation;

pub type EquityPoint = (i64, Decimal);
/// `(bucket_start_ts, live_equity, backtest_equity)`; either side is `None`
/// when that curve had no point in the bucket.
pub type ResampledRow = (i64, Option<Decimal>, Option<Decimal>);

#[derive(Default)]
pub struct EquityComparator;

impl EquityComparator {
    pub fn new() -> Self {
        Self
    }

    /// Resample both curves onto buckets of width `interval_ms`, taking the
    /// last value observed within each bucket ("last value wins"); a bucket
    /// with no observation on one side carries `None` for that side.
    pub fn resample(&self, live: &[EquityPoint], backtest: &[EquityPoint], interval_ms: i64) -> Vec<ResampledRow> {
        if live.is_empty() && backtest.is_empty() {
            return Vec::new();
        }

        let start = live.iter().chain(backtest).map(|p| p.0).min().unwrap();
        let end = live.iter().chain(backtest).map(|p| p.0).max().unwrap();

        let mut resampled = Vec::new();
        let mut bucket_start = start;
        let mut live_idx = 0;
        let mut bt_idx = 0;

        while bucket_start <= end {
            let bucket_end = bucket_start + interval_ms;

            let mut live_val = None;
            while live_idx < live.len() && live[live_idx].0 < bucket_end {
                live_val = Some(live[live_idx].1);
                live_idx += 1;
            }

            let mut bt_val = None;
            while bt_idx < backtest.len() && backtest[bt_idx].0 < bucket_end {
                bt_val = Some(backtest[bt_idx].1);
                bt_idx += 1;
            }

            if live_val.is_some() || bt_val.is_some() {
                resampled.push((bucket_start, live_val, bt_val));
            }
            bucket_start = bucket_end;
        }

        resampled
    }

    /// `(max_divergence, mean_divergence, correlation)` over buckets where
    /// both curves have a value.
    pub fn compute_metrics(&self, resampled: &[ResampledRow]) -> (Decimal, Decimal, f64) {
        let overlapping: Vec<(Decimal, Decimal)> = resampled
            .iter()
            .filter_map(|(_, live, bt)| live.zip(*bt))
            .collect();

        if overlapping.is_empty() {
            return (Decimal::ZERO, Decimal::ZERO, 0.0);
        }

        let divergences: Vec<Decimal> = overlapping.iter().map(|(l, b)| (*b - *l).abs()).collect();
        let max_div = divergences.iter().copied().fold(Decimal::ZERO, Decimal::max);
        let mean_div = divergences.iter().sum::<Decimal>() / Decimal::from(divergences.len());

        use rust_decimal::prelude::ToPrimitive;
        let live_vals: Vec<f64> = overlapping.iter().map(|(l, _)| l.to_f64().unwrap_or(0.0)).collect();
        let bt_vals: Vec<f64> = overlapping.iter().map(|(_, b)| b.to_f64().unwrap_or(0.0)).collect();
        let correlation = pearson_correlation(&live_vals, &bt_vals);

        (max_div, mean_div, correlation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn resample_buckets_last_value_per_interval() {
        let live = vec![(0, dec!(100)), (30_000, dec!(105)), (70_000, dec!(110))];
        let backtest = vec![(0, dec!(100)), (65_000, dec!(108))];

        let comparator = EquityComparator::new();
        let resampled = comparator.resample(&live, &backtest, 60_000);

        assert_eq!(resampled.len(), 2);
        assert_eq!(resampled[0].1, Some(dec!(105)));
        assert_eq!(resampled[0].2, Some(dec!(100)));
        assert_eq!(resampled[1].1, Some(dec!(110)));
        assert_eq!(resampled[1].2, Some(dec!(108)));
    }

    #[test]
    fn compute_metrics_ignores_one_sided_buckets() {
        let resampled = vec![(0, Some(dec!(100)), Some(dec!(102))), (60_000, Some(dec!(50)), None)];
        let comparator = EquityComparator::new();
        let (max_div, mean_div, _corr) = comparator.compute_metrics(&resampled);
        assert_eq!(max_div, dec!(2));
        assert_eq!(mean_div, dec!(2));
    }

    #[test]
    fn compute_metrics_empty_overlap_is_zero() {
        let comparator = EquityComparator::new();
        let (max_div, mean_div, corr) = comparator.compute_metrics(&[]);
        assert_eq!(max_div, Decimal::ZERO);
        assert_eq!(mean_div, Decimal::ZERO);
        assert_eq!(corr, 0.0);
    }
}
