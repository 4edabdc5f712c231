//! Validation metrics computed over a [`MatchResult`]: coverage, per-trade
//! deltas, and PnL/direction breakdowns.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use gridval_core::position::Direction;

use crate::matcher::{MatchResult, MatchedTrade};

#[derive(Debug, Clone)]
pub struct TradeDelta {
    pub client_order_id: String,
    pub occurrence: u32,
    pub price_delta: Decimal,
    pub qty_delta: Decimal,
    pub fee_delta: Decimal,
    pub pnl_delta: Decimal,
    pub time_delta_ms: i64,
}

#[derive(Debug, Default, Clone)]
pub struct ValidationMetrics {
    pub total_live_trades: usize,
    pub total_backtest_trades: usize,
    pub matched_count: usize,
    pub live_only_count: usize,
    pub backtest_only_count: usize,
    pub match_rate: f64,
    pub phantom_rate: f64,

    pub price_mean_abs_delta: Decimal,
    pub price_median_abs_delta: Decimal,
    pub price_max_abs_delta: Decimal,

    pub qty_mean_abs_delta: Decimal,
    pub qty_median_abs_delta: Decimal,
    pub qty_max_abs_delta: Decimal,

    pub total_live_fees: Decimal,
    pub total_backtest_fees: Decimal,
    pub fee_delta: Decimal,

    pub total_live_pnl: Decimal,
    pub total_backtest_pnl: Decimal,
    pub cumulative_pnl_delta: Decimal,
    pub pnl_correlation: f64,

    pub total_live_volume: Decimal,
    pub total_backtest_volume: Decimal,

    pub long_match_count: usize,
    pub short_match_count: usize,
    pub long_pnl_delta: Decimal,
    pub short_pnl_delta: Decimal,

    pub mean_time_delta_seconds: f64,

    pub breaches: Vec<(String, u32)>,

    pub equity_max_divergence: Decimal,
    pub equity_mean_divergence: Decimal,
    pub equity_correlation: f64,

    pub trade_deltas: Vec<TradeDelta>,
}

pub(crate) fn pearson_correlation(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len();
    if n < 2 {
        return 0.0;
    }
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }
    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        cov / denom
    }
}

fn decimal_median(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    let mut sorted = values.to_vec();
    sorted.sort();
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / dec!(2)
    }
}

fn trade_delta(pair: &MatchedTrade) -> TradeDelta {
    TradeDelta {
        client_order_id: pair.live.client_order_id.clone(),
        occurrence: pair.live.occurrence,
        price_delta: pair.backtest.price - pair.live.price,
        qty_delta: pair.backtest.qty - pair.live.qty,
        fee_delta: pair.backtest.fee - pair.live.fee,
        pnl_delta: pair.backtest.realized_pnl - pair.live.realized_pnl,
        time_delta_ms: pair.backtest.timestamp - pair.live.timestamp,
    }
}

/// `price_tolerance`/`qty_tolerance` of zero mean "flag any non-zero delta".
pub fn calculate_metrics(match_result: &MatchResult, price_tolerance: Decimal, qty_tolerance: Decimal) -> ValidationMetrics {
    let mut metrics = ValidationMetrics::default();

    let total_live = match_result.matched.len() + match_result.live_only.len();
    let total_bt = match_result.matched.len() + match_result.backtest_only.len();

    metrics.total_live_trades = total_live;
    metrics.total_backtest_trades = total_bt;
    metrics.matched_count = match_result.matched.len();
    metrics.live_only_count = match_result.live_only.len();
    metrics.backtest_only_count = match_result.backtest_only.len();
    metrics.match_rate = if total_live > 0 { metrics.matched_count as f64 / total_live as f64 } else { 0.0 };
    metrics.phantom_rate = if total_bt > 0 { metrics.backtest_only_count as f64 / total_bt as f64 } else { 0.0 };

    for t in &match_result.live_only {
        metrics.total_live_volume += t.qty;
    }
    for t in &match_result.backtest_only {
        metrics.total_backtest_volume += t.qty;
    }

    if match_result.matched.is_empty() {
        return metrics;
    }

    let deltas: Vec<TradeDelta> = match_result.matched.iter().map(trade_delta).collect();

    let abs_price_deltas: Vec<Decimal> = deltas.iter().map(|d| d.price_delta.abs()).collect();
    metrics.price_mean_abs_delta = abs_price_deltas.iter().sum::<Decimal>() / Decimal::from(abs_price_deltas.len());
    metrics.price_median_abs_delta = decimal_median(&abs_price_deltas);
    metrics.price_max_abs_delta = abs_price_deltas.iter().copied().fold(Decimal::ZERO, Decimal::max);

    let abs_qty_deltas: Vec<Decimal> = deltas.iter().map(|d| d.qty_delta.abs()).collect();
    metrics.qty_mean_abs_delta = abs_qty_deltas.iter().sum::<Decimal>() / Decimal::from(abs_qty_deltas.len());
    metrics.qty_median_abs_delta = decimal_median(&abs_qty_deltas);
    metrics.qty_max_abs_delta = abs_qty_deltas.iter().copied().fold(Decimal::ZERO, Decimal::max);

    for (pair, delta) in match_result.matched.iter().zip(&deltas) {
        if delta.price_delta.abs() > price_tolerance || delta.qty_delta.abs() > qty_tolerance {
            metrics.breaches.push((delta.client_order_id.clone(), pair.live.occurrence));
        }
    }

    for pair in &match_result.matched {
        metrics.total_live_fees += pair.live.fee;
        metrics.total_backtest_fees += pair.backtest.fee;
    }
    metrics.fee_delta = metrics.total_backtest_fees - metrics.total_live_fees;

    let mut sorted_pairs: Vec<&MatchedTrade> = match_result.matched.iter().collect();
    sorted_pairs.sort_by_key(|p| p.live.timestamp);

    let mut live_running = Decimal::ZERO;
    let mut bt_running = Decimal::ZERO;
    let mut live_cum_pnl = Vec::with_capacity(sorted_pairs.len());
    let mut bt_cum_pnl = Vec::with_capacity(sorted_pairs.len());
    for pair in &sorted_pairs {
        live_running += pair.live.realized_pnl;
        bt_running += pair.backtest.realized_pnl;
        live_cum_pnl.push(decimal_to_f64(live_running));
        bt_cum_pnl.push(decimal_to_f64(bt_running));
    }
    metrics.total_live_pnl = live_running;
    metrics.total_backtest_pnl = bt_running;
    metrics.cumulative_pnl_delta = bt_running - live_running;
    metrics.pnl_correlation = pearson_correlation(&live_cum_pnl, &bt_cum_pnl);

    for pair in &match_result.matched {
        metrics.total_live_volume += pair.live.qty;
        metrics.total_backtest_volume += pair.backtest.qty;
    }

    // Prefer the backtest-side direction: it's always correct, unlike the
    // live loader's inferred direction which misclassifies break-even closes.
    for (pair, delta) in match_result.matched.iter().zip(&deltas) {
        let direction = pair.backtest.direction.or(pair.live.direction).unwrap_or(Direction::Long);
        if direction == Direction::Long {
            metrics.long_match_count += 1;
            metrics.long_pnl_delta += delta.pnl_delta;
        } else {
            metrics.short_match_count += 1;
            metrics.short_pnl_delta += delta.pnl_delta;
        }
    }

    let time_deltas_sec: Vec<f64> = deltas.iter().map(|d| (d.time_delta_ms.abs() as f64) / 1000.0).collect();
    metrics.mean_time_delta_seconds = time_deltas_sec.iter().sum::<f64>() / time_deltas_sec.len() as f64;

    metrics.trade_deltas = deltas;
    metrics
}

fn decimal_to_f64(value: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    value.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pearson_correlation_perfect_linear() {
        let xs = vec![1.0, 2.0, 3.0, 4.0];
        let ys = vec![2.0, 4.0, 6.0, 8.0];
        assert!((pearson_correlation(&xs, &ys) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn pearson_correlation_insufficient_data_is_zero() {
        assert_eq!(pearson_correlation(&[1.0], &[1.0]), 0.0);
    }

    #[test]
    fn empty_match_result_has_zero_rates() {
        let result = MatchResult::default();
        let metrics = calculate_metrics(&result, Decimal::ZERO, Decimal::ZERO);
        assert_eq!(metrics.match_rate, 0.0);
        assert_eq!(metrics.phantom_rate, 0.0);
    }
}
