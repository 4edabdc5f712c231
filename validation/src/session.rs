//! Append-only backtest session: records trades and equity points as the
//! driver ticks, computes summary metrics once on `finalize()`.
//!
//! Implements [`gridval_core::driver::EquitySink`] so a [`BacktestSession`]
//! can be handed directly to a `gridval_core::driver::GridRunner` as its
//! recording sink — this is the seam that keeps `gridval-core` from ever
//! depending on `gridval-validation`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use gridval_core::driver::EquitySink;
use gridval_core::orderbook::{ExecutionEvent, Side};
use gridval_core::position::Direction;

#[derive(Debug, Clone)]
pub struct BacktestTrade {
    pub trade_id: String,
    pub symbol: String,
    pub side: Side,
    pub direction: Direction,
    pub price: Decimal,
    pub qty: Decimal,
    pub realized_pnl: Decimal,
    pub commission: Decimal,
    pub timestamp: i64,
    pub order_id: String,
    pub client_order_id: String,
    pub strat_id: String,
}

#[derive(Debug, Default, Clone)]
pub struct BacktestMetrics {
    pub initial_balance: Decimal,
    pub final_balance: Decimal,
    pub return_pct: f64,
    pub net_pnl: Decimal,
    pub total_realized_pnl: Decimal,
    pub total_unrealized_pnl: Decimal,
    pub total_commission: Decimal,
    pub total_funding: Decimal,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub profit_factor: f64,
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,
    pub max_drawdown_duration_ms: i64,
    pub sharpe_ratio: f64,
    pub total_volume: Decimal,
    pub turnover: f64,
    pub long_trades: usize,
    pub short_trades: usize,
    pub long_pnl: Decimal,
    pub short_pnl: Decimal,
    pub long_profit_factor: f64,
    pub short_profit_factor: f64,
    pub peak_im: Decimal,
    pub peak_mm: Decimal,
    pub peak_imr_pct: f64,
    pub peak_mmr_pct: f64,
}

pub struct BacktestSession {
    pub session_id: String,
    strat_id: String,
    symbol: String,
    pub initial_balance: Decimal,
    pub current_balance: Decimal,
    trades: Vec<BacktestTrade>,
    equity_curve: Vec<(i64, Decimal)>,
    total_realized_pnl: Decimal,
    total_commission: Decimal,
    total_funding: Decimal,
    peak_equity: Decimal,
    peak_equity_ts: i64,
    max_drawdown: Decimal,
    max_drawdown_duration_ms: i64,
    peak_im: Decimal,
    peak_mm: Decimal,
    metrics: Option<BacktestMetrics>,
    next_trade_seq: u64,
}

impl BacktestSession {
    pub fn new(session_id: String, strat_id: String, symbol: String, initial_balance: Decimal) -> Self {
        Self {
            session_id,
            strat_id,
            symbol,
            initial_balance,
            current_balance: initial_balance,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            total_realized_pnl: Decimal::ZERO,
            total_commission: Decimal::ZERO,
            total_funding: Decimal::ZERO,
            peak_equity: initial_balance,
            peak_equity_ts: 0,
            max_drawdown: Decimal::ZERO,
            max_drawdown_duration_ms: 0,
            peak_im: Decimal::ZERO,
            peak_mm: Decimal::ZERO,
            metrics: None,
            next_trade_seq: 1,
        }
    }

    pub fn trades(&self) -> &[BacktestTrade] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[(i64, Decimal)] {
        &self.equity_curve
    }

    pub fn metrics(&self) -> Option<&BacktestMetrics> {
        self.metrics.as_ref()
    }

    pub fn record_trade(&mut self, trade: BacktestTrade) {
        self.total_realized_pnl += trade.realized_pnl;
        self.total_commission += trade.commission;
        self.trades.push(trade);
    }

    pub fn record_funding(&mut self, amount: Decimal) {
        self.total_funding += amount;
    }

    /// Equity at `ts` = `initial + realized + unrealized − commission −
    /// |funding|`; updates the running peak/drawdown and, when margin is
    /// supplied, the peak IM/MM extrema. Returns the computed equity.
    ///
    /// Named distinctly from the [`EquitySink::update_equity`] impl below
    /// (which has no margin parameters) since Rust has no default arguments.
    pub fn update_equity_with_margin(&mut self, ts: i64, unrealized_pnl: Decimal, total_im: Decimal, total_mm: Decimal) -> Decimal {
        let equity = self.initial_balance + self.total_realized_pnl + unrealized_pnl - self.total_commission - self.total_funding.abs();
        self.current_balance = equity;
        self.equity_curve.push((ts, equity));

        if equity > self.peak_equity {
            self.peak_equity = equity;
            self.peak_equity_ts = ts;
        } else {
            let drawdown = self.peak_equity - equity;
            if drawdown > self.max_drawdown {
                self.max_drawdown = drawdown;
            }
            let duration = ts - self.peak_equity_ts;
            if duration > self.max_drawdown_duration_ms {
                self.max_drawdown_duration_ms = duration;
            }
        }

        if total_im > self.peak_im {
            self.peak_im = total_im;
        }
        if total_mm > self.peak_mm {
            self.peak_mm = total_mm;
        }

        equity
    }

    pub fn finalize(&mut self, final_unrealized_pnl: Decimal) -> BacktestMetrics {
        let winning: Vec<&BacktestTrade> = self.trades.iter().filter(|t| t.realized_pnl > Decimal::ZERO).collect();
        let losing: Vec<&BacktestTrade> = self.trades.iter().filter(|t| t.realized_pnl < Decimal::ZERO).collect();

        let gross_profit: Decimal = winning.iter().map(|t| t.realized_pnl).sum();
        let gross_loss: Decimal = losing.iter().map(|t| t.realized_pnl.abs()).sum();

        let long_trades: Vec<&BacktestTrade> = self.trades.iter().filter(|t| t.direction == Direction::Long).collect();
        let short_trades: Vec<&BacktestTrade> = self.trades.iter().filter(|t| t.direction == Direction::Short).collect();
        let long_pnl: Decimal = long_trades.iter().map(|t| t.realized_pnl).sum();
        let short_pnl: Decimal = short_trades.iter().map(|t| t.realized_pnl).sum();
        let long_profit_factor = profit_factor(&long_trades);
        let short_profit_factor = profit_factor(&short_trades);

        let total_volume: Decimal = self.trades.iter().map(|t| t.qty * t.price).sum();
        let turnover = to_f64(total_volume) / to_f64(self.initial_balance).max(1.0);

        let returns: Vec<f64> = self
            .equity_curve
            .windows(2)
            .filter_map(|w| {
                let (prev, curr) = (w[0].1, w[1].1);
                if prev.is_zero() {
                    None
                } else {
                    Some(to_f64((curr - prev) / prev))
                }
            })
            .collect();
        let sharpe_ratio = sharpe_ratio(&returns);

        let peak_imr_pct = if self.initial_balance.is_zero() { 0.0 } else { to_f64(self.peak_im / self.initial_balance) * 100.0 };
        let peak_mmr_pct = if self.initial_balance.is_zero() { 0.0 } else { to_f64(self.peak_mm / self.initial_balance) * 100.0 };

        let net_pnl = self.total_realized_pnl + final_unrealized_pnl - self.total_commission - self.total_funding.abs();
        let final_balance = self.initial_balance + net_pnl;
        let return_pct = if self.initial_balance.is_zero() { 0.0 } else { to_f64((final_balance - self.initial_balance) / self.initial_balance) * 100.0 };
        let max_drawdown_pct = if self.peak_equity.is_zero() { 0.0 } else { to_f64(self.max_drawdown / self.peak_equity) * 100.0 };

        let metrics = BacktestMetrics {
            initial_balance: self.initial_balance,
            final_balance,
            return_pct,
            net_pnl,
            total_realized_pnl: self.total_realized_pnl,
            total_unrealized_pnl: final_unrealized_pnl,
            total_commission: self.total_commission,
            total_funding: self.total_funding,
            total_trades: self.trades.len(),
            winning_trades: winning.len(),
            losing_trades: losing.len(),
            win_rate: if self.trades.is_empty() { 0.0 } else { winning.len() as f64 / self.trades.len() as f64 },
            avg_win: if winning.is_empty() { Decimal::ZERO } else { gross_profit / Decimal::from(winning.len()) },
            avg_loss: if losing.is_empty() { Decimal::ZERO } else { gross_loss / Decimal::from(losing.len()) },
            profit_factor: if gross_loss.is_zero() { 0.0 } else { to_f64(gross_profit / gross_loss) },
            max_drawdown: self.max_drawdown,
            max_drawdown_pct,
            max_drawdown_duration_ms: self.max_drawdown_duration_ms,
            sharpe_ratio,
            total_volume,
            turnover,
            long_trades: long_trades.len(),
            short_trades: short_trades.len(),
            long_pnl,
            short_pnl,
            long_profit_factor,
            short_profit_factor,
            peak_im: self.peak_im,
            peak_mm: self.peak_mm,
            peak_imr_pct,
            peak_mmr_pct,
        };

        self.metrics = Some(metrics.clone());
        metrics
    }

    pub fn get_summary(&self) -> String {
        let m = self.metrics.clone().unwrap_or_default();
        format!(
            "Backtest Results [{}]\nTrades: {}\nWin Rate: {:.2}%\nNet PnL: {}\nMargin: peak IM {} / peak MM {}\nPeak IM: {}\nPeak MM: {}",
            self.session_id,
            m.total_trades,
            m.win_rate * 100.0,
            m.net_pnl,
            m.peak_im,
            m.peak_mm,
            m.peak_im,
            m.peak_mm,
        )
    }
}

fn profit_factor(trades: &[&BacktestTrade]) -> f64 {
    let gross_profit: Decimal = trades.iter().filter(|t| t.realized_pnl > Decimal::ZERO).map(|t| t.realized_pnl).sum();
    let gross_loss: Decimal = trades.iter().filter(|t| t.realized_pnl < Decimal::ZERO).map(|t| t.realized_pnl.abs()).sum();
    if gross_loss.is_zero() {
        0.0
    } else {
        to_f64(gross_profit / gross_loss)
    }
}

fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    let stdev = variance.sqrt();
    if stdev == 0.0 {
        0.0
    } else {
        mean / stdev
    }
}

fn to_f64(value: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    value.to_f64().unwrap_or(0.0)
}

impl EquitySink for BacktestSession {
    fn update_equity(&mut self, ts: i64, unrealized_pnl: Decimal) {
        self.update_equity_with_margin(ts, unrealized_pnl, dec!(0), dec!(0));
    }

    fn record_execution(&mut self, ts: i64, direction: Direction, exec: &ExecutionEvent, realized_pnl: Decimal) {
        let seq = self.next_trade_seq;
        self.next_trade_seq += 1;
        self.record_trade(BacktestTrade {
            trade_id: format!("{}-{}", self.session_id, seq),
            symbol: self.symbol.clone(),
            side: exec.side,
            direction,
            price: exec.price,
            qty: exec.qty,
            realized_pnl,
            commission: exec.fee,
            timestamp: ts,
            order_id: exec.order_id.to_string(),
            client_order_id: exec.order_link_id.clone(),
            strat_id: self.strat_id.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn session() -> BacktestSession {
        BacktestSession::new("sess-1".into(), "btc_main".into(), "BTCUSDT".into(), dec!(10000))
    }

    fn trade(id: &str, realized_pnl: Decimal, commission: Decimal) -> BacktestTrade {
        BacktestTrade {
            trade_id: id.into(),
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            direction: Direction::Long,
            price: dec!(100000),
            qty: dec!(0.1),
            realized_pnl,
            commission,
            timestamp: 0,
            order_id: "1".into(),
            client_order_id: "c1".into(),
            strat_id: "btc_main".into(),
        }
    }

    #[test]
    fn record_trade_accumulates_totals() {
        let mut s = session();
        s.record_trade(trade("t1", dec!(100), dec!(2)));
        assert_eq!(s.total_realized_pnl, dec!(100));
        assert_eq!(s.total_commission, dec!(2));
    }

    #[test]
    fn update_equity_applies_formula() {
        let mut s = session();
        s.total_realized_pnl = dec!(100);
        s.total_commission = dec!(10);
        s.total_funding = dec!(-5);

        let equity = s.update_equity_with_margin(1, dec!(50), dec!(0), dec!(0));

        assert_eq!(equity, dec!(10135));
        assert_eq!(s.current_balance, dec!(10135));
    }

    #[test]
    fn drawdown_tracked_after_a_peak() {
        let mut s = session();
        s.update_equity_with_margin(1, dec!(0), dec!(0), dec!(0));
        s.total_realized_pnl = dec!(500);
        s.update_equity_with_margin(2, dec!(0), dec!(0), dec!(0));
        assert_eq!(s.peak_equity, dec!(10500));

        s.total_realized_pnl = dec!(300);
        s.update_equity_with_margin(3, dec!(0), dec!(0), dec!(0));
        assert_eq!(s.max_drawdown, dec!(200));
    }

    #[test]
    fn margin_peaks_tracked_across_updates() {
        let mut s = session();
        s.update_equity_with_margin(1, dec!(0), dec!(100), dec!(10));
        s.update_equity_with_margin(2, dec!(0), dec!(200), dec!(20));
        s.update_equity_with_margin(3, dec!(0), dec!(150), dec!(15));
        assert_eq!(s.peak_im, dec!(200));
        assert_eq!(s.peak_mm, dec!(20));
    }

    #[test]
    fn finalize_computes_win_rate_and_profit_factor() {
        let mut s = session();
        s.record_trade(trade("t1", dec!(200), dec!(0)));
        s.record_trade(trade("t2", dec!(-100), dec!(0)));

        let metrics = s.finalize(Decimal::ZERO);

        assert_eq!(metrics.total_trades, 2);
        assert_eq!(metrics.winning_trades, 1);
        assert_eq!(metrics.losing_trades, 1);
        assert_eq!(metrics.win_rate, 0.5);
        assert_eq!(metrics.profit_factor, 2.0);
    }

    #[test]
    fn margin_peaks_zero_by_default() {
        let mut s = session();
        let metrics = s.finalize(Decimal::ZERO);
        assert_eq!(metrics.peak_im, Decimal::ZERO);
        assert_eq!(metrics.peak_imr_pct, 0.0);
    }
}
