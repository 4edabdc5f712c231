//! CSV export for a finalized [`BacktestSession`]: one row per trade, one
//! row per equity-curve point, and a metrics key/value dump. `export_all`
//! bundles the three under one prefix; an equity-comparison CSV is attached
//! only when resampled rows are supplied.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::equity::ResampledRow;
use crate::error::ValidationError;
use crate::session::BacktestSession;

fn to_f64(value: rust_decimal::Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    value.to_f64().unwrap_or(0.0)
}

pub struct BacktestReporter<'a> {
    session: &'a BacktestSession,
}

impl<'a> BacktestReporter<'a> {
    /// `session` must already be finalized — `export_metrics` reads its
    /// cached [`BacktestMetrics`](crate::session::BacktestMetrics).
    pub fn new(session: &'a BacktestSession) -> Self {
        Self { session }
    }

    fn ensure_parent(path: &Path) -> Result<(), ValidationError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    pub fn export_trades(&self, path: impl AsRef<Path>) -> Result<(), ValidationError> {
        let path = path.as_ref();
        Self::ensure_parent(path)?;
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "trade_id,timestamp,symbol,side,direction,price,qty,notional,realized_pnl,commission,order_id,client_order_id,strat_id")?;
        for trade in self.session.trades() {
            writeln!(
                w,
                "{},{},{},{:?},{:?},{},{},{},{},{},{},{},{}",
                trade.trade_id,
                trade.timestamp,
                trade.symbol,
                trade.side,
                trade.direction,
                trade.price,
                trade.qty,
                trade.price * trade.qty,
                trade.realized_pnl,
                trade.commission,
                trade.order_id,
                trade.client_order_id,
                trade.strat_id,
            )?;
        }
        Ok(())
    }

    pub fn export_equity_curve(&self, path: impl AsRef<Path>) -> Result<(), ValidationError> {
        let path = path.as_ref();
        Self::ensure_parent(path)?;
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "timestamp,equity,return_pct")?;
        let initial = self.session.initial_balance;
        for (ts, equity) in self.session.equity_curve() {
            let return_pct = if initial.is_zero() { 0.0 } else { to_f64((*equity - initial) / initial) * 100.0 };
            writeln!(w, "{},{},{:.4}", ts, equity, return_pct)?;
        }
        Ok(())
    }

    pub fn export_metrics(&self, path: impl AsRef<Path>) -> Result<(), ValidationError> {
        let path = path.as_ref();
        Self::ensure_parent(path)?;
        let m = self
            .session
            .metrics()
            .ok_or_else(|| ValidationError::Other("session not finalized".into()))?;

        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "metric,value")?;
        let rows: Vec<(&str, String)> = vec![
            ("session_id", self.session.session_id.clone()),
            ("initial_balance", m.initial_balance.to_string()),
            ("final_balance", m.final_balance.to_string()),
            ("return_pct", format!("{:.2}", m.return_pct)),
            ("net_pnl", m.net_pnl.to_string()),
            ("total_realized_pnl", m.total_realized_pnl.to_string()),
            ("total_unrealized_pnl", m.total_unrealized_pnl.to_string()),
            ("total_commission", m.total_commission.to_string()),
            ("total_funding", m.total_funding.to_string()),
            ("total_trades", m.total_trades.to_string()),
            ("winning_trades", m.winning_trades.to_string()),
            ("losing_trades", m.losing_trades.to_string()),
            ("win_rate", format!("{:.4}", m.win_rate)),
            ("avg_win", m.avg_win.to_string()),
            ("avg_loss", m.avg_loss.to_string()),
            ("profit_factor", format!("{:.4}", m.profit_factor)),
            ("max_drawdown", m.max_drawdown.to_string()),
            ("max_drawdown_pct", format!("{:.2}", m.max_drawdown_pct)),
            ("max_drawdown_duration_ms", m.max_drawdown_duration_ms.to_string()),
            ("sharpe_ratio", format!("{:.4}", m.sharpe_ratio)),
            ("total_volume", m.total_volume.to_string()),
            ("turnover", format!("{:.2}", m.turnover)),
            ("long_trades", m.long_trades.to_string()),
            ("short_trades", m.short_trades.to_string()),
            ("long_pnl", m.long_pnl.to_string()),
            ("short_pnl", m.short_pnl.to_string()),
            ("long_profit_factor", format!("{:.4}", m.long_profit_factor)),
            ("short_profit_factor", format!("{:.4}", m.short_profit_factor)),
            ("peak_im", m.peak_im.to_string()),
            ("peak_mm", m.peak_mm.to_string()),
            ("peak_imr_pct", format!("{:.2}", m.peak_imr_pct)),
            ("peak_mmr_pct", format!("{:.2}", m.peak_mmr_pct)),
        ];
        for (metric, value) in rows {
            writeln!(w, "{},{}", metric, value)?;
        }
        Ok(())
    }

    pub fn export_equity_comparison(&self, path: impl AsRef<Path>, resampled: &[ResampledRow]) -> Result<(), ValidationError> {
        let path = path.as_ref();
        Self::ensure_parent(path)?;
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "timestamp,live_equity,backtest_equity,divergence")?;
        for (ts, live, backtest) in resampled {
            let divergence = live.zip(*backtest).map(|(l, b)| (b - l).to_string()).unwrap_or_default();
            writeln!(
                w,
                "{},{},{},{}",
                ts,
                live.map(|v| v.to_string()).unwrap_or_default(),
                backtest.map(|v| v.to_string()).unwrap_or_default(),
                divergence,
            )?;
        }
        Ok(())
    }

    /// Writes `trades.csv`, `equity.csv`, `metrics.csv` into `output_dir`,
    /// all prefixed by the session's short ID (plus an optional caller
    /// prefix). An equity-comparison CSV is appended only if `resampled`
    /// is provided.
    pub fn export_all(&self, output_dir: impl AsRef<Path>, prefix: Option<&str>, resampled: Option<&[ResampledRow]>) -> Result<Vec<PathBuf>, ValidationError> {
        let output_dir = output_dir.as_ref();
        std::fs::create_dir_all(output_dir)?;

        let prefix = prefix.map(|p| format!("{p}_")).unwrap_or_default();
        let short_id: String = self.session.session_id.chars().take(8).collect();

        let trades_path = output_dir.join(format!("{prefix}{short_id}_trades.csv"));
        let equity_path = output_dir.join(format!("{prefix}{short_id}_equity.csv"));
        let metrics_path = output_dir.join(format!("{prefix}{short_id}_metrics.csv"));

        self.export_trades(&trades_path)?;
        self.export_equity_curve(&equity_path)?;
        self.export_metrics(&metrics_path)?;

        let mut paths = vec![trades_path, equity_path, metrics_path];
        if let Some(resampled) = resampled {
            let comparison_path = output_dir.join(format!("{prefix}{short_id}_equity_comparison.csv"));
            self.export_equity_comparison(&comparison_path, resampled)?;
            paths.push(comparison_path);
        }

        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridval_core::driver::EquitySink;
    use gridval_core::orderbook::{ExecutionEvent, Side};
    use gridval_core::position::Direction;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn finalized_session() -> BacktestSession {
        let mut session = BacktestSession::new("abcdefgh-1234".into(), "btc_main".into(), "BTCUSDT".into(), dec!(10000));
        session.record_execution(
            1,
            Direction::Long,
            &ExecutionEvent {
                exec_id: 1,
                order_id: 1,
                order_link_id: "co1".into(),
                side: Side::Buy,
                price: dec!(100000),
                qty: dec!(0.1),
                fee: dec!(2),
                closed_pnl: Decimal::ZERO,
                leaves_qty: Decimal::ZERO,
                direction: Direction::Long,
                grid_level: 0,
            },
            dec!(100),
        );
        session.update_equity(1, dec!(0));
        session.finalize(Decimal::ZERO);
        session
    }

    #[test]
    fn export_all_writes_three_files() {
        let session = finalized_session();
        let dir = tempdir().unwrap();
        let reporter = BacktestReporter::new(&session);

        let paths = reporter.export_all(dir.path(), None, None).unwrap();

        assert_eq!(paths.len(), 3);
        for path in &paths {
            assert!(path.exists());
        }
    }

    #[test]
    fn export_metrics_requires_finalized_session() {
        let session = BacktestSession::new("s".into(), "btc_main".into(), "BTCUSDT".into(), dec!(10000));
        let reporter = BacktestReporter::new(&session);
        let dir = tempdir().unwrap();
        assert!(reporter.export_metrics(dir.path().join("metrics.csv")).is_err());
    }
}
