//! Shared offline tick-driving logic for the backtest and replay binaries:
//! load a symbol's recorded public trades from the embedded SQLite store,
//! drive a `GridRunner` over them tick-by-tick, and hand every fill/equity
//! update to a `BacktestSession`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rusqlite::Connection;

use gridval_core::driver::{EquitySink, GridRunner, GridRunnerConfig, QtyCalculator, WindDownPolicy};
use gridval_core::error::RiskLimitError;
use gridval_core::orderbook::ExecutionEvent;
use gridval_core::position::Direction;
use gridval_core::risk_limits::{RiskLimitStore, TierFetcher, TierTable};
use gridval_validation::session::BacktestSession;

/// No live exchange is consulted offline; the tier store always falls
/// through to a cached entry or the hardcoded table.
struct OfflineFetcher;

impl TierFetcher for OfflineFetcher {
    fn fetch(&self, symbol: &str) -> std::result::Result<TierTable, RiskLimitError> {
        Err(RiskLimitError::ApiError(format!("no live exchange in an offline run ({symbol})")))
    }
}

#[derive(Clone)]
pub struct BacktestParams {
    pub symbol: String,
    pub strat_id: String,
    pub risk_limit_cache_path: String,
    pub initial_balance: Decimal,
    pub tick_size: Decimal,
    pub grid_count: usize,
    pub grid_step_pct: Decimal,
    pub rebalance_threshold: Decimal,
    pub commission_rate: Decimal,
    pub leverage: Decimal,
    pub qty_calculator: QtyCalculator,
    pub wind_down: WindDownPolicy,
}

/// Forwards to a `BacktestSession` while remembering the last reported
/// unrealized PnL, so the caller can `finalize` with an accurate figure
/// when the wind-down policy leaves residual size open.
struct TrackingSink<'a> {
    session: &'a mut BacktestSession,
    last_unrealized: Decimal,
}

impl EquitySink for TrackingSink<'_> {
    fn update_equity(&mut self, ts: i64, unrealized_pnl: Decimal) {
        self.last_unrealized = unrealized_pnl;
        self.session.update_equity(ts, unrealized_pnl);
    }

    fn record_execution(&mut self, ts: i64, direction: Direction, exec: &ExecutionEvent, realized_pnl: Decimal) {
        self.session.record_execution(ts, direction, exec, realized_pnl);
    }
}

/// Loads `(exchange_ts, price)` pairs for `symbol` from `public_trades`,
/// ordered chronologically and bounded by an optional `[start_ts, end_ts]`.
pub fn load_ticks(database_path: &str, symbol: &str, start_ts: Option<i64>, end_ts: Option<i64>) -> Result<Vec<(i64, Decimal)>> {
    let conn = Connection::open(database_path).with_context(|| format!("opening {database_path}"))?;
    let mut stmt = conn.prepare(
        "SELECT exchange_ts, price FROM public_trades
         WHERE symbol = ?1 AND (?2 IS NULL OR exchange_ts >= ?2) AND (?3 IS NULL OR exchange_ts <= ?3)
         ORDER BY exchange_ts",
    )?;

    let rows = stmt.query_map(rusqlite::params![symbol, start_ts, end_ts], |row| {
        let ts: i64 = row.get(0)?;
        let price: String = row.get(1)?;
        Ok((ts, price))
    })?;

    let mut ticks = Vec::new();
    for row in rows {
        let (ts, raw_price) = row?;
        ticks.push((ts, raw_price.parse::<Decimal>().unwrap_or_default()));
    }
    Ok(ticks)
}

/// Finds the most recent `run_id` recorded in `private_executions`, for
/// replay's `--run-id` auto-discovery.
pub fn latest_run_id(database_path: &str) -> Result<Option<String>> {
    let conn = Connection::open(database_path).with_context(|| format!("opening {database_path}"))?;
    let run_id = conn
        .query_row(
            "SELECT run_id FROM private_executions WHERE run_id IS NOT NULL ORDER BY exchange_ts DESC LIMIT 1",
            [],
            |row| row.get::<_, String>(0),
        )
        .ok();
    Ok(run_id)
}

/// `(earliest, latest)` execution timestamp recorded for `run_id`, used to
/// bound the tick window replay reconstructs over.
pub fn run_time_bounds(database_path: &str, run_id: &str) -> Result<Option<(i64, i64)>> {
    let conn = Connection::open(database_path).with_context(|| format!("opening {database_path}"))?;
    let bounds = conn
        .query_row(
            "SELECT MIN(exchange_ts), MAX(exchange_ts) FROM private_executions WHERE run_id = ?1",
            rusqlite::params![run_id],
            |row| Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, Option<i64>>(1)?)),
        )
        .context("querying run time bounds")?;
    Ok(match bounds {
        (Some(start), Some(end)) => Some((start, end)),
        _ => None,
    })
}

/// Loads `(recorded_ts, wallet_balance)` for `coin` from `wallet_snapshots`,
/// the live equity series the comparator diffs against a backtest curve.
pub fn load_live_equity_curve(database_path: &str, coin: &str, start_ts: Option<i64>, end_ts: Option<i64>) -> Result<Vec<(i64, Decimal)>> {
    let conn = Connection::open(database_path).with_context(|| format!("opening {database_path}"))?;
    let mut stmt = conn.prepare(
        "SELECT recorded_ts, wallet_balance FROM wallet_snapshots
         WHERE coin = ?1 AND (?2 IS NULL OR recorded_ts >= ?2) AND (?3 IS NULL OR recorded_ts <= ?3)
         ORDER BY recorded_ts",
    )?;
    let rows = stmt.query_map(rusqlite::params![coin, start_ts, end_ts], |row| {
        let ts: i64 = row.get(0)?;
        let balance: String = row.get(1)?;
        Ok((ts, balance))
    })?;

    let mut points = Vec::new();
    for row in rows {
        let (ts, raw_balance) = row?;
        points.push((ts, raw_balance.parse::<Decimal>().unwrap_or_default()));
    }
    Ok(points)
}

/// Drives the deterministic grid engine over `ticks`, recording every fill
/// and equity update into a fresh `BacktestSession`, then finalizes it.
pub fn run_backtest(params: &BacktestParams, ticks: &[(i64, Decimal)]) -> Result<BacktestSession> {
    let tier_store = RiskLimitStore::new(Path::new(&params.risk_limit_cache_path), Duration::from_secs(3600));
    let tiers = tier_store.get(&params.symbol, false, &OfflineFetcher).context("resolving risk-limit tiers")?;

    let mut runner = GridRunner::new(
        GridRunnerConfig {
            symbol: params.symbol.clone(),
            strat_id: params.strat_id.clone(),
            tick_size: params.tick_size,
            grid_count: params.grid_count,
            grid_step_pct: params.grid_step_pct,
            rebalance_threshold: params.rebalance_threshold,
            commission_rate: params.commission_rate,
            leverage: params.leverage,
            qty_calculator: params.qty_calculator.clone(),
            wind_down: params.wind_down,
        },
        params.initial_balance,
    );

    let mut session = BacktestSession::new(
        format!("{}-{}", params.strat_id, params.symbol),
        params.strat_id.clone(),
        params.symbol.clone(),
        params.initial_balance,
    );

    let final_unrealized = {
        let mut sink = TrackingSink { session: &mut session, last_unrealized: Decimal::ZERO };
        let mut last_ts = 0i64;
        for &(ts, price) in ticks {
            runner.tick(ts, price, &tiers, &mut sink);
            last_ts = ts;
        }
        runner.wind_down(last_ts + 1, &mut sink);
        sink.last_unrealized
    };

    session.finalize(final_unrealized);
    Ok(session)
}
