//! Compares a live run's executions against a backtest of the same period,
//! matching trades by deterministic `client_order_id` and reporting
//! coverage/delta metrics plus, optionally, equity-curve divergence.
//!
//! Exit codes: 0 success, 1 configuration error, 2 run failed.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use rust_decimal::Decimal;

use gridval_bins::common::{init_logging, GridArgs};
use gridval_bins::runner::{self, BacktestParams};
use gridval_core::config::RuntimeConfig;
use gridval_validation::equity::{EquityComparator, EquityPoint};
use gridval_validation::loaders::{BacktestTradeLoader, LiveTradeLoader, NormalizedTrade, TradeSource};
use gridval_validation::matcher::TradeMatcher;
use gridval_validation::metrics::{calculate_metrics, ValidationMetrics};

#[derive(Parser, Debug)]
#[command(author, version, about = "Compare a live run against a backtest of the same period")]
struct Cli {
    /// Live recording run to compare.
    #[arg(long = "run-id")]
    run_id: String,

    /// Pre-exported backtest trades CSV (from `gridval-backtest --export`).
    #[arg(long = "backtest-trades", conflicts_with = "backtest_config")]
    backtest_trades: Option<PathBuf>,

    /// Run a fresh backtest from this config instead of reading a CSV.
    #[arg(long = "backtest-config", conflicts_with = "backtest_trades")]
    backtest_config: Option<PathBuf>,

    #[arg(long)]
    start: Option<i64>,

    #[arg(long)]
    end: Option<i64>,

    #[arg(long)]
    symbol: Option<String>,

    #[arg(long = "database-url")]
    database_url: String,

    #[arg(long)]
    output: PathBuf,

    /// Backtest equity-curve CSV (from `gridval-backtest --export`), for an
    /// additional equity-divergence comparison against the live wallet series.
    #[arg(long = "backtest-equity")]
    backtest_equity: Option<PathBuf>,

    /// Wallet coin whose `wallet_snapshots` balance is the live equity series.
    #[arg(long, default_value = "USDT")]
    coin: String,

    #[arg(long)]
    debug: bool,

    #[command(flatten)]
    grid: GridArgs,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "comparator failed");
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let live_conn = rusqlite::Connection::open(&cli.database_url)?;
    let live_trades = LiveTradeLoader::new(&live_conn).load(&cli.run_id, cli.symbol.as_deref())?;
    let live_trades = filter_window(live_trades, cli.start, cli.end);
    tracing::info!(run_id = %cli.run_id, count = live_trades.len(), "loaded live trades");

    let backtest_trades = match (&cli.backtest_trades, &cli.backtest_config) {
        (Some(path), None) => read_backtest_trades_csv(path)?,
        (None, Some(config_path)) => backtest_trades_from_config(cli, config_path)?,
        _ => anyhow::bail!("exactly one of --backtest-trades or --backtest-config must be given"),
    };
    let backtest_trades = filter_window(backtest_trades, cli.start, cli.end);
    tracing::info!(count = backtest_trades.len(), "loaded backtest trades");

    let match_result = TradeMatcher::new().match_trades(live_trades, backtest_trades);
    let mut metrics = calculate_metrics(&match_result, Decimal::ZERO, Decimal::ZERO);

    if let Some(equity_path) = &cli.backtest_equity {
        let backtest_equity = read_equity_csv(equity_path)?;
        let (start, end) = bounds(&backtest_equity);
        let live_equity = runner::load_live_equity_curve(&cli.database_url, &cli.coin, start, end)?;
        let resampled = EquityComparator::new().resample(&live_equity, &backtest_equity, 60_000);
        let (max_div, mean_div, correlation) = EquityComparator::new().compute_metrics(&resampled);
        metrics.equity_max_divergence = max_div;
        metrics.equity_mean_divergence = mean_div;
        metrics.equity_correlation = correlation;
    }

    tracing::info!(
        match_rate = metrics.match_rate,
        phantom_rate = metrics.phantom_rate,
        breaches = metrics.breaches.len(),
        "comparison complete"
    );

    export_report(&cli.output, &cli.run_id, &metrics)?;
    Ok(())
}

fn filter_window(trades: Vec<NormalizedTrade>, start: Option<i64>, end: Option<i64>) -> Vec<NormalizedTrade> {
    trades
        .into_iter()
        .filter(|t| start.map_or(true, |s| t.timestamp >= s) && end.map_or(true, |e| t.timestamp <= e))
        .collect()
}

fn bounds(points: &[EquityPoint]) -> (Option<i64>, Option<i64>) {
    let start = points.iter().map(|p| p.0).min();
    let end = points.iter().map(|p| p.0).max();
    (start, end)
}

fn backtest_trades_from_config(cli: &Cli, config_path: &Path) -> anyhow::Result<Vec<NormalizedTrade>> {
    let config = RuntimeConfig::load(config_path).map_err(|e| {
        tracing::error!(error = %e, "failed to load backtest config");
        anyhow::anyhow!(e)
    })?;
    let symbol = cli.symbol.clone().unwrap_or_else(|| config.exchange.symbol.clone());

    let ticks = runner::load_ticks(&config.persistence.database_path, &symbol, cli.start, cli.end)?;
    let params = BacktestParams {
        symbol: symbol.clone(),
        strat_id: format!("{}_main", symbol.to_lowercase()),
        risk_limit_cache_path: format!("{}.risk_limits.json", config.persistence.database_path),
        initial_balance: cli.grid.initial_balance,
        tick_size: config.grid.tick_size,
        grid_count: config.grid.grid_count,
        grid_step_pct: config.grid.grid_step_pct,
        rebalance_threshold: config.grid.rebalance_threshold,
        commission_rate: cli.grid.commission_rate,
        leverage: cli.grid.leverage,
        qty_calculator: cli.grid.qty_calculator(),
        wind_down: cli.grid.wind_down.into(),
    };

    let session = runner::run_backtest(&params, &ticks)?;
    Ok(BacktestTradeLoader::load_from_trades(session.trades()))
}

/// Parses the fixed-column trades CSV `BacktestReporter::export_trades` writes.
fn read_backtest_trades_csv(path: &Path) -> anyhow::Result<Vec<NormalizedTrade>> {
    let file = File::open(path)?;
    let mut trades = Vec::new();
    for line in BufReader::new(file).lines().skip(1) {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let cols: Vec<&str> = line.split(',').collect();
        if cols.len() < 13 {
            continue;
        }
        trades.push(NormalizedTrade {
            client_order_id: cols[11].to_string(),
            occurrence: 0,
            symbol: cols[2].to_string(),
            side: if cols[3] == "Buy" { gridval_core::orderbook::Side::Buy } else { gridval_core::orderbook::Side::Sell },
            direction: Some(if cols[4] == "Long" { gridval_core::position::Direction::Long } else { gridval_core::position::Direction::Short }),
            price: cols[5].parse().unwrap_or_default(),
            qty: cols[6].parse().unwrap_or_default(),
            fee: cols[9].parse().unwrap_or_default(),
            realized_pnl: cols[8].parse().unwrap_or_default(),
            timestamp: cols[1].parse().unwrap_or_default(),
            source: TradeSource::Backtest,
        });
    }
    BacktestTradeLoader::assign_occurrences(&mut trades);
    Ok(trades)
}

fn read_equity_csv(path: &Path) -> anyhow::Result<Vec<EquityPoint>> {
    let file = File::open(path)?;
    let mut points = Vec::new();
    for line in BufReader::new(file).lines().skip(1) {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let cols: Vec<&str> = line.split(',').collect();
        if cols.len() < 2 {
            continue;
        }
        points.push((cols[0].parse().unwrap_or_default(), cols[1].parse().unwrap_or_default()));
    }
    Ok(points)
}

fn export_report(output_dir: &Path, run_id: &str, metrics: &ValidationMetrics) -> anyhow::Result<()> {
    std::fs::create_dir_all(output_dir)?;

    let metrics_path = output_dir.join(format!("{run_id}_validation_metrics.csv"));
    let mut w = File::create(&metrics_path)?;
    writeln!(w, "metric,value")?;
    writeln!(w, "total_live_trades,{}", metrics.total_live_trades)?;
    writeln!(w, "total_backtest_trades,{}", metrics.total_backtest_trades)?;
    writeln!(w, "matched_count,{}", metrics.matched_count)?;
    writeln!(w, "live_only_count,{}", metrics.live_only_count)?;
    writeln!(w, "backtest_only_count,{}", metrics.backtest_only_count)?;
    writeln!(w, "match_rate,{:.4}", metrics.match_rate)?;
    writeln!(w, "phantom_rate,{:.4}", metrics.phantom_rate)?;
    writeln!(w, "price_mean_abs_delta,{}", metrics.price_mean_abs_delta)?;
    writeln!(w, "price_median_abs_delta,{}", metrics.price_median_abs_delta)?;
    writeln!(w, "price_max_abs_delta,{}", metrics.price_max_abs_delta)?;
    writeln!(w, "qty_mean_abs_delta,{}", metrics.qty_mean_abs_delta)?;
    writeln!(w, "qty_median_abs_delta,{}", metrics.qty_median_abs_delta)?;
    writeln!(w, "qty_max_abs_delta,{}", metrics.qty_max_abs_delta)?;
    writeln!(w, "total_live_fees,{}", metrics.total_live_fees)?;
    writeln!(w, "total_backtest_fees,{}", metrics.total_backtest_fees)?;
    writeln!(w, "fee_delta,{}", metrics.fee_delta)?;
    writeln!(w, "total_live_pnl,{}", metrics.total_live_pnl)?;
    writeln!(w, "total_backtest_pnl,{}", metrics.total_backtest_pnl)?;
    writeln!(w, "cumulative_pnl_delta,{}", metrics.cumulative_pnl_delta)?;
    writeln!(w, "pnl_correlation,{:.4}", metrics.pnl_correlation)?;
    writeln!(w, "mean_time_delta_seconds,{:.3}", metrics.mean_time_delta_seconds)?;
    writeln!(w, "breaches_count,{}", metrics.breaches.len())?;
    writeln!(w, "equity_max_divergence,{}", metrics.equity_max_divergence)?;
    writeln!(w, "equity_mean_divergence,{}", metrics.equity_mean_divergence)?;
    writeln!(w, "equity_correlation,{:.4}", metrics.equity_correlation)?;
    tracing::info!(path = %metrics_path.display(), "exported");

    let deltas_path = output_dir.join(format!("{run_id}_trade_deltas.csv"));
    let mut w = File::create(&deltas_path)?;
    writeln!(w, "client_order_id,occurrence,price_delta,qty_delta,fee_delta,pnl_delta,time_delta_ms")?;
    for delta in &metrics.trade_deltas {
        writeln!(
            w,
            "{},{},{},{},{},{},{}",
            delta.client_order_id, delta.occurrence, delta.price_delta, delta.qty_delta, delta.fee_delta, delta.pnl_delta, delta.time_delta_ms
        )?;
    }
    tracing::info!(path = %deltas_path.display(), "exported");

    Ok(())
}
