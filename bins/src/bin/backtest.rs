//! Deterministic grid-engine backtest over recorded public trades.
//!
//! Exit codes: 0 success, 1 configuration error, 2 at least one symbol failed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use gridval_bins::common::{exit_code_for, init_logging, GridArgs};
use gridval_bins::runner::{self, BacktestParams};
use gridval_core::config::RuntimeConfig;
use gridval_validation::reporter::BacktestReporter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run the grid-trading engine over recorded ticks")]
struct Cli {
    /// Path to the TOML runtime config.
    #[arg(long)]
    config: PathBuf,

    /// Symbols to backtest; defaults to the config's single `exchange.symbol`.
    /// May be repeated.
    #[arg(long = "symbol")]
    symbols: Vec<String>,

    /// Inclusive start of the tick window (exchange timestamp, ms).
    #[arg(long)]
    start: Option<i64>,

    /// Inclusive end of the tick window (exchange timestamp, ms).
    #[arg(long)]
    end: Option<i64>,

    /// Directory to export trades/equity/metrics CSVs into.
    #[arg(long)]
    export: Option<PathBuf>,

    #[arg(long)]
    debug: bool,

    /// Abort the whole run on the first symbol failure instead of continuing.
    #[arg(long)]
    strict: bool,

    #[command(flatten)]
    grid: GridArgs,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = match RuntimeConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            return ExitCode::from(exit_code_for(e.kind()) as u8);
        }
    };

    let symbols: Vec<String> =
        if cli.symbols.is_empty() { vec![config.exchange.symbol.clone()] } else { cli.symbols.clone() };

    let mut any_failed = false;
    for symbol in &symbols {
        if let Err(e) = run_one(&cli, &config, symbol) {
            tracing::error!(symbol, error = %e, "backtest failed");
            any_failed = true;
            if cli.strict {
                break;
            }
        }
    }

    if any_failed {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}

fn run_one(cli: &Cli, config: &RuntimeConfig, symbol: &str) -> anyhow::Result<()> {
    tracing::info!(symbol, "running backtest");

    let ticks = runner::load_ticks(&config.persistence.database_path, symbol, cli.start, cli.end)?;
    if ticks.is_empty() {
        anyhow::bail!("no recorded public trades for {symbol} in the requested window");
    }

    let params = BacktestParams {
        symbol: symbol.to_string(),
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
    let metrics = session.metrics().expect("finalize always populates metrics");
    tracing::info!(
        symbol,
        trades = metrics.total_trades,
        win_rate = metrics.win_rate,
        net_pnl = %metrics.net_pnl,
        "backtest complete"
    );

    if let Some(export_dir) = &cli.export {
        let reporter = BacktestReporter::new(&session);
        let paths = reporter.export_all(export_dir, Some(symbol), None)?;
        for path in paths {
            tracing::info!(path = %path.display(), "exported");
        }
    }

    Ok(())
}
