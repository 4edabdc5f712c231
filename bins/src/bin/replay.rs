//! Replays a recorded run's public ticks through the same deterministic grid
//! engine the live driver uses, to check that the recorded event sequence
//! reproduces the live run's trades when processed offline.
//!
//! Exit codes: 0 success, 1 configuration error, 2 run failed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use gridval_bins::common::{exit_code_for, init_logging, GridArgs};
use gridval_bins::runner::{self, BacktestParams};
use gridval_core::config::RuntimeConfig;
use gridval_validation::reporter::BacktestReporter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay a recorded run through the grid engine")]
struct Cli {
    #[arg(long)]
    config: PathBuf,

    /// Overrides `persistence.database_path` from the config.
    #[arg(long = "database-url")]
    database_url: Option<String>,

    /// Recording run to replay; the most recent run is used if omitted.
    #[arg(long = "run-id")]
    run_id: Option<String>,

    /// Defaults to the config's `exchange.symbol`.
    #[arg(long)]
    symbol: Option<String>,

    #[arg(long)]
    start: Option<i64>,

    #[arg(long)]
    end: Option<i64>,

    /// Directory to export trades/equity/metrics CSVs into.
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long)]
    debug: bool,

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

    match run(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "replay failed");
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli, config: &RuntimeConfig) -> anyhow::Result<()> {
    let database_path = cli.database_url.clone().unwrap_or_else(|| config.persistence.database_path.clone());
    let symbol = cli.symbol.clone().unwrap_or_else(|| config.exchange.symbol.clone());

    let run_id = match &cli.run_id {
        Some(id) => id.clone(),
        None => runner::latest_run_id(&database_path)?.ok_or_else(|| anyhow::anyhow!("no recorded runs in {database_path}"))?,
    };
    tracing::info!(run_id, symbol, "replaying run");

    let (default_start, default_end) = runner::run_time_bounds(&database_path, &run_id)?
        .ok_or_else(|| anyhow::anyhow!("run {run_id} has no recorded executions"))?;
    let start = cli.start.or(Some(default_start));
    let end = cli.end.or(Some(default_end));

    let ticks = runner::load_ticks(&database_path, &symbol, start, end)?;
    if ticks.is_empty() {
        anyhow::bail!("no recorded public trades for {symbol} in run {run_id}'s window");
    }

    let params = BacktestParams {
        symbol: symbol.clone(),
        strat_id: format!("{}_main", symbol.to_lowercase()),
        risk_limit_cache_path: format!("{database_path}.risk_limits.json"),
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
    tracing::info!(run_id, trades = metrics.total_trades, net_pnl = %metrics.net_pnl, "replay complete");

    if let Some(output) = &cli.output {
        let reporter = BacktestReporter::new(&session);
        let paths = reporter.export_all(output, Some(&run_id), None)?;
        for path in paths {
            tracing::info!(path = %path.display(), "exported");
        }
    }

    Ok(())
}
