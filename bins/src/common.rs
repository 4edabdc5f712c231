//! Shared CLI scaffolding: logging init, the exit-code mapping every binary
//! applies to its outermost error, and the grid/sizing flags common to the
//! backtest and replay binaries.

use clap::ValueEnum;
use rust_decimal::Decimal;

use gridval_core::driver::{QtyCalculator, WindDownPolicy};
use gridval_core::error::ErrorKind;

/// Exit code for a `CoreError`'s kind, per the documented convention:
/// configuration errors never partially start (1), everything else that
/// reaches main unhandled is treated as a run failure (2).
pub fn exit_code_for(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Configuration => 1,
        ErrorKind::TransientIo | ErrorKind::Validation | ErrorKind::Business | ErrorKind::Fatal => 2,
    }
}

/// Initialize tracing; `debug` bumps the default filter from `info` to `debug`.
pub fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    gridval_core::utils::init_logger(level, false);
}

/// Installs a Ctrl-C handler that flips an `AtomicBool`, for loops that poll
/// it between ticks instead of aborting mid-flush.
pub fn install_shutdown_signal() -> std::sync::Arc<std::sync::atomic::AtomicBool> {
    let shutdown = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = shutdown.clone();
    let _ = ctrlc::set_handler(move || {
        tracing::warn!("shutdown signal received, finishing current tick");
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
    });
    shutdown
}

/// CLI-facing mirror of [`WindDownPolicy`] (clap derives `ValueEnum` for
/// plain enums, not ones defined in another crate).
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum WindDownArg {
    LeaveOpen,
    CloseAll,
}

impl From<WindDownArg> for WindDownPolicy {
    fn from(value: WindDownArg) -> Self {
        match value {
            WindDownArg::LeaveOpen => WindDownPolicy::LeaveOpen,
            WindDownArg::CloseAll => WindDownPolicy::CloseAll,
        }
    }
}

/// Sizing/session flags shared by `backtest` and `replay` — the grid
/// geometry itself comes from the runtime config, but order sizing and
/// account parameters aren't part of that config tree.
#[derive(clap::Args, Debug, Clone)]
pub struct GridArgs {
    /// Base-coin quantity per grid order.
    #[arg(long, default_value = "0.01")]
    pub qty: Decimal,
    #[arg(long, default_value = "10")]
    pub leverage: Decimal,
    #[arg(long, default_value = "0.0002")]
    pub commission_rate: Decimal,
    #[arg(long, default_value = "10000")]
    pub initial_balance: Decimal,
    #[arg(long, value_enum, default_value = "close-all")]
    pub wind_down: WindDownArg,
}

impl GridArgs {
    pub fn qty_calculator(&self) -> QtyCalculator {
        QtyCalculator::BaseCoinEquivalent(self.qty)
    }
}
