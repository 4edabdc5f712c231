//! gridval-validation: three-way equivalence checking for the grid-trading
//! core — compares live, backtest, and replay executions of the same
//! deterministic logic against each other.
//!
//! Trades are matched by their deterministic `client_order_id`
//! ([`matcher`]) after each source is normalized ([`loaders`]), producing
//! [`metrics::ValidationMetrics`]. A parallel equity-curve comparison
//! ([`equity`]) checks unrealized-PnL tracking independent of trade
//! matching. [`session::BacktestSession`] is the recording sink a
//! [`gridval_core::driver::GridRunner`] writes into during a backtest run;
//! [`reporter`] exports its results to CSV.

pub mod equity;
pub mod error;
pub mod loaders;
pub mod matcher;
pub mod metrics;
pub mod reporter;
pub mod session;

pub mod prelude {
    pub use crate::equity::{EquityComparator, EquityPoint, ResampledRow};
    pub use crate::error::ValidationError;
    pub use crate::loaders::{BacktestTradeLoader, LiveTradeLoader, NormalizedTrade, TradeSource};
    pub use crate::matcher::{MatchResult, MatchedTrade, TradeMatcher};
    pub use crate::metrics::{calculate_metrics, TradeDelta, ValidationMetrics};
    pub use crate::reporter::BacktestReporter;
    pub use crate::session::{BacktestMetrics, BacktestSession, BacktestTrade};
}
