//! Two-phase backtest/replay tick driver.
//!
//! The same loop drives both modes: backtest feeds a synthetic or recorded
//! ticker series, replay feeds persisted `public_trades`/`private_executions`
//! rows reconstructed in order. Per tick: process fills against the
//! simulated book, feed them back into the grid and position trackers,
//! update equity, then compute and execute the next tick's intents.
//! Orders placed this tick are only visible to *next* tick's fill scan.

use rust_decimal::Decimal;

use crate::grid::{Grid, GridConfig};
use crate::intent::{compute_intents, ObservedOrder, PlaceLimitIntent};
use crate::orderbook::{ExecutionEvent, OrderBook, Side};
use crate::position::{Direction, PositionTracker};
use crate::risk_limits::TierTable;

/// How a place intent's quantity is sized. Mirrors the reference runner's
/// `qty_calculator(intent, wallet_balance) -> qty` hook as a closed set of
/// strategies rather than an open trait, since there are only three and
/// none take configuration beyond a single parameter.
#[derive(Debug, Clone)]
pub enum QtyCalculator {
    /// Fixed USDT notional per order, converted to base qty at the limit price.
    FixedUsdt(Decimal),
    /// A fraction of current wallet balance, converted to base qty at the limit price.
    WalletFraction(Decimal),
    /// A fixed base-coin quantity, independent of price or balance.
    BaseCoinEquivalent(Decimal),
}

impl QtyCalculator {
    pub fn calculate(&self, intent: &PlaceLimitIntent, wallet_balance: Decimal) -> Decimal {
        if intent.price.is_zero() {
            return Decimal::ZERO;
        }
        match self {
            QtyCalculator::FixedUsdt(usdt) => *usdt / intent.price,
            QtyCalculator::WalletFraction(fraction) => (wallet_balance * *fraction) / intent.price,
            QtyCalculator::BaseCoinEquivalent(qty) => *qty,
        }
    }
}

/// Narrow callback surface into the session/reporting layer above the
/// driver. Kept as a trait so `gridval-core` never depends on
/// `gridval-validation`; the validation crate's session type implements it.
pub trait EquitySink {
    /// Called once per tick after fills are processed, with the combined
    /// unrealized PnL across both direction trackers at the tick price.
    fn update_equity(&mut self, ts: i64, unrealized_pnl: Decimal);
    /// Called once per fill, live or synthetic (wind-down).
    fn record_execution(&mut self, ts: i64, direction: Direction, exec: &ExecutionEvent, realized_pnl: Decimal);
}

/// What happens to residual open size once the driving event stream ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindDownPolicy {
    LeaveOpen,
    CloseAll,
}

pub struct GridRunnerConfig {
    pub symbol: String,
    pub strat_id: String,
    pub tick_size: Decimal,
    pub grid_count: usize,
    pub grid_step_pct: Decimal,
    pub rebalance_threshold: Decimal,
    pub commission_rate: Decimal,
    pub leverage: Decimal,
    pub qty_calculator: QtyCalculator,
    pub wind_down: WindDownPolicy,
}

/// Drives one symbol's long and short grids through a chronological event
/// stream. Two `Grid`s and two `PositionTracker`s (one per direction) share
/// a single simulated `OrderBook`, matching the "each needs the other's
/// size/margin only as a borrowed handle" ownership shape documented for
/// the position trackers.
pub struct GridRunner {
    config: GridRunnerConfig,
    long_grid: Grid,
    short_grid: Grid,
    order_book: OrderBook,
    long_tracker: PositionTracker,
    short_tracker: PositionTracker,
    wallet_balance: Decimal,
    last_close: Decimal,
    last_filled_price: Option<Decimal>,
}

impl GridRunner {
    pub fn new(config: GridRunnerConfig, wallet_balance: Decimal) -> Self {
        let grid_config = GridConfig {
            tick_size: config.tick_size,
            grid_count: config.grid_count,
            grid_step_pct: config.grid_step_pct,
            rebalance_threshold: config.rebalance_threshold,
        };
        let commission_rate = config.commission_rate;
        let leverage = config.leverage;
        let symbol = config.symbol.clone();

        Self {
            order_book: OrderBook::new(commission_rate),
            long_tracker: PositionTracker::new(Direction::Long, commission_rate, leverage, symbol.clone()),
            short_tracker: PositionTracker::new(Direction::Short, commission_rate, leverage, symbol),
            long_grid: Grid::new(grid_config.clone()),
            short_grid: Grid::new(grid_config),
            wallet_balance,
            last_close: Decimal::ZERO,
            last_filled_price: None,
            config,
        }
    }

    pub fn long_tracker(&self) -> &PositionTracker {
        &self.long_tracker
    }

    pub fn short_tracker(&self) -> &PositionTracker {
        &self.short_tracker
    }

    fn grid_mut(&mut self, direction: Direction) -> &mut Grid {
        match direction {
            Direction::Long => &mut self.long_grid,
            Direction::Short => &mut self.short_grid,
        }
    }

    fn tracker_mut(&mut self, direction: Direction) -> &mut PositionTracker {
        match direction {
            Direction::Long => &mut self.long_tracker,
            Direction::Short => &mut self.short_tracker,
        }
    }

    /// Run one full tick: phase 1 (fills + equity), phase 2 (intents).
    /// `tiers` is the risk-limit tier table for margin snapshotting.
    pub fn tick(&mut self, ts: i64, last_price: Decimal, tiers: &TierTable, sink: &mut dyn EquitySink) {
        self.process_fills(ts, last_price, sink);
        self.update_equity(ts, last_price, tiers, sink);
        self.execute_tick(ts);
    }

    fn process_fills(&mut self, ts: i64, last_price: Decimal, sink: &mut dyn EquitySink) {
        self.last_close = last_price;
        let events = self.order_book.check_fills(last_price, ts, Some(&self.config.symbol));

        for exec in &events {
            let realized = {
                let tracker = self.tracker_mut(exec.direction);
                tracker.process_fill(exec.side, exec.qty, exec.price)
            };
            sink.record_execution(ts, exec.direction, exec, realized);
            self.last_filled_price = Some(exec.price);
        }

        self.long_grid.update_grid(self.last_filled_price, Some(last_price));
        self.short_grid.update_grid(self.last_filled_price, Some(last_price));
    }

    fn update_equity(&mut self, ts: i64, last_price: Decimal, tiers: &TierTable, sink: &mut dyn EquitySink) {
        let long_unrealized = self.long_tracker.calculate_unrealized_pnl(last_price, tiers);
        self.long_tracker.calculate_unrealized_pnl_percent(last_price);
        let short_unrealized = self.short_tracker.calculate_unrealized_pnl(last_price, tiers);
        self.short_tracker.calculate_unrealized_pnl_percent(last_price);

        sink.update_equity(ts, long_unrealized + short_unrealized);
    }

    fn execute_tick(&mut self, ts: i64) {
        if self.long_grid.is_empty() {
            self.long_grid.build_grid(self.last_close);
        }
        if self.short_grid.is_empty() {
            self.short_grid.build_grid(self.last_close);
        }

        for direction in [Direction::Long, Direction::Short] {
            let observed: Vec<ObservedOrder> = self
                .order_book
                .limit_orders_by_direction(direction)
                .into_iter()
                .map(|o| ObservedOrder { order_id: o.order_id, side: o.side, price: o.price, direction: o.direction })
                .collect();

            let (places, cancels) = {
                let grid = self.grid_mut(direction);
                compute_intents(
                    grid,
                    &self.config.strat_id,
                    &self.config.symbol,
                    direction,
                    self.config.tick_size,
                    self.config.grid_step_pct,
                    self.last_close,
                    &observed,
                    self.config.grid_count,
                )
            };

            for cancel in cancels {
                self.order_book.cancel(cancel.order_id);
            }

            for place in places {
                let qty = self.config.qty_calculator.calculate(&place, self.wallet_balance);
                if qty <= Decimal::ZERO {
                    continue;
                }
                self.order_book.place(
                    place.client_order_id.clone(),
                    place.symbol.clone(),
                    place.side,
                    place.price,
                    qty,
                    place.direction,
                    place.grid_level,
                    place.reduce_only,
                    ts,
                );
            }
        }
    }

    /// Apply the configured wind-down policy once the driving event stream
    /// ends. `CloseAll` synthesizes a final fill at `last_close` for any
    /// residual size in either direction.
    pub fn wind_down(&mut self, ts: i64, sink: &mut dyn EquitySink) {
        if self.config.wind_down == WindDownPolicy::LeaveOpen {
            return;
        }

        for direction in [Direction::Long, Direction::Short] {
            let size = self.tracker_mut(direction).state().size;
            if size.is_zero() {
                continue;
            }
            let side = match direction {
                Direction::Long => Side::Sell,
                Direction::Short => Side::Buy,
            };
            let price = self.last_close;
            let realized = self.tracker_mut(direction).process_fill(side, size, price);
            let synthetic = ExecutionEvent {
                exec_id: 0,
                order_id: 0,
                order_link_id: "wind-down".to_string(),
                side,
                price,
                qty: size,
                fee: Decimal::ZERO,
                closed_pnl: realized,
                leaves_qty: Decimal::ZERO,
                direction,
                grid_level: 0,
            };
            sink.record_execution(ts, direction, &synthetic, realized);
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::risk_limits::TierTable;

    struct RecordingSink {
        equity_points: Vec<(i64, Decimal)>,
        executions: Vec<(Direction, Decimal)>,
    }

    impl EquitySink for RecordingSink {
        fn update_equity(&mut self, ts: i64, unrealized_pnl: Decimal) {
            self.equity_points.push((ts, unrealized_pnl));
        }

        fn record_execution(&mut self, _ts: i64, direction: Direction, _exec: &ExecutionEvent, realized_pnl: Decimal) {
            self.executions.push((direction, realized_pnl));
        }
    }

    fn runner() -> GridRunner {
        GridRunner::new(
            GridRunnerConfig {
                symbol: "BTCUSDT".into(),
                strat_id: "btc_main".into(),
                tick_size: dec!(0.1),
                grid_count: 4,
                grid_step_pct: dec!(0.2),
                rebalance_threshold: dec!(0.3),
                commission_rate: dec!(0.0002),
                leverage: dec!(10),
                qty_calculator: QtyCalculator::BaseCoinEquivalent(dec!(0.01)),
                wind_down: WindDownPolicy::CloseAll,
            },
            dec!(10000),
        )
    }

    #[test]
    fn first_tick_builds_grid_and_places_orders() {
        let mut runner = runner();
        let tiers = TierTable::hardcoded_btcusdt();
        let mut sink = RecordingSink { equity_points: Vec::new(), executions: Vec::new() };

        runner.tick(1, dec!(100000.0), &tiers, &mut sink);

        assert!(!runner.long_grid.is_empty());
        assert!(!runner.short_grid.is_empty());
        assert_eq!(sink.equity_points.len(), 1);
        assert_eq!(sink.equity_points[0].1, Decimal::ZERO);
    }

    #[test]
    fn price_crossing_a_resting_buy_fills_next_tick() {
        let mut runner = runner();
        let tiers = TierTable::hardcoded_btcusdt();
        let mut sink = RecordingSink { equity_points: Vec::new(), executions: Vec::new() };

        runner.tick(1, dec!(100000.0), &tiers, &mut sink);
        // drop price below the nearest resting buy level to trigger a fill next tick
        runner.tick(2, dec!(99500.0), &tiers, &mut sink);

        assert!(sink.executions.iter().any(|(direction, _)| *direction == Direction::Long));
    }

    #[test]
    fn wind_down_close_all_flattens_residual_size() {
        let mut runner = runner();
        let tiers = TierTable::hardcoded_btcusdt();
        let mut sink = RecordingSink { equity_points: Vec::new(), executions: Vec::new() };

        runner.tick(1, dec!(100000.0), &tiers, &mut sink);
        runner.tick(2, dec!(99500.0), &tiers, &mut sink);
        runner.wind_down(3, &mut sink);

        assert!(runner.long_tracker().state().size.is_zero());
    }
}
