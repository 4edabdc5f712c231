//! Grid state engine: anchor persistence, level construction, side
//! assignment under price moves, and imbalance-driven rebalancing.
//!
//! Ported from the reference `gridcore.grid.Grid` implementation, with
//! `Decimal` replacing `float` throughout and explicit `round_to_tick`
//! instead of the original's string-reformatting workaround for
//! floating-point artifacts.

pub mod anchor_store;

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use crate::decimal::round_to_tick;
use crate::error::GridError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridSide {
    Buy,
    Sell,
    Wait,
}

impl fmt::Display for GridSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridSide::Buy => write!(f, "Buy"),
            GridSide::Sell => write!(f, "Sell"),
            GridSide::Wait => write!(f, "wait"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLevel {
    pub side: GridSide,
    pub price: Decimal,
}

/// Percentage grid step, quantity of levels, and rebalance sensitivity for a
/// single symbol's grid.
#[derive(Debug, Clone)]
pub struct GridConfig {
    pub tick_size: Decimal,
    pub grid_count: usize,
    /// Percentage step between adjacent levels, e.g. `dec!(0.2)` for 0.2%.
    pub grid_step_pct: Decimal,
    /// Fraction (0..1) of buy/sell imbalance that triggers a rebalance, e.g. `dec!(0.3)`.
    pub rebalance_threshold: Decimal,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            tick_size: dec!(0.1),
            grid_count: 50,
            grid_step_pct: dec!(0.2),
            rebalance_threshold: dec!(0.3),
        }
    }
}

/// Grid state: ordered levels plus the persisted anchor price.
pub struct Grid {
    config: GridConfig,
    levels: Vec<GridLevel>,
    original_anchor_price: Option<Decimal>,
}

impl Grid {
    pub fn new(config: GridConfig) -> Self {
        Self {
            config,
            levels: Vec::new(),
            original_anchor_price: None,
        }
    }

    pub fn levels(&self) -> &[GridLevel] {
        &self.levels
    }

    pub fn anchor_price(&self) -> Option<Decimal> {
        self.original_anchor_price
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    fn step(&self) -> Decimal {
        self.config.grid_step_pct / dec!(100)
    }

    /// Build the initial grid centered on `last_close`. A zero `last_close`
    /// returns without mutating any existing grid.
    pub fn build_grid(&mut self, last_close: Decimal) {
        if last_close.is_zero() {
            return;
        }

        self.levels.clear();
        let half = self.config.grid_count / 2;
        let step = self.step();

        let rounded_anchor = round_to_tick(last_close, self.config.tick_size);
        self.original_anchor_price = Some(rounded_anchor);
        self.levels.push(GridLevel {
            side: GridSide::Wait,
            price: rounded_anchor,
        });

        let mut sell_price = last_close;
        for _ in 0..half {
            sell_price = round_to_tick(sell_price * (Decimal::ONE + step), self.config.tick_size);
            self.levels.push(GridLevel {
                side: GridSide::Sell,
                price: sell_price,
            });
        }

        let mut buy_price = last_close;
        for _ in 0..half {
            buy_price = round_to_tick(buy_price * (Decimal::ONE - step), self.config.tick_size);
            self.levels.insert(0, GridLevel {
                side: GridSide::Buy,
                price: buy_price,
            });
        }
    }

    fn rebuild(&mut self, last_close: Decimal) {
        self.levels.clear();
        self.build_grid(last_close);
    }

    fn min_price(&self) -> Decimal {
        self.levels.iter().map(|l| l.price).min().unwrap_or(Decimal::ZERO)
    }

    fn max_price(&self) -> Decimal {
        self.levels.iter().map(|l| l.price).max().unwrap_or(Decimal::ZERO)
    }

    /// Update the grid after a fill: mark the fill price's neighborhood as
    /// `Wait`, reassign Buy/Sell around `last_close`, then rebalance.
    pub fn update_grid(&mut self, last_filled_price: Option<Decimal>, last_close: Option<Decimal>) {
        let (Some(last_filled_price), Some(last_close)) = (last_filled_price, last_close) else {
            return;
        };

        if self.levels.is_empty() || !(self.min_price() < last_close && last_close < self.max_price()) {
            info!(%last_close, "rebuild grid: out of bounds");
            self.rebuild(last_close);
        }

        for level in self.levels.iter_mut() {
            if is_too_close(level.price, last_filled_price, self.config.grid_step_pct) {
                level.side = GridSide::Wait;
            } else if last_close < level.price {
                level.side = GridSide::Sell;
            } else if last_close > level.price {
                level.side = GridSide::Buy;
            }
        }

        self.center_grid();
    }

    fn center_grid(&mut self) {
        let mut buy_count = 0usize;
        let mut sell_count = 0usize;
        let mut highest_sell_price = Decimal::ZERO;
        let lowest_buy_price = self.levels.first().map(|l| l.price).unwrap_or(Decimal::ZERO);

        for level in &self.levels {
            match level.side {
                GridSide::Buy => buy_count += 1,
                GridSide::Sell => {
                    sell_count += 1;
                    highest_sell_price = level.price;
                }
                GridSide::Wait => {}
            }
        }

        let total = buy_count + sell_count;
        if total == 0 {
            return;
        }

        let step = self.step();
        let imbalance = Decimal::from(buy_count as i64 - sell_count as i64) / Decimal::from(total as i64);

        if imbalance > self.config.rebalance_threshold {
            self.levels.remove(0);
            let price = round_to_tick(highest_sell_price * (Decimal::ONE + step), self.config.tick_size);
            self.levels.push(GridLevel { side: GridSide::Sell, price });
        } else if -imbalance > self.config.rebalance_threshold {
            self.levels.pop();
            let price = round_to_tick(lowest_buy_price * (Decimal::ONE - step), self.config.tick_size);
            self.levels.insert(0, GridLevel { side: GridSide::Buy, price });
        }
    }

    fn is_price_sorted(&self) -> bool {
        let mut previous = Decimal::MIN;
        for level in &self.levels {
            if level.price < previous {
                return false;
            }
            previous = level.price;
        }
        true
    }

    /// Validate the `Buy* Wait+ Sell*` sequence with monotone prices.
    pub fn is_grid_correct(&self) -> bool {
        if !self.is_price_sorted() {
            return false;
        }

        // 0 = expecting Buy, 1 = expecting Wait, 2 = expecting Sell
        let mut state = 0;
        for level in &self.levels {
            match (state, level.side) {
                (0, GridSide::Buy) => {}
                (1, GridSide::Wait) => {}
                (2, GridSide::Sell) => {}
                (0, GridSide::Wait) => state = 2,
                (1, GridSide::Sell) => state = 2,
                _ => return false,
            }
        }
        state == 2
    }

    pub fn validate(&self) -> Result<(), GridError> {
        if !self.is_price_sorted() {
            return Err(GridError::NotSorted("grid prices are not monotone".into()));
        }
        if !self.levels.iter().any(|l| l.side == GridSide::Wait) {
            return Err(GridError::NoWaitRegion);
        }
        Ok(())
    }
}

/// Two prices are "too close" when they are within `step/4` percent of each other.
fn is_too_close(price1: Decimal, price2: Decimal, grid_step_pct: Decimal) -> bool {
    if price1.is_zero() {
        return false;
    }
    ((price1 - price2).abs() / price1 * dec!(100)) < grid_step_pct / dec!(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GridConfig {
        GridConfig {
            tick_size: dec!(0.1),
            grid_count: 4,
            grid_step_pct: dec!(0.2),
            rebalance_threshold: dec!(0.3),
        }
    }

    #[test]
    fn first_tick_grid_build() {
        let mut grid = Grid::new(config());
        grid.build_grid(dec!(100000.0));

        let prices: Vec<(GridSide, Decimal)> = grid.levels().iter().map(|l| (l.side, l.price)).collect();
        assert_eq!(
            prices,
            vec![
                (GridSide::Buy, dec!(99600.4)),
                (GridSide::Buy, dec!(99800.0)),
                (GridSide::Wait, dec!(100000.0)),
                (GridSide::Sell, dec!(100200.0)),
                (GridSide::Sell, dec!(100400.4)),
            ]
        );
        assert_eq!(grid.anchor_price(), Some(dec!(100000.0)));
    }

    #[test]
    fn zero_last_close_is_noop() {
        let mut grid = Grid::new(config());
        grid.build_grid(Decimal::ZERO);
        assert!(grid.is_empty());
    }

    #[test]
    fn is_grid_correct_after_build() {
        let mut grid = Grid::new(config());
        grid.build_grid(dec!(100000.0));
        assert!(grid.is_grid_correct());
    }

    #[test]
    fn update_grid_reassigns_sides() {
        let mut grid = Grid::new(config());
        grid.build_grid(dec!(100000.0));
        grid.update_grid(Some(dec!(99800.2)), Some(dec!(100050.0)));
        assert!(grid.is_grid_correct());
    }

    #[test]
    fn anchor_persists_across_rebalance() {
        let mut grid = Grid::new(config());
        grid.build_grid(dec!(100000.0));
        let anchor = grid.anchor_price();
        grid.update_grid(Some(dec!(99800.2)), Some(dec!(100050.0)));
        assert_eq!(grid.anchor_price(), anchor);
    }
}
