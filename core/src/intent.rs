//! Intent engine: diffs grid state against observed open orders and emits
//! place/cancel intents.
//!
//! No direct original-source file is in the kept retrieval pack for this
//! component; built from the grid engine's level model and the simulated
//! order book's order shape per the documented algorithm.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::decimal::round_to_tick;
use crate::grid::{Grid, GridLevel, GridSide};
use crate::identity::client_order_id;
use crate::orderbook::Side;
use crate::position::Direction;

#[derive(Debug, Clone)]
pub struct PlaceLimitIntent {
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub grid_level: i32,
    pub direction: Direction,
    pub client_order_id: String,
    pub reduce_only: bool,
}

#[derive(Debug, Clone)]
pub enum CancelReason {
    SideDisagreement,
    PriceNotInGrid,
    RebuildOverflow,
}

#[derive(Debug, Clone)]
pub struct CancelIntent {
    pub symbol: String,
    pub order_id: u64,
    pub reason: CancelReason,
}

/// The minimum an observed open order needs to be diffed against the grid.
#[derive(Debug, Clone, Copy)]
pub struct ObservedOrder {
    pub order_id: u64,
    pub side: Side,
    pub price: Decimal,
    pub direction: Direction,
}

/// Computes a per-level grid index suitable for the `client_order_id`
/// digest: distance (signed) from the `Wait` center, negative below it.
fn grid_level_index(levels: &[GridLevel], position: usize) -> i32 {
    let wait_index = levels.iter().position(|l| l.side == GridSide::Wait).unwrap_or(levels.len() / 2);
    position as i32 - wait_index as i32
}

fn level_side(side: GridSide) -> Option<Side> {
    match side {
        GridSide::Buy => Some(Side::Buy),
        GridSide::Sell => Some(Side::Sell),
        GridSide::Wait => None,
    }
}

fn is_too_close_to_last_close(price: Decimal, last_close: Decimal, grid_step_pct: Decimal) -> bool {
    if last_close.is_zero() {
        return false;
    }
    ((price - last_close).abs() / last_close * dec!(100)) <= grid_step_pct / dec!(2)
}

/// Run the intent engine for one tick. `grid` is updated in place via its
/// own `build_grid`/`update_grid` before this is called; this function only
/// diffs the resulting levels against `observed_orders`.
#[allow(clippy::too_many_arguments)]
pub fn compute_intents(
    grid: &Grid,
    strat_id: &str,
    symbol: &str,
    direction: Direction,
    tick_size: Decimal,
    grid_step_pct: Decimal,
    last_close: Decimal,
    observed_orders: &[ObservedOrder],
    grid_count: usize,
) -> (Vec<PlaceLimitIntent>, Vec<CancelIntent>) {
    let mut places = Vec::new();
    let mut cancels = Vec::new();

    let observed_in_direction: Vec<&ObservedOrder> =
        observed_orders.iter().filter(|o| o.direction == direction).collect();

    if observed_in_direction.len() > grid_count + 10 {
        for order in &observed_in_direction {
            cancels.push(CancelIntent {
                symbol: symbol.to_string(),
                order_id: order.order_id,
                reason: CancelReason::RebuildOverflow,
            });
        }
        return (places, cancels);
    }

    let levels = grid.levels();
    let wait_index = levels.iter().position(|l| l.side == GridSide::Wait).unwrap_or(levels.len() / 2);

    let mut order_by_rounded_price: Vec<(Decimal, &ObservedOrder)> = observed_in_direction
        .iter()
        .map(|o| (round_to_tick(o.price, tick_size), *o))
        .collect();

    // Process levels nearest the `Wait` center first, so a rate-limited or
    // partially-executed tick places/cancels the highest-priority intents
    // before running out of budget. Ties (symmetric levels equidistant from
    // the center) are broken by price.
    let mut processing_order: Vec<usize> = (0..levels.len()).collect();
    processing_order.sort_by_key(|&i| ((i as i32 - wait_index as i32).abs(), levels[i].price));

    for i in processing_order {
        let level = &levels[i];
        let Some(side) = level_side(level.side) else { continue };
        let level_price = round_to_tick(level.price, tick_size);
        let grid_level = grid_level_index(levels, i);
        let coid = client_order_id(strat_id, symbol, level.side, grid_level, level_price, direction);

        if let Some(pos) = order_by_rounded_price.iter().position(|(p, _)| *p == level_price) {
            let (_, observed) = order_by_rounded_price.remove(pos);
            if observed.side != side {
                cancels.push(CancelIntent {
                    symbol: symbol.to_string(),
                    order_id: observed.order_id,
                    reason: CancelReason::SideDisagreement,
                });
            }
            continue;
        }

        if is_too_close_to_last_close(level_price, last_close, grid_step_pct) {
            continue;
        }
        match (side, last_close) {
            (Side::Buy, lc) if level_price >= lc => continue,
            (Side::Sell, lc) if level_price <= lc => continue,
            _ => {}
        }

        places.push(PlaceLimitIntent {
            symbol: symbol.to_string(),
            side,
            price: level_price,
            qty: Decimal::ZERO,
            grid_level,
            direction,
            client_order_id: coid,
            reduce_only: false,
        });
    }

    // Any remaining observed order had no matching level price in the
    // current grid — cancel it.
    for (_, observed) in order_by_rounded_price {
        cancels.push(CancelIntent {
            symbol: symbol.to_string(),
            order_id: observed.order_id,
            reason: CancelReason::PriceNotInGrid,
        });
    }

    (places, cancels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridConfig;

    #[test]
    fn emits_places_for_uncovered_levels() {
        let mut grid = Grid::new(GridConfig { tick_size: dec!(0.1), grid_count: 4, grid_step_pct: dec!(0.2), rebalance_threshold: dec!(0.3) });
        grid.build_grid(dec!(100000.0));

        let (places, cancels) = compute_intents(
            &grid,
            "btc_main",
            "BTCUSDT",
            Direction::Long,
            dec!(0.1),
            dec!(0.2),
            dec!(100000.0),
            &[],
            4,
        );

        assert!(cancels.is_empty());
        // Buy levels are not placed when their price is >= last_close (wrong side check
        // trivially false here since they're below); both buys and sells eligible except
        // anything "too close".
        assert!(!places.is_empty());
    }

    #[test]
    fn cancels_order_with_disagreeing_side() {
        let mut grid = Grid::new(GridConfig { tick_size: dec!(0.1), grid_count: 4, grid_step_pct: dec!(0.2), rebalance_threshold: dec!(0.3) });
        grid.build_grid(dec!(100000.0));

        let observed = vec![ObservedOrder {
            order_id: 1,
            side: Side::Sell,
            price: dec!(99800.0),
            direction: Direction::Long,
        }];

        let (_, cancels) = compute_intents(
            &grid,
            "btc_main",
            "BTCUSDT",
            Direction::Long,
            dec!(0.1),
            dec!(0.2),
            dec!(100000.0),
            &observed,
            4,
        );

        assert!(cancels.iter().any(|c| c.order_id == 1));
    }
}
