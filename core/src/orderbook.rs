//! Simulated resting-order book and the conservative trade-through fill rule.
//!
//! Ported from the teacher's simulated execution venue (queue/lifecycle
//! idiom), with the fill predicate rewritten to the grid validation
//! platform's conservative rule: a fill requires the observed last price to
//! *strictly cross* the resting limit, not merely touch it.

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::position::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SimulatedOrder {
    pub order_id: u64,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub direction: Direction,
    pub grid_level: i32,
    pub status: OrderStatus,
    pub created_ts: i64,
    pub filled_ts: Option<i64>,
    pub reduce_only: bool,
}

#[derive(Debug, Clone)]
pub struct ExecutionEvent {
    pub exec_id: u64,
    pub order_id: u64,
    pub order_link_id: String,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub fee: Decimal,
    pub closed_pnl: Decimal,
    pub leaves_qty: Decimal,
    pub direction: Direction,
    pub grid_level: i32,
}

/// A single-symbol simulated order manager: dedups on `client_order_id`
/// among active orders, fills conservatively, and frees the ID on terminal
/// transition so it can be reused by a later, distinct grid decision.
pub struct OrderBook {
    orders: Vec<SimulatedOrder>,
    next_order_id: u64,
    next_exec_id: u64,
    commission_rate: Decimal,
}

impl OrderBook {
    pub fn new(commission_rate: Decimal) -> Self {
        Self { orders: Vec::new(), next_order_id: 1, next_exec_id: 1, commission_rate }
    }

    fn active_has_client_order_id(&self, client_order_id: &str) -> bool {
        self.orders
            .iter()
            .any(|o| o.status == OrderStatus::Pending && o.client_order_id == client_order_id)
    }

    /// Place a resting order; rejects duplicate `client_order_id` among
    /// active orders by returning `None`.
    #[allow(clippy::too_many_arguments)]
    pub fn place(
        &mut self,
        client_order_id: String,
        symbol: String,
        side: Side,
        price: Decimal,
        qty: Decimal,
        direction: Direction,
        grid_level: i32,
        reduce_only: bool,
        created_ts: i64,
    ) -> Option<u64> {
        if self.active_has_client_order_id(&client_order_id) {
            return None;
        }
        let order_id = self.next_order_id;
        self.next_order_id += 1;
        self.orders.push(SimulatedOrder {
            order_id,
            client_order_id,
            symbol,
            side,
            price,
            qty,
            direction,
            grid_level,
            status: OrderStatus::Pending,
            created_ts,
            filled_ts: None,
            reduce_only,
        });
        Some(order_id)
    }

    /// Transition a pending order to cancelled, releasing its `client_order_id`.
    pub fn cancel(&mut self, order_id: u64) -> bool {
        if let Some(order) = self.orders.iter_mut().find(|o| o.order_id == order_id && o.status == OrderStatus::Pending) {
            order.status = OrderStatus::Cancelled;
            true
        } else {
            false
        }
    }

    /// Conservative trade-through fill rule: a resting Buy fills only when
    /// `current_price < limit`; a resting Sell fills only when
    /// `current_price > limit`. Touching the limit exactly never fills.
    fn fills_at(order: &SimulatedOrder, current_price: Decimal) -> bool {
        match order.side {
            Side::Buy => current_price < order.price,
            Side::Sell => current_price > order.price,
        }
    }

    /// Scan active orders at `current_price`, transition fills, and emit
    /// one `ExecutionEvent` per fill. Order-insensitive: each predicate
    /// depends only on the current price and its own limit.
    pub fn check_fills(&mut self, current_price: Decimal, ts: i64, symbol: Option<&str>) -> Vec<ExecutionEvent> {
        let mut events = Vec::new();
        for order in self.orders.iter_mut() {
            if order.status != OrderStatus::Pending {
                continue;
            }
            if let Some(symbol) = symbol {
                if order.symbol != symbol {
                    continue;
                }
            }
            if !Self::fills_at(order, current_price) {
                continue;
            }
            order.status = OrderStatus::Filled;
            order.filled_ts = Some(ts);
            let fee = order.qty * order.price * self.commission_rate;
            events.push(ExecutionEvent {
                exec_id: self.next_exec_id,
                order_id: order.order_id,
                order_link_id: order.client_order_id.clone(),
                side: order.side,
                price: order.price,
                qty: order.qty,
                fee,
                closed_pnl: Decimal::ZERO,
                leaves_qty: Decimal::ZERO,
                direction: order.direction,
                grid_level: order.grid_level,
            });
            self.next_exec_id += 1;
        }
        events
    }

    /// Active orders grouped by direction, mirroring the shape a live
    /// `get_open_orders` response would take.
    pub fn limit_orders_by_direction(&self, direction: Direction) -> Vec<&SimulatedOrder> {
        self.orders
            .iter()
            .filter(|o| o.status == OrderStatus::Pending && o.direction == direction)
            .collect()
    }

    pub fn active_orders(&self) -> impl Iterator<Item = &SimulatedOrder> {
        self.orders.iter().filter(|o| o.status == OrderStatus::Pending)
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new(dec!(0.0002))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conservative_buy_does_not_fill_at_exact_price() {
        let mut book = OrderBook::new(dec!(0.0002));
        book.place("abc".into(), "BTCUSDT".into(), Side::Buy, dec!(99800.2), dec!(0.1), Direction::Long, -1, false, 0);

        let events = book.check_fills(dec!(99800.2), 1, None);
        assert!(events.is_empty());

        let events = book.check_fills(dec!(99800.1), 2, None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].price, dec!(99800.2));
    }

    #[test]
    fn duplicate_client_order_id_rejected_while_pending() {
        let mut book = OrderBook::new(dec!(0.0002));
        let first = book.place("dup".into(), "BTCUSDT".into(), Side::Buy, dec!(100), dec!(1), Direction::Long, 0, false, 0);
        assert!(first.is_some());
        let second = book.place("dup".into(), "BTCUSDT".into(), Side::Buy, dec!(99), dec!(1), Direction::Long, 0, false, 0);
        assert!(second.is_none());
    }

    #[test]
    fn client_order_id_reusable_after_terminal_transition() {
        let mut book = OrderBook::new(dec!(0.0002));
        let id = book.place("reuse".into(), "BTCUSDT".into(), Side::Buy, dec!(100), dec!(1), Direction::Long, 0, false, 0).unwrap();
        book.cancel(id);
        let second = book.place("reuse".into(), "BTCUSDT".into(), Side::Sell, dec!(101), dec!(1), Direction::Long, 0, false, 0);
        assert!(second.is_some());
    }
}
