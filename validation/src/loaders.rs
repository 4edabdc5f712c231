//! Trade loaders for live and backtest data sources.
//!
//! Normalizes both sources into a common `NormalizedTrade` so the matcher
//! never has to special-case where a trade came from. Live executions are
//! partial fills and must be aggregated per order before comparison;
//! backtest trades are already one row per fill.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rusqlite::Connection;

use gridval_core::position::Direction;
use gridval_core::orderbook::Side;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSource {
    Live,
    Backtest,
}

#[derive(Debug, Clone)]
pub struct NormalizedTrade {
    pub client_order_id: String,
    /// Zero-based index of this trade among trades sharing `client_order_id`,
    /// assigned after sorting by `(timestamp, client_order_id, side)`.
    /// Disambiguates deterministic ID reuse once an order's lifecycle ends.
    pub occurrence: u32,
    pub symbol: String,
    pub side: Side,
    pub direction: Option<Direction>,
    pub price: Decimal,
    pub qty: Decimal,
    pub fee: Decimal,
    pub realized_pnl: Decimal,
    pub timestamp: i64,
    pub source: TradeSource,
}

/// Sort by `(timestamp, client_order_id, side)` and assign `occurrence` per
/// `client_order_id` in that order. Two trades sharing the exact same
/// `(timestamp, client_order_id, side)` get an order that is stable but
/// otherwise arbitrary between the two sources — an unlikely collision
/// since it requires the same deterministic ID reused within one millisecond.
fn assign_occurrences(trades: &mut Vec<NormalizedTrade>) {
    trades.sort_by(|a, b| (a.timestamp, &a.client_order_id, a.side as u8).cmp(&(b.timestamp, &b.client_order_id, b.side as u8)));
    let mut counts: HashMap<String, u32> = HashMap::new();
    for trade in trades.iter_mut() {
        let count = counts.entry(trade.client_order_id.clone()).or_insert(0);
        trade.occurrence = *count;
        *count += 1;
    }
}

struct RawExecutionRow {
    order_link_id: String,
    order_id: String,
    symbol: String,
    side: Side,
    price: Decimal,
    qty: Decimal,
    fee: Decimal,
    closed_pnl: Decimal,
    exchange_ts: i64,
}

fn parse_side(raw: &str) -> Side {
    match raw {
        "Buy" => Side::Buy,
        _ => Side::Sell,
    }
}

/// Loads `private_executions` rows for a run and aggregates partial fills
/// into one `NormalizedTrade` per `(order_link_id, order_id)` pair — same
/// `order_link_id` with a different `order_id` is lifecycle reuse, not a
/// partial fill, and stays a separate trade.
pub struct LiveTradeLoader<'a> {
    conn: &'a Connection,
}

impl<'a> LiveTradeLoader<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn load(&self, run_id: &str, symbol: Option<&str>) -> Result<Vec<NormalizedTrade>, ValidationError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT order_link_id, order_id, symbol, side, price, qty, fee, closed_pnl, exchange_ts
                 FROM private_executions WHERE run_id = ?1 AND (?2 IS NULL OR symbol = ?2)
                 ORDER BY exchange_ts",
            )
            .map_err(ValidationError::Repository)?;

        let rows = stmt
            .query_map(rusqlite::params![run_id, symbol], |row| {
                Ok(RawExecutionRow {
                    order_link_id: row.get(0)?,
                    order_id: row.get(1)?,
                    symbol: row.get(2)?,
                    side: parse_side(&row.get::<_, String>(3)?),
                    price: row.get::<_, String>(4)?.parse().unwrap_or_default(),
                    qty: row.get::<_, String>(5)?.parse().unwrap_or_default(),
                    fee: row.get::<_, String>(6)?.parse().unwrap_or_default(),
                    closed_pnl: row.get::<_, String>(7)?.parse().unwrap_or_default(),
                    exchange_ts: row.get(8)?,
                })
            })
            .map_err(ValidationError::Repository)?;

        let mut grouped: HashMap<(String, String), Vec<RawExecutionRow>> = HashMap::new();
        for row in rows {
            let row = row.map_err(ValidationError::Repository)?;
            if row.order_link_id.is_empty() {
                continue;
            }
            grouped.entry((row.order_link_id.clone(), row.order_id.clone())).or_default().push(row);
        }

        let mut trades: Vec<NormalizedTrade> = grouped
            .into_values()
            .map(|fills| Self::aggregate_fills(fills))
            .collect();
        assign_occurrences(&mut trades);
        Ok(trades)
    }

    /// VWAP price, summed qty/fee/pnl, latest timestamp across partial fills.
    /// Direction is inferred from the sign of the aggregated closed PnL: a
    /// non-zero PnL means the fill closed a position. Break-even closes
    /// (`closed_pnl == 0`) are indistinguishable from an opening trade by
    /// this rule alone — the matcher prefers the backtest-side direction
    /// when a pair is matched, since that one is always correct.
    fn aggregate_fills(fills: Vec<RawExecutionRow>) -> NormalizedTrade {
        let mut total_qty = Decimal::ZERO;
        let mut total_notional = Decimal::ZERO;
        let mut total_fee = Decimal::ZERO;
        let mut total_pnl = Decimal::ZERO;
        let mut latest_ts = fills[0].exchange_ts;
        let side = fills[0].side;
        let symbol = fills[0].symbol.clone();
        let client_order_id = fills[0].order_link_id.clone();

        for fill in &fills {
            total_qty += fill.qty;
            total_notional += fill.price * fill.qty;
            total_fee += fill.fee;
            total_pnl += fill.closed_pnl;
            latest_ts = latest_ts.max(fill.exchange_ts);
        }

        let vwap_price = if total_qty.is_zero() { Decimal::ZERO } else { total_notional / total_qty };
        let is_closing = !total_pnl.is_zero();
        let direction = if is_closing {
            Some(if side == Side::Buy { Direction::Short } else { Direction::Long })
        } else {
            Some(if side == Side::Buy { Direction::Long } else { Direction::Short })
        };

        NormalizedTrade {
            client_order_id,
            occurrence: 0,
            symbol,
            side,
            direction,
            price: vwap_price,
            qty: total_qty,
            fee: total_fee,
            realized_pnl: total_pnl,
            timestamp: latest_ts,
            source: TradeSource::Live,
        }
    }
}

/// One row per fill, already normalized — just sorts and tags occurrences.
pub struct BacktestTradeLoader;

impl BacktestTradeLoader {
    pub fn load_from_trades(trades: &[crate::session::BacktestTrade]) -> Vec<NormalizedTrade> {
        let mut normalized: Vec<NormalizedTrade> = trades
            .iter()
            .map(|t| NormalizedTrade {
                client_order_id: t.client_order_id.clone(),
                occurrence: 0,
                symbol: t.symbol.clone(),
                side: t.side,
                direction: Some(t.direction),
                price: t.price,
                qty: t.qty,
                fee: t.commission,
                realized_pnl: t.realized_pnl,
                timestamp: t.timestamp,
                source: TradeSource::Backtest,
            })
            .collect();
        assign_occurrences(&mut normalized);
        normalized
    }

    /// Sorts and assigns `occurrence` for trades built outside this loader
    /// (e.g. parsed from an exported CSV), applying the same rule as
    /// `load_from_trades`.
    pub fn assign_occurrences(trades: &mut Vec<NormalizedTrade>) {
        assign_occurrences(trades);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(client_order_id: &str, ts: i64, source: TradeSource) -> NormalizedTrade {
        NormalizedTrade {
            client_order_id: client_order_id.to_string(),
            occurrence: 0,
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            direction: Some(Direction::Long),
            price: Decimal::ZERO,
            qty: Decimal::ZERO,
            fee: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            timestamp: ts,
            source,
        }
    }

    #[test]
    fn occurrence_assigned_per_client_order_id_in_timestamp_order() {
        let mut trades = vec![
            trade("a", 2, TradeSource::Backtest),
            trade("a", 1, TradeSource::Backtest),
            trade("b", 1, TradeSource::Backtest),
        ];
        assign_occurrences(&mut trades);
        let a_occurrences: Vec<u32> = trades.iter().filter(|t| t.client_order_id == "a").map(|t| t.occurrence).collect();
        assert_eq!(a_occurrences, vec![0, 1]);
    }
}
