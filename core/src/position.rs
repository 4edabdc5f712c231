//! Dual-direction position tracker: weighted average entry, realized PnL on
//! reduce, cached margin snapshot, funding accrual.
//!
//! Ported near-verbatim from `BacktestPositionTracker`. Two trackers (long
//! and short) are owned by the same runner; each needs the other's
//! size/margin only to answer "what is the combined exposure" — passed as a
//! borrowed handle at the call site, never stored as a back-reference.

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

use crate::error::PositionError;
use crate::margin;
use crate::orderbook::Side;
use crate::risk_limits::TierTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionState {
    pub size: Decimal,
    pub avg_entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_percent: Decimal,
    pub commission_paid: Decimal,
    pub funding_paid: Decimal,
    pub position_value: Decimal,
    pub initial_margin: Decimal,
    pub imr_rate: Decimal,
    pub maintenance_margin: Decimal,
    pub mmr_rate: Decimal,
}

pub struct PositionTracker {
    pub direction: Direction,
    commission_rate: Decimal,
    leverage: Decimal,
    symbol: String,
    state: PositionState,
}

impl PositionTracker {
    pub fn new(direction: Direction, commission_rate: Decimal, leverage: Decimal, symbol: impl Into<String>) -> Self {
        Self {
            direction,
            commission_rate,
            leverage,
            symbol: symbol.into(),
            state: PositionState::default(),
        }
    }

    pub fn state(&self) -> &PositionState {
        &self.state
    }

    pub fn has_position(&self) -> bool {
        self.state.size > Decimal::ZERO
    }

    fn is_opening_fill(&self, side: Side) -> bool {
        match self.direction {
            Direction::Long => side == Side::Buy,
            Direction::Short => side == Side::Sell,
        }
    }

    /// Process a fill; returns the realized PnL from this fill (zero when
    /// opening/adding).
    pub fn process_fill(&mut self, side: Side, qty: Decimal, price: Decimal) -> Decimal {
        let commission = qty * price * self.commission_rate;
        self.state.commission_paid += commission;

        if self.is_opening_fill(side) {
            self.add_to_position(qty, price)
        } else {
            self.reduce_position(qty, price)
        }
    }

    fn add_to_position(&mut self, qty: Decimal, price: Decimal) -> Decimal {
        let old_value = self.state.size * self.state.avg_entry_price;
        let new_value = qty * price;
        self.state.size += qty;

        self.state.avg_entry_price = if self.state.size > Decimal::ZERO {
            (old_value + new_value) / self.state.size
        } else {
            Decimal::ZERO
        };

        Decimal::ZERO
    }

    fn reduce_position(&mut self, qty: Decimal, price: Decimal) -> Decimal {
        if self.state.size.is_zero() {
            return Decimal::ZERO;
        }

        let close_qty = qty.min(self.state.size);
        let realized = margin::unrealized_pnl(self.direction, self.state.avg_entry_price, price, close_qty);

        self.state.realized_pnl += realized;
        self.state.size -= close_qty;
        if self.state.size.is_zero() {
            self.state.avg_entry_price = Decimal::ZERO;
        }

        realized
    }

    /// Recompute unrealized PnL and cache the margin snapshot (position
    /// value, IM/imr, MM/mmr) against `tiers`.
    pub fn calculate_unrealized_pnl(&mut self, current_price: Decimal, tiers: &TierTable) -> Decimal {
        if self.state.size.is_zero() {
            self.state.unrealized_pnl = Decimal::ZERO;
            self.reset_margin();
            return Decimal::ZERO;
        }

        let unrealized =
            margin::unrealized_pnl(self.direction, self.state.avg_entry_price, current_price, self.state.size);
        self.state.unrealized_pnl = unrealized;
        self.update_margin(tiers);
        unrealized
    }

    fn update_margin(&mut self, tiers: &TierTable) {
        let pv = margin::position_value(self.state.size, self.state.avg_entry_price);
        self.state.position_value = pv;
        let (im, imr) = margin::initial_margin(pv, self.leverage, tiers);
        self.state.initial_margin = im;
        self.state.imr_rate = imr;
        let (mm, mmr) = margin::maintenance_margin(pv, tiers);
        self.state.maintenance_margin = mm;
        self.state.mmr_rate = mmr;
    }

    fn reset_margin(&mut self) {
        self.state.position_value = Decimal::ZERO;
        self.state.initial_margin = Decimal::ZERO;
        self.state.imr_rate = Decimal::ZERO;
        self.state.maintenance_margin = Decimal::ZERO;
        self.state.mmr_rate = Decimal::ZERO;
    }

    pub fn calculate_unrealized_pnl_percent(&mut self, current_price: Decimal) -> Decimal {
        if self.state.size.is_zero() || current_price.is_zero() || self.state.avg_entry_price.is_zero() {
            self.state.unrealized_pnl_percent = Decimal::ZERO;
            return Decimal::ZERO;
        }
        let pct = margin::unrealized_pnl_pct(self.direction, self.state.avg_entry_price, current_price, self.leverage);
        self.state.unrealized_pnl_percent = pct;
        pct
    }

    /// Credit/debit funding on the position notional. Returns the signed
    /// payment (negative = paid, positive = received).
    pub fn apply_funding(&mut self, rate: Decimal, current_price: Decimal) -> Decimal {
        if rate.abs() > dec!(0.01) {
            warn!(%rate, "unusually high funding rate");
        }
        if self.state.size.is_zero() {
            return Decimal::ZERO;
        }
        let payment = margin::funding_snapshot(self.direction, self.state.size, current_price, rate);
        self.state.funding_paid -= payment;
        payment
    }

    pub fn total_pnl(&self) -> Decimal {
        self.state.realized_pnl + self.state.unrealized_pnl - self.state.commission_paid - self.state.funding_paid
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn validate(&self) -> Result<(), PositionError> {
        if self.state.size < Decimal::ZERO {
            return Err(PositionError::OverReduction {
                requested: "n/a".into(),
                size: self.state.size.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers() -> TierTable {
        TierTable::hardcoded_btcusdt()
    }

    #[test]
    fn opening_fill_updates_weighted_entry() {
        let mut tracker = PositionTracker::new(Direction::Long, dec!(0.0002), dec!(10), "BTCUSDT");
        tracker.process_fill(Side::Buy, dec!(1), dec!(100));
        tracker.process_fill(Side::Buy, dec!(1), dec!(110));
        assert_eq!(tracker.state().avg_entry_price, dec!(105));
        assert_eq!(tracker.state().size, dec!(2));
    }

    #[test]
    fn reduce_realizes_pnl_and_resets_entry_at_zero() {
        let mut tracker = PositionTracker::new(Direction::Long, dec!(0.0002), dec!(10), "BTCUSDT");
        tracker.process_fill(Side::Buy, dec!(1), dec!(100));
        let realized = tracker.process_fill(Side::Sell, dec!(1), dec!(110));
        assert_eq!(realized, dec!(10));
        assert_eq!(tracker.state().size, Decimal::ZERO);
        assert_eq!(tracker.state().avg_entry_price, Decimal::ZERO);
    }

    #[test]
    fn reduce_clamps_to_position_size() {
        let mut tracker = PositionTracker::new(Direction::Long, dec!(0.0002), dec!(10), "BTCUSDT");
        tracker.process_fill(Side::Buy, dec!(1), dec!(100));
        let realized = tracker.process_fill(Side::Sell, dec!(5), dec!(110));
        assert_eq!(realized, dec!(10));
        assert_eq!(tracker.state().size, Decimal::ZERO);
    }

    #[test]
    fn funding_on_zero_size_has_no_effect() {
        let mut tracker = PositionTracker::new(Direction::Long, dec!(0.0002), dec!(10), "BTCUSDT");
        let payment = tracker.apply_funding(dec!(0.0001), dec!(100));
        assert_eq!(payment, Decimal::ZERO);
        assert_eq!(tracker.state().funding_paid, Decimal::ZERO);
    }

    #[test]
    fn size_never_negative() {
        let mut tracker = PositionTracker::new(Direction::Long, dec!(0.0002), dec!(10), "BTCUSDT");
        tracker.process_fill(Side::Sell, dec!(1), dec!(100));
        assert!(tracker.state().size >= Decimal::ZERO);
    }

    #[test]
    fn calculate_unrealized_pnl_caches_margin() {
        let mut tracker = PositionTracker::new(Direction::Long, dec!(0.0002), dec!(10), "BTCUSDT");
        tracker.process_fill(Side::Buy, dec!(1), dec!(100));
        tracker.calculate_unrealized_pnl(dec!(110), &tiers());
        assert!(tracker.state().position_value > Decimal::ZERO);
        assert!(tracker.state().initial_margin > Decimal::ZERO);
    }
}
