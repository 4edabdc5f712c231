//! Matches live and backtest trades by their deterministic `client_order_id`.
//!
//! The composite key is `(client_order_id, occurrence)`, not price/qty/time —
//! matching by the deterministic ID is the primary contract; any price or
//! quantity equality between matched pairs is a consequence of the engine
//! being correct, not the matching criterion itself.

use std::collections::HashMap;

use crate::loaders::NormalizedTrade;

#[derive(Debug)]
pub struct MatchedTrade {
    pub live: NormalizedTrade,
    pub backtest: NormalizedTrade,
}

#[derive(Debug, Default)]
pub struct MatchResult {
    pub matched: Vec<MatchedTrade>,
    pub live_only: Vec<NormalizedTrade>,
    pub backtest_only: Vec<NormalizedTrade>,
}

#[derive(Default)]
pub struct TradeMatcher;

impl TradeMatcher {
    pub fn new() -> Self {
        Self
    }

    pub fn match_trades(&self, live: Vec<NormalizedTrade>, backtest: Vec<NormalizedTrade>) -> MatchResult {
        let mut backtest_by_key: HashMap<(String, u32), NormalizedTrade> =
            backtest.into_iter().map(|t| ((t.client_order_id.clone(), t.occurrence), t)).collect();

        let mut result = MatchResult::default();
        for live_trade in live {
            let key = (live_trade.client_order_id.clone(), live_trade.occurrence);
            match backtest_by_key.remove(&key) {
                Some(backtest_trade) => result.matched.push(MatchedTrade { live: live_trade, backtest: backtest_trade }),
                None => result.live_only.push(live_trade),
            }
        }
        result.backtest_only = backtest_by_key.into_values().collect();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loaders::TradeSource;
    use gridval_core::orderbook::Side;
    use rust_decimal::Decimal;

    fn trade(client_order_id: &str, occurrence: u32, source: TradeSource) -> NormalizedTrade {
        NormalizedTrade {
            client_order_id: client_order_id.to_string(),
            occurrence,
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            direction: None,
            price: Decimal::ZERO,
            qty: Decimal::ZERO,
            fee: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            timestamp: 0,
            source,
        }
    }

    #[test]
    fn matches_on_client_order_id_and_occurrence() {
        let live = vec![trade("a", 0, TradeSource::Live), trade("b", 0, TradeSource::Live)];
        let backtest = vec![trade("a", 0, TradeSource::Backtest)];

        let result = TradeMatcher::new().match_trades(live, backtest);

        assert_eq!(result.matched.len(), 1);
        assert_eq!(result.live_only.len(), 1);
        assert_eq!(result.live_only[0].client_order_id, "b");
        assert!(result.backtest_only.is_empty());
    }

    #[test]
    fn backtest_only_trades_are_phantoms() {
        let live = vec![trade("a", 0, TradeSource::Live)];
        let backtest = vec![trade("a", 0, TradeSource::Backtest), trade("c", 0, TradeSource::Backtest)];

        let result = TradeMatcher::new().match_trades(live, backtest);

        assert_eq!(result.matched.len(), 1);
        assert_eq!(result.backtest_only.len(), 1);
        assert_eq!(result.backtest_only[0].client_order_id, "c");
    }

    #[test]
    fn distinct_occurrences_of_the_same_id_do_not_cross_match() {
        let live = vec![trade("a", 0, TradeSource::Live), trade("a", 1, TradeSource::Live)];
        let backtest = vec![trade("a", 0, TradeSource::Backtest)];

        let result = TradeMatcher::new().match_trades(live, backtest);

        assert_eq!(result.matched.len(), 1);
        assert_eq!(result.live_only.len(), 1);
        assert_eq!(result.live_only[0].occurrence, 1);
    }
}
