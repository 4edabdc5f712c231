//! `ExchangeAdapter`: the boundary between the core and a real exchange's
//! wire format. The adapter owns no trading logic — it normalizes inbound
//! messages into [`ExchangeEvent`]s pushed onto a bounded mailbox, and
//! exposes a narrow set of outbound async operations. Swappable: the
//! collectors, driver and executor only ever depend on this trait.

pub mod bybit;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::error::ExchangeError;
use crate::orderbook::Side;
use crate::position::Direction;

#[derive(Debug, Clone)]
pub struct TickerEvent {
    pub symbol: String,
    pub exchange_ts: i64,
    pub local_ts: i64,
    pub last_price: Decimal,
    pub mark_price: Decimal,
    pub bid1: Decimal,
    pub ask1: Decimal,
    pub funding_rate: Decimal,
}

#[derive(Debug, Clone)]
pub struct PublicTradeEvent {
    pub symbol: String,
    pub trade_id: String,
    pub exchange_ts: i64,
    pub local_ts: i64,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone)]
pub struct RawExecutionEvent {
    pub symbol: String,
    pub exec_id: String,
    pub order_id: String,
    pub order_link_id: String,
    pub exchange_ts: i64,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub fee: Decimal,
    pub closed_pnl: Decimal,
    pub leaves_qty: Decimal,
}

#[derive(Debug, Clone)]
pub struct OrderUpdateEvent {
    pub symbol: String,
    pub order_id: String,
    pub order_link_id: String,
    pub exchange_ts: i64,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub direction: Direction,
    pub size: Decimal,
    pub avg_entry_price: Decimal,
    pub position_idx: u8,
}

#[derive(Debug, Clone)]
pub struct WalletSnapshot {
    pub coin: String,
    pub wallet_balance: Decimal,
    pub available_balance: Decimal,
}

/// A single normalized inbound message. Each `ExchangeAdapter` implementation
/// pushes these onto the mailbox it was handed in `run`, rather than
/// invoking per-topic callbacks directly — the mailbox *is* the callback
/// registration, expressed as an independent task connected by a bounded
/// channel.
#[derive(Debug, Clone)]
pub enum ExchangeEvent {
    Ticker(TickerEvent),
    PublicTrade(PublicTradeEvent),
    Execution(RawExecutionEvent),
    Order(OrderUpdateEvent),
    Position(PositionSnapshot),
    Wallet(WalletSnapshot),
    Disconnected { ts: i64 },
    Reconnected { disconnected_at: i64, reconnected_at: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
}

/// Hedge-mode long=1, short=2; one-way=0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionIdx {
    OneWay,
    HedgeLong,
    HedgeShort,
}

impl PositionIdx {
    pub fn as_u8(self) -> u8 {
        match self {
            PositionIdx::OneWay => 0,
            PositionIdx::HedgeLong => 1,
            PositionIdx::HedgeShort => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlaceOrderCommand {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: Decimal,
    pub price: Option<Decimal>,
    pub reduce_only: bool,
    pub position_idx: PositionIdx,
    pub order_link_id: String,
}

#[derive(Debug, Clone)]
pub struct PlaceOrderAck {
    pub order_id: String,
}

#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: String,
    pub order_link_id: String,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
}

/// One raw `(max_notional, mmr_rate, mm_deduction, imr_rate)` row as returned
/// by the exchange's risk-limit endpoint, before being folded into a
/// [`crate::risk_limits::TierTable`].
#[derive(Debug, Clone)]
pub struct RawTierRow {
    pub max_notional: Decimal,
    pub mmr_rate: Decimal,
    pub mm_deduction: Decimal,
    pub imr_rate: Decimal,
}

#[derive(Debug, Clone)]
pub struct TransactionRow {
    pub symbol: String,
    pub ts: i64,
    pub log_type: String,
    pub amount: Decimal,
}

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Connect and stream normalized events onto `events` until the
    /// connection is intentionally stopped or fails fatally. Implementations
    /// run their own reconnect/backoff loop internally and emit
    /// `Disconnected`/`Reconnected` events rather than returning on a
    /// transient drop.
    async fn run(&self, events: mpsc::Sender<ExchangeEvent>) -> Result<(), ExchangeError>;

    async fn place_order(&self, cmd: PlaceOrderCommand) -> Result<PlaceOrderAck, ExchangeError>;
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<bool, ExchangeError>;
    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError>;
    async fn get_positions(&self, symbol: &str) -> Result<Vec<PositionSnapshot>, ExchangeError>;
    async fn get_risk_limit(&self, symbol: &str) -> Result<Vec<RawTierRow>, ExchangeError>;
    async fn get_transaction_log(
        &self,
        symbol: &str,
        log_type: &str,
        max_pages: u32,
    ) -> Result<(Vec<TransactionRow>, bool), ExchangeError>;
}
