//! Bybit v5 linear-perpetual `ExchangeAdapter`: WS streams for ticker/trade
//! (public) and execution/order/position/wallet (private), HMAC-SHA256
//! request signing for REST calls.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::error::ExchangeError;
use crate::orderbook::Side;
use crate::position::Direction;

use super::{
    ExchangeAdapter, ExchangeEvent, OpenOrder, PlaceOrderAck, PlaceOrderCommand, PositionSnapshot,
    PublicTradeEvent, RawExecutionEvent, RawTierRow, TickerEvent, TransactionRow,
};

pub struct BybitAdapter {
    symbol: String,
    ws_public_url: String,
    ws_private_url: String,
    rest_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    http: reqwest::Client,
}

impl BybitAdapter {
    pub fn new(
        symbol: impl Into<String>,
        ws_public_url: impl Into<String>,
        ws_private_url: impl Into<String>,
        rest_url: impl Into<String>,
        api_key: Option<String>,
        api_secret: Option<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            ws_public_url: ws_public_url.into(),
            ws_private_url: ws_private_url.into(),
            rest_url: rest_url.into(),
            api_key,
            api_secret,
            http: reqwest::Client::new(),
        }
    }

    fn now_ms() -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis() as i64
    }

    fn sign(&self, payload: &str) -> Result<String, ExchangeError> {
        let secret = self.api_secret.as_deref().ok_or_else(|| ExchangeError::Signing("no api secret configured".into()))?;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Sign a private REST GET with Bybit's v5 header scheme:
    /// `sign(timestamp + api_key + recv_window + query_string)`.
    fn signed_headers(&self, query_string: &str) -> Result<(String, String, String), ExchangeError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| ExchangeError::Signing("no api key configured".into()))?;
        let ts = Self::now_ms().to_string();
        let recv_window = "5000";
        let payload = format!("{ts}{api_key}{recv_window}{query_string}");
        let signature = self.sign(&payload)?;
        Ok((ts, recv_window.to_string(), signature))
    }

    async fn public_get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ExchangeError> {
        let url = format!("{}{}", self.rest_url, path);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        resp.json::<Value>().await.map_err(|e| ExchangeError::Transport(e.to_string()))
    }

    async fn private_get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ExchangeError> {
        let query_string = query.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
        let (ts, recv_window, signature) = self.signed_headers(&query_string)?;
        let url = format!("{}{}", self.rest_url, path);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .header("X-BAPI-API-KEY", self.api_key.as_deref().unwrap_or_default())
            .header("X-BAPI-TIMESTAMP", ts)
            .header("X-BAPI-RECV-WINDOW", recv_window)
            .header("X-BAPI-SIGN", signature)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        resp.json::<Value>().await.map_err(|e| ExchangeError::Transport(e.to_string()))
    }

    async fn private_post(&self, path: &str, body: &Value) -> Result<Value, ExchangeError> {
        let body_string = body.to_string();
        let (ts, recv_window, signature) = self.signed_headers(&body_string)?;
        let url = format!("{}{}", self.rest_url, path);
        let resp = self
            .http
            .post(&url)
            .header("X-BAPI-API-KEY", self.api_key.as_deref().unwrap_or_default())
            .header("X-BAPI-TIMESTAMP", ts)
            .header("X-BAPI-RECV-WINDOW", recv_window)
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(body_string)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        resp.json::<Value>().await.map_err(|e| ExchangeError::Transport(e.to_string()))
    }

    fn parse_decimal(v: &Value) -> Decimal {
        v.as_str().and_then(|s| s.parse().ok()).unwrap_or(Decimal::ZERO)
    }

    fn parse_side(v: &Value) -> Side {
        match v.as_str() {
            Some("Sell") => Side::Sell,
            _ => Side::Buy,
        }
    }

    fn normalize_public(symbol: &str, msg: &Value) -> Vec<ExchangeEvent> {
        let topic = msg.get("topic").and_then(Value::as_str).unwrap_or_default();
        let local_ts = Self::now_ms();
        let mut out = Vec::new();

        if topic.starts_with("tickers") {
            if let Some(data) = msg.get("data") {
                out.push(ExchangeEvent::Ticker(TickerEvent {
                    symbol: symbol.to_string(),
                    exchange_ts: msg.get("ts").and_then(Value::as_i64).unwrap_or(local_ts),
                    local_ts,
                    last_price: Self::parse_decimal(data.get("lastPrice").unwrap_or(&Value::Null)),
                    mark_price: Self::parse_decimal(data.get("markPrice").unwrap_or(&Value::Null)),
                    bid1: Self::parse_decimal(data.get("bid1Price").unwrap_or(&Value::Null)),
                    ask1: Self::parse_decimal(data.get("ask1Price").unwrap_or(&Value::Null)),
                    funding_rate: Self::parse_decimal(data.get("fundingRate").unwrap_or(&Value::Null)),
                }));
            }
        } else if topic.starts_with("publicTrade") {
            if let Some(rows) = msg.get("data").and_then(Value::as_array) {
                for row in rows {
                    out.push(ExchangeEvent::PublicTrade(PublicTradeEvent {
                        symbol: symbol.to_string(),
                        trade_id: row.get("i").and_then(Value::as_str).unwrap_or_default().to_string(),
                        exchange_ts: row.get("T").and_then(Value::as_i64).unwrap_or(local_ts),
                        local_ts,
                        side: Self::parse_side(row.get("S").unwrap_or(&Value::Null)),
                        price: Self::parse_decimal(row.get("p").unwrap_or(&Value::Null)),
                        size: Self::parse_decimal(row.get("v").unwrap_or(&Value::Null)),
                    }));
                }
            }
        }
        out
    }

    fn normalize_private(symbol_filter: &str, msg: &Value) -> Vec<ExchangeEvent> {
        let topic = msg.get("topic").and_then(Value::as_str).unwrap_or_default();
        let mut out = Vec::new();
        let Some(rows) = msg.get("data").and_then(Value::as_array) else { return out };

        for row in rows {
            let symbol = row.get("symbol").and_then(Value::as_str).unwrap_or_default();
            if !symbol_filter.is_empty() && symbol != symbol_filter {
                continue;
            }
            match topic {
                "execution" => out.push(ExchangeEvent::Execution(RawExecutionEvent {
                    symbol: symbol.to_string(),
                    exec_id: row.get("execId").and_then(Value::as_str).unwrap_or_default().to_string(),
                    order_id: row.get("orderId").and_then(Value::as_str).unwrap_or_default().to_string(),
                    order_link_id: row.get("orderLinkId").and_then(Value::as_str).unwrap_or_default().to_string(),
                    exchange_ts: row.get("execTime").and_then(Value::as_str).and_then(|s| s.parse().ok()).unwrap_or(0),
                    side: Self::parse_side(row.get("side").unwrap_or(&Value::Null)),
                    price: Self::parse_decimal(row.get("execPrice").unwrap_or(&Value::Null)),
                    qty: Self::parse_decimal(row.get("execQty").unwrap_or(&Value::Null)),
                    fee: Self::parse_decimal(row.get("execFee").unwrap_or(&Value::Null)),
                    closed_pnl: Self::parse_decimal(row.get("closedPnl").unwrap_or(&Value::Null)),
                    leaves_qty: Self::parse_decimal(row.get("leavesQty").unwrap_or(&Value::Null)),
                })),
                "position" => {
                    let direction = if Self::parse_decimal(row.get("size").unwrap_or(&Value::Null)) >= Decimal::ZERO
                        && row.get("side").and_then(Value::as_str) == Some("Sell")
                    {
                        Direction::Short
                    } else {
                        Direction::Long
                    };
                    out.push(ExchangeEvent::Position(PositionSnapshot {
                        symbol: symbol.to_string(),
                        direction,
                        size: Self::parse_decimal(row.get("size").unwrap_or(&Value::Null)),
                        avg_entry_price: Self::parse_decimal(row.get("avgPrice").unwrap_or(&Value::Null)),
                        position_idx: row.get("positionIdx").and_then(Value::as_u64).unwrap_or(0) as u8,
                    }));
                }
                _ => {}
            }
        }
        out
    }

    async fn run_public(&self, events: mpsc::Sender<ExchangeEvent>) -> Result<(), ExchangeError> {
        let (ws, _) = tokio_tungstenite::connect_async(&self.ws_public_url)
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let sub = json!({ "op": "subscribe", "args": [format!("tickers.{}", self.symbol), format!("publicTrade.{}", self.symbol)] });
        write.send(Message::Text(sub.to_string())).await.map_err(|e| ExchangeError::Transport(e.to_string()))?;

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| ExchangeError::Transport(e.to_string()))?;
            let Message::Text(text) = msg else { continue };
            let Ok(value) = serde_json::from_str::<Value>(&text) else { continue };
            for event in Self::normalize_public(&self.symbol, &value) {
                if events.send(event).await.is_err() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn run_private(&self, events: mpsc::Sender<ExchangeEvent>) -> Result<(), ExchangeError> {
        let (ws, _) = tokio_tungstenite::connect_async(&self.ws_private_url)
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let expires = Self::now_ms() + 10_000;
        let auth_payload = format!("GET/realtime{expires}");
        let signature = self.sign(&auth_payload)?;
        let auth = json!({
            "op": "auth",
            "args": [self.api_key.as_deref().unwrap_or_default(), expires, signature],
        });
        write.send(Message::Text(auth.to_string())).await.map_err(|e| ExchangeError::Transport(e.to_string()))?;

        let sub = json!({ "op": "subscribe", "args": ["execution", "order", "position", "wallet"] });
        write.send(Message::Text(sub.to_string())).await.map_err(|e| ExchangeError::Transport(e.to_string()))?;

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| ExchangeError::Transport(e.to_string()))?;
            let Message::Text(text) = msg else { continue };
            let Ok(value) = serde_json::from_str::<Value>(&text) else { continue };
            for event in Self::normalize_private(&self.symbol, &value) {
                if events.send(event).await.is_err() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    async fn run(&self, events: mpsc::Sender<ExchangeEvent>) -> Result<(), ExchangeError> {
        info!(symbol = %self.symbol, "starting bybit adapter");
        let public = self.run_public(events.clone());
        let private = self.run_private(events);
        let (pub_res, priv_res) = tokio::join!(public, private);
        pub_res?;
        priv_res?;
        Ok(())
    }

    async fn place_order(&self, cmd: PlaceOrderCommand) -> Result<PlaceOrderAck, ExchangeError> {
        let body = json!({
            "category": "linear",
            "symbol": cmd.symbol,
            "side": cmd.side.to_string(),
            "orderType": if cmd.order_type == super::OrderType::Limit { "Limit" } else { "Market" },
            "qty": cmd.qty.to_string(),
            "price": cmd.price.map(|p| p.to_string()),
            "reduceOnly": cmd.reduce_only,
            "positionIdx": cmd.position_idx.as_u8(),
            "orderLinkId": cmd.order_link_id,
        });
        let resp = self.private_post("/v5/order/create", &body).await?;
        let ret_code = resp.get("retCode").and_then(Value::as_i64).unwrap_or(-1);
        if ret_code != 0 {
            return Err(ExchangeError::Rejected(resp.get("retMsg").and_then(Value::as_str).unwrap_or("unknown").to_string()));
        }
        let order_id = resp
            .get("result")
            .and_then(|r| r.get("orderId"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(PlaceOrderAck { order_id })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<bool, ExchangeError> {
        let body = json!({ "category": "linear", "symbol": symbol, "orderId": order_id });
        let resp = self.private_post("/v5/order/cancel", &body).await?;
        Ok(resp.get("retCode").and_then(Value::as_i64).unwrap_or(-1) == 0)
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        let resp = self.private_get("/v5/order/realtime", &[("category", "linear".into()), ("symbol", symbol.into())]).await?;
        let rows = resp.get("result").and_then(|r| r.get("list")).and_then(Value::as_array).cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .map(|row| OpenOrder {
                order_id: row.get("orderId").and_then(Value::as_str).unwrap_or_default().to_string(),
                order_link_id: row.get("orderLinkId").and_then(Value::as_str).unwrap_or_default().to_string(),
                side: Self::parse_side(row.get("side").unwrap_or(&Value::Null)),
                price: Self::parse_decimal(row.get("price").unwrap_or(&Value::Null)),
                qty: Self::parse_decimal(row.get("qty").unwrap_or(&Value::Null)),
            })
            .collect())
    }

    async fn get_positions(&self, symbol: &str) -> Result<Vec<PositionSnapshot>, ExchangeError> {
        let resp = self.private_get("/v5/position/list", &[("category", "linear".into()), ("symbol", symbol.into())]).await?;
        let rows = resp.get("result").and_then(|r| r.get("list")).and_then(Value::as_array).cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .map(|row| PositionSnapshot {
                symbol: symbol.to_string(),
                direction: if row.get("side").and_then(Value::as_str) == Some("Sell") { Direction::Short } else { Direction::Long },
                size: Self::parse_decimal(row.get("size").unwrap_or(&Value::Null)),
                avg_entry_price: Self::parse_decimal(row.get("avgPrice").unwrap_or(&Value::Null)),
                position_idx: row.get("positionIdx").and_then(Value::as_u64).unwrap_or(0) as u8,
            })
            .collect())
    }

    async fn get_risk_limit(&self, symbol: &str) -> Result<Vec<RawTierRow>, ExchangeError> {
        let resp = self.public_get("/v5/market/risk-limit", &[("category", "linear".into()), ("symbol", symbol.into())]).await?;
        let rows = resp.get("result").and_then(|r| r.get("list")).and_then(Value::as_array).cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .map(|row| RawTierRow {
                max_notional: Self::parse_decimal(row.get("riskLimitValue").unwrap_or(&Value::Null)),
                mmr_rate: Self::parse_decimal(row.get("maintainMargin").unwrap_or(&Value::Null)),
                mm_deduction: Decimal::ZERO,
                imr_rate: Self::parse_decimal(row.get("initialMargin").unwrap_or(&Value::Null)),
            })
            .collect())
    }

    async fn get_transaction_log(
        &self,
        symbol: &str,
        log_type: &str,
        max_pages: u32,
    ) -> Result<(Vec<TransactionRow>, bool), ExchangeError> {
        let mut rows = Vec::new();
        let mut cursor = String::new();
        let mut truncated = false;

        for page in 0..max_pages {
            let mut query = vec![("category".to_string(), "linear".to_string()), ("symbol".to_string(), symbol.to_string()), ("type".to_string(), log_type.to_string())];
            if !cursor.is_empty() {
                query.push(("cursor".to_string(), cursor.clone()));
            }
            let query: Vec<(&str, String)> = query.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
            let resp = self.private_get("/v5/account/transaction-log", &query).await?;
            let page_rows = resp.get("result").and_then(|r| r.get("list")).and_then(Value::as_array).cloned().unwrap_or_default();
            if page_rows.is_empty() {
                break;
            }
            for row in &page_rows {
                rows.push(TransactionRow {
                    symbol: symbol.to_string(),
                    ts: row.get("transactionTime").and_then(Value::as_str).and_then(|s| s.parse().ok()).unwrap_or(0),
                    log_type: log_type.to_string(),
                    amount: Self::parse_decimal(row.get("change").unwrap_or(&Value::Null)),
                });
            }
            cursor = resp.get("result").and_then(|r| r.get("nextPageCursor")).and_then(Value::as_str).unwrap_or_default().to_string();
            if cursor.is_empty() {
                break;
            }
            if page + 1 == max_pages {
                truncated = true;
                warn!(symbol, log_type, "transaction log truncated at max_pages");
            }
        }
        Ok((rows, truncated))
    }
}
