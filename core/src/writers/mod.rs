//! Bounded-buffer batched writers and the embedded repository they flush
//! into. One writer per logical table (trades, executions, orders,
//! positions, wallets); all writes are idempotent on a natural key so
//! at-least-once delivery from the collectors never produces duplicates.
//!
//! The repository reaches SQLite through `rusqlite`, dispatched off the
//! async runtime via `spawn_blocking` — no hand-rolled file format, and
//! uniqueness is enforced at the schema level rather than re-checked in
//! application code.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as BlockingMutex;
use rusqlite::{params, Connection};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::WriterError;
use crate::exchange::{OrderUpdateEvent, PositionSnapshot, PublicTradeEvent, RawExecutionEvent, WalletSnapshot};

/// A tagged private-stream row: the collector's `(user_id, account_id,
/// run_id)` context plus the normalized payload.
#[derive(Debug, Clone)]
pub struct Tagged<T> {
    pub account_id: String,
    pub run_id: Option<String>,
    pub payload: T,
}

/// Narrow persistence capability per row type, implemented once by
/// [`SqliteRepository`]. Kept as a trait so writers can be unit-tested
/// against an in-memory fake without touching SQLite.
#[async_trait]
pub trait BatchSink<T>: Send + Sync {
    async fn insert_batch(&self, rows: Vec<T>) -> Result<usize, WriterError>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS public_trades (
    symbol TEXT NOT NULL,
    trade_id TEXT NOT NULL,
    exchange_ts INTEGER NOT NULL,
    local_ts INTEGER NOT NULL,
    side TEXT NOT NULL,
    price TEXT NOT NULL,
    size TEXT NOT NULL,
    UNIQUE(symbol, trade_id)
);
CREATE TABLE IF NOT EXISTS private_executions (
    run_id TEXT,
    account_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    exec_id TEXT NOT NULL,
    order_id TEXT NOT NULL,
    order_link_id TEXT NOT NULL,
    exchange_ts INTEGER NOT NULL,
    side TEXT NOT NULL,
    price TEXT NOT NULL,
    qty TEXT NOT NULL,
    fee TEXT NOT NULL,
    closed_pnl TEXT NOT NULL,
    UNIQUE(account_id, exec_id)
);
CREATE TABLE IF NOT EXISTS private_orders (
    run_id TEXT,
    account_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    order_id TEXT NOT NULL,
    order_link_id TEXT NOT NULL,
    exchange_ts INTEGER NOT NULL,
    side TEXT NOT NULL,
    price TEXT NOT NULL,
    qty TEXT NOT NULL,
    status TEXT NOT NULL,
    UNIQUE(account_id, order_id, exchange_ts)
);
CREATE TABLE IF NOT EXISTS position_snapshots (
    account_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    direction TEXT NOT NULL,
    size TEXT NOT NULL,
    avg_entry_price TEXT NOT NULL,
    position_idx INTEGER NOT NULL,
    recorded_ts INTEGER NOT NULL,
    UNIQUE(account_id, symbol, position_idx, recorded_ts)
);
CREATE TABLE IF NOT EXISTS wallet_snapshots (
    account_id TEXT NOT NULL,
    coin TEXT NOT NULL,
    wallet_balance TEXT NOT NULL,
    available_balance TEXT NOT NULL,
    recorded_ts INTEGER NOT NULL,
    UNIQUE(account_id, coin, recorded_ts)
);
"#;

/// One embedded SQLite store shared by every writer in a process.
pub struct SqliteRepository {
    conn: Arc<BlockingMutex<Connection>>,
}

impl SqliteRepository {
    pub fn open(database_path: &str) -> Result<Self, WriterError> {
        let conn = Connection::open(database_path).map_err(WriterError::Repository)?;
        conn.execute_batch(SCHEMA).map_err(WriterError::Repository)?;
        Ok(Self { conn: Arc::new(BlockingMutex::new(conn)) })
    }

    async fn with_conn<F>(&self, f: F) -> Result<usize, WriterError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<usize> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| WriterError::FlushFailed(format!("blocking task panicked: {e}")))?
        .map_err(WriterError::Repository)
    }
}

#[async_trait]
impl BatchSink<PublicTradeEvent> for SqliteRepository {
    async fn insert_batch(&self, rows: Vec<PublicTradeEvent>) -> Result<usize, WriterError> {
        self.with_conn(move |conn| {
            let mut inserted = 0;
            for row in &rows {
                inserted += conn.execute(
                    "INSERT OR IGNORE INTO public_trades (symbol, trade_id, exchange_ts, local_ts, side, price, size)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![row.symbol, row.trade_id, row.exchange_ts, row.local_ts, row.side.to_string(), row.price.to_string(), row.size.to_string()],
                )?;
            }
            Ok(inserted)
        })
        .await
    }
}

#[async_trait]
impl BatchSink<Tagged<RawExecutionEvent>> for SqliteRepository {
    async fn insert_batch(&self, rows: Vec<Tagged<RawExecutionEvent>>) -> Result<usize, WriterError> {
        self.with_conn(move |conn| {
            let mut inserted = 0;
            for row in &rows {
                let exec = &row.payload;
                inserted += conn.execute(
                    "INSERT OR IGNORE INTO private_executions
                     (run_id, account_id, symbol, exec_id, order_id, order_link_id, exchange_ts, side, price, qty, fee, closed_pnl)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        row.run_id, row.account_id, exec.symbol, exec.exec_id, exec.order_id, exec.order_link_id,
                        exec.exchange_ts, exec.side.to_string(), exec.price.to_string(), exec.qty.to_string(),
                        exec.fee.to_string(), exec.closed_pnl.to_string(),
                    ],
                )?;
            }
            Ok(inserted)
        })
        .await
    }
}

#[async_trait]
impl BatchSink<Tagged<OrderUpdateEvent>> for SqliteRepository {
    async fn insert_batch(&self, rows: Vec<Tagged<OrderUpdateEvent>>) -> Result<usize, WriterError> {
        self.with_conn(move |conn| {
            let mut inserted = 0;
            for row in &rows {
                let order = &row.payload;
                inserted += conn.execute(
                    "INSERT OR IGNORE INTO private_orders
                     (run_id, account_id, symbol, order_id, order_link_id, exchange_ts, side, price, qty, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        row.run_id, row.account_id, order.symbol, order.order_id, order.order_link_id,
                        order.exchange_ts, order.side.to_string(), order.price.to_string(), order.qty.to_string(), order.status,
                    ],
                )?;
            }
            Ok(inserted)
        })
        .await
    }
}

#[async_trait]
impl BatchSink<Tagged<PositionSnapshot>> for SqliteRepository {
    async fn insert_batch(&self, rows: Vec<Tagged<PositionSnapshot>>) -> Result<usize, WriterError> {
        self.with_conn(move |conn| {
            let mut inserted = 0;
            for row in &rows {
                let pos = &row.payload;
                inserted += conn.execute(
                    "INSERT OR IGNORE INTO position_snapshots
                     (account_id, symbol, direction, size, avg_entry_price, position_idx, recorded_ts)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, strftime('%s','now'))",
                    params![row.account_id, pos.symbol, pos.direction.to_string(), pos.size.to_string(), pos.avg_entry_price.to_string(), pos.position_idx],
                )?;
            }
            Ok(inserted)
        })
        .await
    }
}

#[async_trait]
impl BatchSink<Tagged<WalletSnapshot>> for SqliteRepository {
    async fn insert_batch(&self, rows: Vec<Tagged<WalletSnapshot>>) -> Result<usize, WriterError> {
        self.with_conn(move |conn| {
            let mut inserted = 0;
            for row in &rows {
                let wallet = &row.payload;
                inserted += conn.execute(
                    "INSERT OR IGNORE INTO wallet_snapshots
                     (account_id, coin, wallet_balance, available_balance, recorded_ts)
                     VALUES (?1, ?2, ?3, ?4, strftime('%s','now'))",
                    params![row.account_id, wallet.coin, wallet.wallet_balance.to_string(), wallet.available_balance.to_string()],
                )?;
            }
            Ok(inserted)
        })
        .await
    }
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

/// A bounded-deque batched writer for one table. Flush triggers on
/// `buffer.len() >= batch_size` (checked on `push`) or on the background
/// task's `flush_interval` tick. A failed flush re-enqueues at the front,
/// preserving arrival order for the next attempt.
pub struct BufferedWriter<T: Send + 'static> {
    sink: Arc<dyn BatchSink<T>>,
    buffer: Mutex<VecDeque<T>>,
    config: WriterConfig,
    running: std::sync::atomic::AtomicBool,
    label: &'static str,
}

impl<T: Send + 'static> BufferedWriter<T> {
    pub fn new(label: &'static str, sink: Arc<dyn BatchSink<T>>, config: WriterConfig) -> Self {
        Self { sink, buffer: Mutex::new(VecDeque::new()), config, running: std::sync::atomic::AtomicBool::new(false), label }
    }

    /// Buffer one row. Triggers an immediate flush if the buffer has
    /// reached `batch_size`; flush errors are logged, not propagated,
    /// matching the collector→writer callback boundary (no exception
    /// should unwind into the WS read loop).
    pub async fn push(&self, row: T) {
        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push_back(row);
            buffer.len() >= self.config.batch_size
        };
        if should_flush {
            if let Err(err) = self.flush().await {
                error!(writer = self.label, %err, "threshold flush failed");
            }
        }
    }

    /// Drain and persist the current buffer contents. On failure, the
    /// drained rows are pushed back to the front so the next flush attempt
    /// sees them first, preserving arrival order.
    pub async fn flush(&self) -> Result<usize, WriterError> {
        let rows: Vec<T> = {
            let mut buffer = self.buffer.lock().await;
            buffer.drain(..).collect()
        };
        if rows.is_empty() {
            return Ok(0);
        }
        let count = rows.len();
        match self.sink.insert_batch(rows).await {
            Ok(inserted) => {
                info!(writer = self.label, attempted = count, inserted, "flushed");
                Ok(inserted)
            }
            Err(err) => {
                error!(writer = self.label, %err, "flush failed, re-enqueueing");
                Err(err)
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.buffer.lock().await.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Spawn the background time-based flush loop.
    pub fn run_loop(self: Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, std::sync::atomic::Ordering::SeqCst);
        let interval = self.config.flush_interval;
        tokio::spawn(async move {
            while self.running.load(std::sync::atomic::Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                if let Err(err) = self.flush().await {
                    error!(writer = self.label, %err, "interval flush failed");
                }
            }
        })
    }

    /// Cancel the background loop and perform a final flush of whatever
    /// remains buffered.
    pub async fn stop(&self) -> Result<usize, WriterError> {
        self.running.store(false, std::sync::atomic::Ordering::SeqCst);
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeSink {
        calls: AsyncMutex<Vec<usize>>,
        fail_next: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl BatchSink<PublicTradeEvent> for FakeSink {
        async fn insert_batch(&self, rows: Vec<PublicTradeEvent>) -> Result<usize, WriterError> {
            if self.fail_next.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Err(WriterError::FlushFailed("forced failure".into()));
            }
            self.calls.lock().await.push(rows.len());
            Ok(rows.len())
        }
    }

    fn trade() -> PublicTradeEvent {
        PublicTradeEvent {
            symbol: "BTCUSDT".into(),
            trade_id: "1".into(),
            exchange_ts: 0,
            local_ts: 0,
            side: crate::orderbook::Side::Buy,
            price: dec!(100000),
            size: dec!(1),
        }
    }

    #[tokio::test]
    async fn push_below_batch_size_does_not_flush() {
        let sink = Arc::new(FakeSink { calls: AsyncMutex::new(Vec::new()), fail_next: std::sync::atomic::AtomicBool::new(false) });
        let writer = BufferedWriter::new("trades", sink.clone(), WriterConfig { batch_size: 10, flush_interval: Duration::from_secs(60) });
        writer.push(trade()).await;
        assert_eq!(writer.len().await, 1);
        assert!(sink.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn push_at_batch_size_flushes() {
        let sink = Arc::new(FakeSink { calls: AsyncMutex::new(Vec::new()), fail_next: std::sync::atomic::AtomicBool::new(false) });
        let writer = BufferedWriter::new("trades", sink.clone(), WriterConfig { batch_size: 2, flush_interval: Duration::from_secs(60) });
        writer.push(trade()).await;
        writer.push(trade()).await;
        assert_eq!(writer.len().await, 0);
        assert_eq!(*sink.calls.lock().await, vec![2]);
    }

    #[tokio::test]
    async fn failed_flush_reenqueues_rows() {
        let sink = Arc::new(FakeSink { calls: AsyncMutex::new(Vec::new()), fail_next: std::sync::atomic::AtomicBool::new(true) });
        let writer = BufferedWriter::new("trades", sink.clone(), WriterConfig { batch_size: 10, flush_interval: Duration::from_secs(60) });
        writer.push(trade()).await;
        assert!(writer.flush().await.is_err());
        assert_eq!(writer.len().await, 1);
    }

    #[tokio::test]
    async fn stop_performs_final_flush() {
        let sink = Arc::new(FakeSink { calls: AsyncMutex::new(Vec::new()), fail_next: std::sync::atomic::AtomicBool::new(false) });
        let writer = BufferedWriter::new("trades", sink.clone(), WriterConfig { batch_size: 10, flush_interval: Duration::from_secs(60) });
        writer.push(trade()).await;
        writer.stop().await.unwrap();
        assert_eq!(writer.len().await, 0);
        assert_eq!(*sink.calls.lock().await, vec![1]);
    }
}
