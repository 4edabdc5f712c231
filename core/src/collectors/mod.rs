//! Public and private WS collectors: own an `ExchangeAdapter`, track
//! per-symbol last-trade timestamps for gap detection, and run a heartbeat
//! watchdog over the inbound event stream.
//!
//! The watchdog state machine is the same shape as the teacher's
//! `resilience::reconnect` (`Connected`/`Reconnecting` + reconnection
//! counter), generalized from wrapping a proprietary shared-memory feed to
//! wrapping any [`crate::exchange::ExchangeAdapter`]. Staleness is measured
//! on the normalized event stream rather than on the adapter's own
//! transport, so it catches a silently-stalled feed even if the underlying
//! socket never reports a drop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{info, warn};

use crate::exchange::{ExchangeAdapter, ExchangeEvent};
use crate::utils::MetricsCollector;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis() as i64
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// No message arriving within this window marks the connection stale.
    pub disconnect_threshold: Duration,
    /// How often the watchdog checks for staleness.
    pub check_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { disconnect_threshold: Duration::from_secs(30), check_interval: Duration::from_secs(5) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connected,
    Disconnected,
}

/// Per-client heartbeat state machine: `disconnected → connected →
/// (silent > threshold ⇒ disconnected) → connected`, incrementing a
/// reconnect counter on every recovery.
pub struct HeartbeatWatchdog {
    config: HeartbeatConfig,
    state: ConnectionState,
    last_message_at: Instant,
    disconnected_at_ms: Option<i64>,
    reconnect_count: AtomicU32,
}

impl HeartbeatWatchdog {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Connected,
            last_message_at: Instant::now(),
            disconnected_at_ms: None,
            reconnect_count: AtomicU32::new(0),
        }
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    /// Record a freshly-arrived message. Returns a synthetic `Reconnected`
    /// event if this message ends a detected disconnect.
    fn note_message(&mut self) -> Option<ExchangeEvent> {
        self.last_message_at = Instant::now();
        if self.state == ConnectionState::Disconnected {
            let disconnected_at = self.disconnected_at_ms.take().unwrap_or_else(now_ms);
            self.state = ConnectionState::Connected;
            self.reconnect_count.fetch_add(1, Ordering::Relaxed);
            return Some(ExchangeEvent::Reconnected { disconnected_at, reconnected_at: now_ms() });
        }
        None
    }

    /// Called on the watchdog's own check interval, independent of message
    /// arrival. Returns a synthetic `Disconnected` event on first detection.
    fn check_stale(&mut self) -> Option<ExchangeEvent> {
        if self.state == ConnectionState::Connected && self.last_message_at.elapsed() > self.config.disconnect_threshold {
            self.state = ConnectionState::Disconnected;
            let ts = now_ms();
            self.disconnected_at_ms = Some(ts);
            return Some(ExchangeEvent::Disconnected { ts });
        }
        None
    }
}

/// Subscribes to ticker and public-trade streams for a configured symbol
/// set via the wrapped adapter, normalizes, and tracks `last_trade_ts` per
/// symbol for downstream gap detection.
pub struct PublicCollector {
    adapter: Arc<dyn ExchangeAdapter>,
    watchdog: Mutex<HeartbeatWatchdog>,
    last_trade_ts: DashMap<String, i64>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl PublicCollector {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>, heartbeat: HeartbeatConfig, metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self { adapter, watchdog: Mutex::new(HeartbeatWatchdog::new(heartbeat)), last_trade_ts: DashMap::new(), metrics }
    }

    pub fn last_trade_ts(&self, symbol: &str) -> Option<i64> {
        self.last_trade_ts.get(symbol).map(|v| *v)
    }

    /// Run until the adapter's stream ends. Forwards normalized events
    /// (plus synthetic `Disconnected`/`Reconnected` events from the
    /// watchdog) onto `out`.
    pub async fn run(&self, out: mpsc::Sender<ExchangeEvent>) {
        let (tx, mut rx) = mpsc::channel(1024);
        let adapter = self.adapter.clone();
        let adapter_task = tokio::spawn(async move {
            if let Err(err) = adapter.run(tx).await {
                warn!(%err, "public collector adapter stream ended with error");
            }
        });

        let mut watchdog_tick = interval(self.watchdog.lock().config.check_interval);

        loop {
            tokio::select! {
                maybe_event = rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    if let ExchangeEvent::PublicTrade(ref trade) = event {
                        self.last_trade_ts.insert(trade.symbol.clone(), trade.exchange_ts);
                    }
                    let reconnect_event = self.watchdog.lock().note_message();
                    if let Some(reconnect_event) = reconnect_event {
                        info!(reconnects = self.watchdog.lock().reconnect_count(), "public feed reconnected");
                        if let Some(metrics) = &self.metrics {
                            metrics.reconnects_total.inc();
                        }
                        if out.send(reconnect_event).await.is_err() {
                            break;
                        }
                    }
                    if out.send(event).await.is_err() {
                        break;
                    }
                }
                _ = watchdog_tick.tick() => {
                    if let Some(disconnect_event) = self.watchdog.lock().check_stale() {
                        warn!("public feed stale, emitting disconnect");
                        if out.send(disconnect_event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        adapter_task.abort();
    }
}

/// Identity tags attached to every private-stream event: who it belongs to
/// and which validation run it should be attributed to, if any.
#[derive(Debug, Clone)]
pub struct AccountContext {
    pub user_id: String,
    pub account_id: String,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaggedEvent {
    pub ctx: AccountContext,
    pub event: ExchangeEvent,
}

/// One private collector per account: subscribes to executions, orders,
/// position, and wallet, and tags every event with `(user_id, account_id,
/// run_id)`. Persistence of the `run_id`-less case is a writer-layer
/// decision (§4.10); the collector's job is only to attach the context.
pub struct PrivateCollector {
    adapter: Arc<dyn ExchangeAdapter>,
    ctx: AccountContext,
    watchdog: Mutex<HeartbeatWatchdog>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl PrivateCollector {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>, ctx: AccountContext, heartbeat: HeartbeatConfig, metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self { adapter, ctx, watchdog: Mutex::new(HeartbeatWatchdog::new(heartbeat)), metrics }
    }

    pub async fn run(&self, out: mpsc::Sender<TaggedEvent>) {
        let (tx, mut rx) = mpsc::channel(1024);
        let adapter = self.adapter.clone();
        let account_id = self.ctx.account_id.clone();
        let adapter_task = tokio::spawn(async move {
            if let Err(err) = adapter.run(tx).await {
                warn!(%err, %account_id, "private collector adapter stream ended with error");
            }
        });

        let mut watchdog_tick = interval(self.watchdog.lock().config.check_interval);

        loop {
            tokio::select! {
                maybe_event = rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    let reconnect_event = self.watchdog.lock().note_message();
                    if let Some(reconnect_event) = reconnect_event {
                        if let Some(metrics) = &self.metrics {
                            metrics.reconnects_total.inc();
                        }
                        if out.send(TaggedEvent { ctx: self.ctx.clone(), event: reconnect_event }).await.is_err() {
                            break;
                        }
                    }
                    if out.send(TaggedEvent { ctx: self.ctx.clone(), event }).await.is_err() {
                        break;
                    }
                }
                _ = watchdog_tick.tick() => {
                    if let Some(disconnect_event) = self.watchdog.lock().check_stale() {
                        warn!(account_id = %self.ctx.account_id, "private feed stale, emitting disconnect");
                        if out.send(TaggedEvent { ctx: self.ctx.clone(), event: disconnect_event }).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        adapter_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_starts_connected() {
        let mut watchdog = HeartbeatWatchdog::new(HeartbeatConfig::default());
        assert_eq!(watchdog.check_stale(), None);
        assert_eq!(watchdog.reconnect_count(), 0);
    }

    #[test]
    fn watchdog_detects_staleness_and_reconnect() {
        let mut watchdog = HeartbeatWatchdog::new(HeartbeatConfig {
            disconnect_threshold: Duration::from_millis(1),
            check_interval: Duration::from_millis(1),
        });
        std::thread::sleep(Duration::from_millis(5));
        let disconnect = watchdog.check_stale();
        assert!(matches!(disconnect, Some(ExchangeEvent::Disconnected { .. })));

        let reconnect = watchdog.note_message();
        assert!(matches!(reconnect, Some(ExchangeEvent::Reconnected { .. })));
        assert_eq!(watchdog.reconnect_count(), 1);
    }
}
