//! Optional Prometheus exporter for long-running processes (collectors, live executor).
//!
//! Disabled by default; `MetricsCollector::new(true)` registers a small set of
//! counters/gauges against the default registry. Callers that never enable it
//! pay no cost beyond the `enabled` check.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub struct MetricsCollector {
    enabled: bool,
    registry: Registry,
    pub fills_total: IntCounter,
    pub intents_total: IntCounter,
    pub retry_queue_depth: IntGauge,
    pub ws_gaps_total: IntCounter,
    pub reconnects_total: IntCounter,
}

impl MetricsCollector {
    pub fn new(enabled: bool) -> Self {
        let registry = Registry::new();
        let fills_total = IntCounter::new("gridval_fills_total", "fills processed").unwrap();
        let intents_total = IntCounter::new("gridval_intents_total", "intents emitted").unwrap();
        let retry_queue_depth =
            IntGauge::new("gridval_retry_queue_depth", "items pending in the retry queue").unwrap();
        let ws_gaps_total =
            IntCounter::new("gridval_ws_gaps_total", "sequence gaps detected on WS streams").unwrap();
        let reconnects_total =
            IntCounter::new("gridval_reconnects_total", "collector reconnect attempts").unwrap();

        if enabled {
            let _ = registry.register(Box::new(fills_total.clone()));
            let _ = registry.register(Box::new(intents_total.clone()));
            let _ = registry.register(Box::new(retry_queue_depth.clone()));
            let _ = registry.register(Box::new(ws_gaps_total.clone()));
            let _ = registry.register(Box::new(reconnects_total.clone()));
        }

        Self {
            enabled,
            registry,
            fills_total,
            intents_total,
            retry_queue_depth,
            ws_gaps_total,
            reconnects_total,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Render the registered families in Prometheus text exposition format.
    pub fn render(&self) -> String {
        if !self.enabled {
            return String::new();
        }
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buf).ok();
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(false)
    }
}
