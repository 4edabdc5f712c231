//! Layered runtime configuration: typed struct tree with serde defaults,
//! loaded from TOML and overridden by `GRIDVAL_`-prefixed environment
//! variables (double underscore delimits nesting). Loaded once at startup;
//! immutable thereafter.

use std::path::Path;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub exchange: ExchangeConfig,
    pub grid: GridRuntimeConfig,
    pub rate_limit: RateLimitRuntimeConfig,
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub metrics: MetricsRuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub symbol: String,
    #[serde(default = "default_ws_public_url")]
    pub ws_public_url: String,
    #[serde(default = "default_ws_private_url")]
    pub ws_private_url: String,
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default = "default_funding_max_pages")]
    pub funding_max_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridRuntimeConfig {
    #[serde(default = "default_tick_size")]
    pub tick_size: Decimal,
    #[serde(default = "default_grid_count")]
    pub grid_count: usize,
    #[serde(default = "default_grid_step")]
    pub grid_step_pct: Decimal,
    #[serde(default = "default_rebalance_threshold")]
    pub rebalance_threshold: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRuntimeConfig {
    #[serde(default = "default_order_rate")]
    pub order_rate: usize,
    #[serde(default = "default_query_rate")]
    pub query_rate: usize,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub database_path: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval")]
    pub flush_interval_seconds: f64,
    #[serde(default = "default_gap_threshold")]
    pub gap_threshold_seconds: f64,
    #[serde(default = "default_health_log_interval")]
    pub health_log_interval_seconds: f64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRuntimeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for MetricsRuntimeConfig {
    fn default() -> Self {
        Self { enabled: false, log_level: default_log_level(), json_logs: false }
    }
}

fn default_ws_public_url() -> String {
    "wss://stream.bybit.com/v5/public/linear".to_string()
}
fn default_ws_private_url() -> String {
    "wss://stream.bybit.com/v5/private".to_string()
}
fn default_rest_url() -> String {
    "https://api.bybit.com".to_string()
}
fn default_funding_max_pages() -> u32 {
    10
}
fn default_tick_size() -> Decimal {
    dec!(0.1)
}
fn default_grid_count() -> usize {
    50
}
fn default_grid_step() -> Decimal {
    dec!(0.2)
}
fn default_rebalance_threshold() -> Decimal {
    dec!(0.3)
}
fn default_order_rate() -> usize {
    10
}
fn default_query_rate() -> usize {
    20
}
fn default_window_seconds() -> f64 {
    1.0
}
fn default_backoff_base() -> f64 {
    1.0
}
fn default_max_backoff() -> f64 {
    60.0
}
fn default_batch_size() -> usize {
    100
}
fn default_flush_interval() -> f64 {
    1.0
}
fn default_gap_threshold() -> f64 {
    5.0
}
fn default_health_log_interval() -> f64 {
    60.0
}
fn default_cache_ttl() -> i64 {
    3600
}
fn default_log_level() -> String {
    "info".to_string()
}

const ENV_PREFIX: &str = "GRIDVAL_";

impl RuntimeConfig {
    /// Load from a TOML file, then apply `GRIDVAL_*` environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CoreError::Configuration(format!("reading {}: {e}", path.as_ref().display())))?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, CoreError> {
        let mut value: toml::Value = toml::from_str(text)
            .map_err(|e| CoreError::Configuration(format!("parsing config TOML: {e}")))?;

        apply_env_overrides(&mut value, std::env::vars());

        let config: RuntimeConfig = value
            .try_into()
            .map_err(|e| CoreError::Configuration(format!("deserializing config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.exchange.symbol.is_empty() {
            return Err(CoreError::Configuration("exchange.symbol must not be empty".into()));
        }
        if self.grid.grid_count == 0 || self.grid.grid_count % 2 != 0 {
            return Err(CoreError::Configuration("grid.grid_count must be a positive even number".into()));
        }
        if self.grid.tick_size <= Decimal::ZERO {
            return Err(CoreError::Configuration("grid.tick_size must be positive".into()));
        }
        if self.rate_limit.order_rate == 0 || self.rate_limit.query_rate == 0 {
            return Err(CoreError::Configuration("rate_limit rates must be positive".into()));
        }
        Ok(())
    }
}

/// Apply `GRIDVAL_SECTION__FIELD=value` overrides onto a parsed TOML table.
/// Keys are lowercased; values are parsed as TOML literals where possible,
/// falling back to plain strings.
fn apply_env_overrides(root: &mut toml::Value, vars: impl Iterator<Item = (String, String)>) {
    for (key, raw_value) in vars {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else { continue };
        let path: Vec<String> = rest.to_lowercase().split("__").map(str::to_string).collect();
        if path.is_empty() {
            continue;
        }
        set_nested(root, &path, parse_env_value(&raw_value));
    }
}

fn parse_env_value(raw: &str) -> toml::Value {
    if let Ok(v) = raw.parse::<i64>() {
        return toml::Value::Integer(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        return toml::Value::Float(v);
    }
    if let Ok(v) = raw.parse::<bool>() {
        return toml::Value::Boolean(v);
    }
    toml::Value::String(raw.to_string())
}

fn set_nested(root: &mut toml::Value, path: &[String], value: toml::Value) {
    if !root.is_table() {
        *root = toml::Value::Table(toml::map::Map::new());
    }
    let table = root.as_table_mut().expect("just coerced to table");

    if path.len() == 1 {
        table.insert(path[0].clone(), value);
        return;
    }

    let entry = table.entry(path[0].clone()).or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    set_nested(entry, &path[1..], value);
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [exchange]
        symbol = "BTCUSDT"

        [grid]
        grid_count = 4

        [rate_limit]
        order_rate = 10
        query_rate = 20

        [persistence]
        database_path = "./gridval.sqlite3"
    "#;

    #[test]
    fn loads_with_defaults() {
        let config = RuntimeConfig::load_from_str(SAMPLE).unwrap();
        assert_eq!(config.exchange.symbol, "BTCUSDT");
        assert_eq!(config.grid.grid_count, 4);
        assert_eq!(config.grid.tick_size, dec!(0.1));
        assert_eq!(config.persistence.batch_size, 100);
    }

    #[test]
    fn env_override_nested_field() {
        let mut value: toml::Value = toml::from_str(SAMPLE).unwrap();
        apply_env_overrides(
            &mut value,
            vec![("GRIDVAL_GRID__GRID_COUNT".to_string(), "100".to_string())].into_iter(),
        );
        let config: RuntimeConfig = value.try_into().unwrap();
        assert_eq!(config.grid.grid_count, 100);
    }

    #[test]
    fn rejects_odd_grid_count() {
        let bad = SAMPLE.replace("grid_count = 4", "grid_count = 3");
        assert!(RuntimeConfig::load_from_str(&bad).is_err());
    }

    #[test]
    fn rejects_empty_symbol() {
        let bad = SAMPLE.replace(r#"symbol = "BTCUSDT""#, r#"symbol = """#);
        assert!(RuntimeConfig::load_from_str(&bad).is_err());
    }
}
