//! API → cache → hardcoded fallback chain for instrument metadata
//! (tick size, quantity step, min/max order quantity).
//!
//! Same resolution order and locking idiom as [`crate::risk_limits::store`]:
//! fresh cache wins, an API refresh is attempted and persisted on success,
//! a stale cache entry is preferred over the hardcoded table on API failure,
//! and the hardcoded table is the last resort. Kept under its own cache file
//! (`instruments_cache.json`) with its own sibling lock file, distinct from
//! the risk-limit store's — the two caches never share a lock path.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{InstrumentError, RiskLimitError};
use crate::risk_limits::cache_lock::{acquire_file_lock, lock_file_path_for, open_lock_file, InProcessLockGuard};

/// Tick/step rounding parameters for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub tick_size: Decimal,
    pub qty_step: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
}

/// Fetches instrument metadata from the exchange. Implemented by the
/// exchange adapter; kept narrow so the store has no hard transport dependency.
pub trait InstrumentFetcher: Send + Sync {
    fn fetch(&self, symbol: &str) -> Result<InstrumentInfo, InstrumentError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    info: InstrumentInfo,
    cached_at: DateTime<Utc>,
}

type CacheFile = HashMap<String, CacheEntry>;

pub struct InstrumentInfoStore {
    cache_path: PathBuf,
    ttl: Duration,
}

impl InstrumentInfoStore {
    pub fn new(cache_path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self { cache_path: cache_path.into(), ttl }
    }

    fn lock_path(&self) -> PathBuf {
        lock_file_path_for(&self.cache_path)
    }

    fn read_cache(&self) -> CacheFile {
        let Ok(raw) = fs::read_to_string(&self.cache_path) else {
            return HashMap::new();
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }

    fn write_cache(&self, cache: &CacheFile) -> Result<(), InstrumentError> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent).map_err(|e| InstrumentError::CacheIo(e.to_string()))?;
        }
        let serialized =
            serde_json::to_string_pretty(cache).map_err(|e| InstrumentError::CacheIo(e.to_string()))?;
        fs::write(&self.cache_path, serialized).map_err(|e| InstrumentError::CacheIo(e.to_string()))
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        match SystemTime::from(entry.cached_at).elapsed() {
            Ok(age) => age < self.ttl,
            Err(_) => false,
        }
    }

    /// Resolve instrument info for `symbol`: fresh cache → API refresh →
    /// stale cache → hardcoded → default.
    pub fn get(
        &self,
        symbol: &str,
        force_fetch: bool,
        fetcher: &dyn InstrumentFetcher,
    ) -> Result<InstrumentInfo, InstrumentError> {
        let in_process = InProcessLockGuard::acquire(&self.cache_path);
        in_process.with_lock(|| {
            let lock_file = open_lock_file(&self.lock_path()).map_err(lock_err)?;
            let _file_lock = acquire_file_lock(&lock_file).map_err(lock_err)?;

            if !force_fetch {
                let cache = self.read_cache();
                if let Some(entry) = cache.get(symbol) {
                    if self.is_fresh(entry) {
                        debug!(symbol, "using cached instrument info");
                        return Ok(entry.info);
                    }
                }
            }

            match fetcher.fetch(symbol) {
                Ok(info) => {
                    let mut cache = self.read_cache();
                    cache.insert(symbol.to_string(), CacheEntry { info, cached_at: Utc::now() });
                    self.write_cache(&cache)?;
                    Ok(info)
                }
                Err(err) => {
                    let cache = self.read_cache();
                    if let Some(entry) = cache.get(symbol) {
                        warn!(symbol, %err, "instrument-info API unavailable, using stale cache");
                        return Ok(entry.info);
                    }
                    if let Some(hardcoded) = hardcoded_info_for(symbol) {
                        warn!(symbol, %err, "no cache entry, using hardcoded instrument info");
                        return Ok(hardcoded);
                    }
                    warn!(symbol, %err, "no hardcoded instrument info, using defaults");
                    Ok(default_info())
                }
            }
        })
    }
}

/// The risk-limit store's lock primitives raise `RiskLimitError`; the two
/// caches share the locking code but not its error type.
fn lock_err(e: RiskLimitError) -> InstrumentError {
    match e {
        RiskLimitError::CacheIo(msg) => InstrumentError::CacheIo(msg),
        RiskLimitError::SymlinkDetected(msg) => InstrumentError::SymlinkDetected(msg),
        RiskLimitError::ApiError(msg) => InstrumentError::ApiError(msg),
        RiskLimitError::NoTiersForSymbol(symbol) => InstrumentError::NoInfoForSymbol(symbol),
    }
}

fn hardcoded_info_for(symbol: &str) -> Option<InstrumentInfo> {
    match symbol {
        "BTCUSDT" => Some(InstrumentInfo {
            tick_size: dec!(0.1),
            qty_step: dec!(0.001),
            min_qty: dec!(0.001),
            max_qty: dec!(1190),
        }),
        _ => None,
    }
}

fn default_info() -> InstrumentInfo {
    InstrumentInfo {
        tick_size: dec!(0.01),
        qty_step: dec!(0.01),
        min_qty: dec!(0.01),
        max_qty: Decimal::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;
    impl InstrumentFetcher for AlwaysFails {
        fn fetch(&self, _symbol: &str) -> Result<InstrumentInfo, InstrumentError> {
            Err(InstrumentError::ApiError("network down".into()))
        }
    }

    struct AlwaysSucceeds(InstrumentInfo);
    impl InstrumentFetcher for AlwaysSucceeds {
        fn fetch(&self, _symbol: &str) -> Result<InstrumentInfo, InstrumentError> {
            Ok(self.0)
        }
    }

    #[test]
    fn falls_back_to_hardcoded_when_no_cache_and_api_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = InstrumentInfoStore::new(dir.path().join("instruments_cache.json"), Duration::from_secs(3600));

        let info = store.get("BTCUSDT", false, &AlwaysFails).unwrap();
        assert_eq!(info.tick_size, dec!(0.1));
    }

    #[test]
    fn prefers_stale_cache_over_hardcoded() {
        let dir = tempfile::tempdir().unwrap();
        let store = InstrumentInfoStore::new(dir.path().join("instruments_cache.json"), Duration::from_secs(3600));

        let seeded = InstrumentInfo { tick_size: dec!(0.5), qty_step: dec!(1), min_qty: dec!(1), max_qty: dec!(100) };
        store.get("BTCUSDT", false, &AlwaysSucceeds(seeded)).unwrap();

        let info = store.get("BTCUSDT", false, &AlwaysFails).unwrap();
        assert_eq!(info.tick_size, dec!(0.5));
    }

    #[test]
    fn fresh_cache_short_circuits_fetcher() {
        let dir = tempfile::tempdir().unwrap();
        let store = InstrumentInfoStore::new(dir.path().join("instruments_cache.json"), Duration::from_secs(3600));
        let seeded = hardcoded_info_for("BTCUSDT").unwrap();
        store.get("BTCUSDT", false, &AlwaysSucceeds(seeded)).unwrap();

        let info = store.get("BTCUSDT", false, &AlwaysFails).unwrap();
        assert_eq!(info, seeded);
    }

    #[test]
    fn uses_its_own_lock_path_distinct_from_risk_limits() {
        let dir = tempfile::tempdir().unwrap();
        let store = InstrumentInfoStore::new(dir.path().join("instruments_cache.json"), Duration::from_secs(3600));
        assert_ne!(store.lock_path(), lock_file_path_for(&dir.path().join("risk_limits.json")));
    }
}
