//! API → cache → hardcoded fallback chain for risk-limit tier tables.
//!
//! Ported from the reference `InstrumentInfoProvider.get` fallback shape:
//! cache hit (fresh) wins outright; otherwise an API refresh is attempted and
//! persisted on success; on API failure a stale cache entry is preferred over
//! the hardcoded table, and the hardcoded table is the last resort.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cache_lock::{acquire_file_lock, lock_file_path_for, open_lock_file, InProcessLockGuard};
use super::tiers::TierTable;
use crate::error::RiskLimitError;

/// Fetches tier tables from the exchange. Implemented by the exchange
/// adapter; kept as a narrow trait here so the store has no hard dependency
/// on the transport.
pub trait TierFetcher: Send + Sync {
    fn fetch(&self, symbol: &str) -> Result<TierTable, RiskLimitError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    tiers: TierTable,
    cached_at: DateTime<Utc>,
}

type CacheFile = HashMap<String, CacheEntry>;

pub struct RiskLimitStore {
    cache_path: PathBuf,
    ttl: Duration,
}

impl RiskLimitStore {
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

    fn write_cache(&self, cache: &CacheFile) -> Result<(), RiskLimitError> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent).map_err(|e| RiskLimitError::CacheIo(e.to_string()))?;
        }
        let serialized =
            serde_json::to_string_pretty(cache).map_err(|e| RiskLimitError::CacheIo(e.to_string()))?;
        fs::write(&self.cache_path, serialized).map_err(|e| RiskLimitError::CacheIo(e.to_string()))
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        match SystemTime::from(entry.cached_at).elapsed() {
            Ok(age) => age < self.ttl,
            Err(_) => false,
        }
    }

    /// Resolve the tier table for `symbol`. See §4.2 resolution order:
    /// fresh cache → API refresh → stale cache → hardcoded → default.
    pub fn get(
        &self,
        symbol: &str,
        force_fetch: bool,
        fetcher: &dyn TierFetcher,
    ) -> Result<TierTable, RiskLimitError> {
        let in_process = InProcessLockGuard::acquire(&self.cache_path);
        in_process.with_lock(|| {
            let lock_file = open_lock_file(&self.lock_path())?;
            let _file_lock = acquire_file_lock(&lock_file)?;

            if !force_fetch {
                let cache = self.read_cache();
                if let Some(entry) = cache.get(symbol) {
                    if self.is_fresh(entry) {
                        debug!(symbol, "using cached risk-limit tiers");
                        return Ok(entry.tiers.clone());
                    }
                }
            }

            match fetcher.fetch(symbol) {
                Ok(tiers) => {
                    let mut cache = self.read_cache();
                    cache.insert(
                        symbol.to_string(),
                        CacheEntry { tiers: tiers.clone(), cached_at: Utc::now() },
                    );
                    self.write_cache(&cache)?;
                    Ok(tiers)
                }
                Err(err) => {
                    let cache = self.read_cache();
                    if let Some(entry) = cache.get(symbol) {
                        warn!(symbol, %err, "risk-limit API unavailable, using stale cache");
                        return Ok(entry.tiers.clone());
                    }
                    if let Some(hardcoded) = hardcoded_table_for(symbol) {
                        warn!(symbol, %err, "no cache entry, using hardcoded risk-limit table");
                        return Ok(hardcoded);
                    }
                    warn!(symbol, %err, "no hardcoded risk-limit table, using defaults");
                    Ok(TierTable::default_table())
                }
            }
        })
    }
}

fn hardcoded_table_for(symbol: &str) -> Option<TierTable> {
    match symbol {
        "BTCUSDT" => Some(TierTable::hardcoded_btcusdt()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct AlwaysFails;
    impl TierFetcher for AlwaysFails {
        fn fetch(&self, _symbol: &str) -> Result<TierTable, RiskLimitError> {
            Err(RiskLimitError::ApiError("network down".into()))
        }
    }

    struct AlwaysSucceeds(TierTable);
    impl TierFetcher for AlwaysSucceeds {
        fn fetch(&self, _symbol: &str) -> Result<TierTable, RiskLimitError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn falls_back_to_hardcoded_when_no_cache_and_api_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = RiskLimitStore::new(dir.path().join("risk_limits.json"), Duration::from_secs(3600));

        let tiers = store.get("BTCUSDT", false, &AlwaysFails).unwrap();
        assert_eq!(tiers.0.len(), 7);
    }

    #[test]
    fn prefers_stale_cache_over_hardcoded() {
        let dir = tempfile::tempdir().unwrap();
        let store = RiskLimitStore::new(dir.path().join("risk_limits.json"), Duration::from_secs(3600));

        let seeded = TierTable(vec![
            crate::risk_limits::tiers::RiskLimitTier {
                max_notional: dec!(1_000_000),
                mmr_rate: dec!(0.004),
                mm_deduction: dec!(0),
                imr_rate: dec!(0.01),
            },
            crate::risk_limits::tiers::RiskLimitTier {
                max_notional: rust_decimal::Decimal::MAX,
                mmr_rate: dec!(0.01),
                mm_deduction: dec!(100),
                imr_rate: dec!(0.02),
            },
        ]);
        store.get("BTCUSDT", false, &AlwaysSucceeds(seeded.clone())).unwrap();

        let tiers = store.get("BTCUSDT", false, &AlwaysFails).unwrap();
        assert_eq!(tiers.0.len(), 2);
    }

    #[test]
    fn fresh_cache_short_circuits_fetcher() {
        let dir = tempfile::tempdir().unwrap();
        let store = RiskLimitStore::new(dir.path().join("risk_limits.json"), Duration::from_secs(3600));
        let seeded = TierTable::hardcoded_btcusdt();
        store.get("BTCUSDT", false, &AlwaysSucceeds(seeded)).unwrap();

        let tiers = store.get("BTCUSDT", false, &AlwaysFails).unwrap();
        assert_eq!(tiers.0.len(), 7);
    }
}
