//! JSON-backed anchor price persistence, keyed by `strat_id`.
//!
//! Uses the same single-file JSON cache idiom as the risk-limit and
//! instrument-info caches, but anchors are append/overwrite per strategy and
//! carry no TTL — they are restored verbatim on restart.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::GridError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorEntry {
    pub anchor_price: Decimal,
    pub grid_step: Decimal,
    pub grid_count: usize,
}

pub struct AnchorStore {
    path: PathBuf,
}

impl AnchorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load_all(&self) -> Result<HashMap<String, AnchorEntry>, GridError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| GridError::AnchorStoreIo(e.to_string()))?;
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| GridError::AnchorStoreIo(e.to_string()))
    }

    pub fn get(&self, strat_id: &str) -> Result<Option<AnchorEntry>, GridError> {
        Ok(self.load_all()?.remove(strat_id))
    }

    pub fn put(&self, strat_id: &str, entry: AnchorEntry) -> Result<(), GridError> {
        let mut all = self.load_all()?;
        all.insert(strat_id.to_string(), entry);
        let serialized = serde_json::to_string_pretty(&all).map_err(|e| GridError::AnchorStoreIo(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| GridError::AnchorStoreIo(e.to_string()))?;
        }
        fs::write(&self.path, serialized).map_err(|e| GridError::AnchorStoreIo(e.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnchorStore::new(dir.path().join("anchors.json"));

        assert!(store.get("btc_main").unwrap().is_none());

        store
            .put(
                "btc_main",
                AnchorEntry {
                    anchor_price: dec!(100000.0),
                    grid_step: dec!(0.2),
                    grid_count: 50,
                },
            )
            .unwrap();

        let entry = store.get("btc_main").unwrap().unwrap();
        assert_eq!(entry.anchor_price, dec!(100000.0));
        assert_eq!(entry.grid_count, 50);
    }
}
