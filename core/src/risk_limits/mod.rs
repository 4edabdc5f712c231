//! Tiered margin risk-limit table: the fallback chain, cross-process lock,
//! and drift monitor, plus the tier-selection contract the margin math uses.

pub mod cache_lock;
pub mod drift;
pub mod store;
pub mod tiers;

pub use store::{RiskLimitStore, TierFetcher};
pub use tiers::{RiskLimitTier, TierTable};
