//! Resilience primitives shared by the collectors and retry queue.
//!
//! - Exponential backoff for reconnects and retries
//! - Sequence-gap detection for WS streams with restart/wraparound handling

pub mod backoff;
pub mod gap_detector;

pub use backoff::{ExponentialBackoff, BackoffConfig};
pub use gap_detector::GapDetector;
