//! Subsystem error taxonomy.
//!
//! Each subsystem gets its own `thiserror` enum whose variants map onto the
//! documented error kinds (configuration, transient I/O, validation,
//! business, fatal). Application entry points collect these into
//! `anyhow::Result` and translate the outermost kind into a process exit
//! code; no subsystem panics on a recoverable condition.

use thiserror::Error;

/// Coarse classification used by the CLI binaries to pick an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    TransientIo,
    Validation,
    Business,
    Fatal,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("grid error: {0}")]
    Grid(#[from] GridError),

    #[error("risk-limit store error: {0}")]
    RiskLimit(#[from] RiskLimitError),

    #[error("instrument-info store error: {0}")]
    Instrument(#[from] InstrumentError),

    #[error("position tracker error: {0}")]
    Position(#[from] PositionError),

    #[error("collector error: {0}")]
    Collector(#[from] CollectorError),

    #[error("writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("exchange adapter error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Configuration(_) => ErrorKind::Configuration,
            CoreError::Grid(e) => e.kind(),
            CoreError::RiskLimit(e) => e.kind(),
            CoreError::Instrument(e) => e.kind(),
            CoreError::Position(e) => e.kind(),
            CoreError::Collector(e) => e.kind(),
            CoreError::Writer(e) => e.kind(),
            CoreError::Exchange(e) => e.kind(),
            CoreError::Other(_) => ErrorKind::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("grid level sequence is not monotone: {0}")]
    NotSorted(String),
    #[error("grid has no wait region")]
    NoWaitRegion,
    #[error("anchor store I/O error: {0}")]
    AnchorStoreIo(String),
}

impl GridError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GridError::NotSorted(_) | GridError::NoWaitRegion => ErrorKind::Validation,
            GridError::AnchorStoreIo(_) => ErrorKind::TransientIo,
        }
    }
}

#[derive(Debug, Error)]
pub enum RiskLimitError {
    #[error("no tiers configured for symbol {0}")]
    NoTiersForSymbol(String),
    #[error("cache I/O error: {0}")]
    CacheIo(String),
    #[error("cache file corrupted, refusing to trust a symlinked lock path: {0}")]
    SymlinkDetected(String),
    #[error("upstream API error: {0}")]
    ApiError(String),
}

impl RiskLimitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RiskLimitError::NoTiersForSymbol(_) => ErrorKind::Business,
            RiskLimitError::CacheIo(_) | RiskLimitError::ApiError(_) => ErrorKind::TransientIo,
            RiskLimitError::SymlinkDetected(_) => ErrorKind::Fatal,
        }
    }
}

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("no hardcoded instrument info for symbol {0}")]
    NoInfoForSymbol(String),
    #[error("cache I/O error: {0}")]
    CacheIo(String),
    #[error("cache file corrupted, refusing to trust a symlinked lock path: {0}")]
    SymlinkDetected(String),
    #[error("upstream API error: {0}")]
    ApiError(String),
}

impl InstrumentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstrumentError::NoInfoForSymbol(_) => ErrorKind::Business,
            InstrumentError::CacheIo(_) | InstrumentError::ApiError(_) => ErrorKind::TransientIo,
            InstrumentError::SymlinkDetected(_) => ErrorKind::Fatal,
        }
    }
}

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("cannot reduce position by {requested} when size is {size}")]
    OverReduction { requested: String, size: String },
}

impl PositionError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("websocket disconnected: {0}")]
    Disconnected(String),
    #[error("malformed event payload: {0}")]
    MalformedPayload(String),
}

impl CollectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CollectorError::Disconnected(_) => ErrorKind::TransientIo,
            CollectorError::MalformedPayload(_) => ErrorKind::Validation,
        }
    }
}

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("flush failed: {0}")]
    FlushFailed(String),
    #[error("repository error: {0}")]
    Repository(#[from] rusqlite::Error),
}

impl WriterError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::TransientIo
    }
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("request signing error: {0}")]
    Signing(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rate limited, retry after {0:?}")]
    RateLimited(std::time::Duration),
    #[error("business rejection: {0}")]
    Rejected(String),
}

impl ExchangeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExchangeError::Signing(_) => ErrorKind::Fatal,
            ExchangeError::Transport(_) | ExchangeError::RateLimited(_) => ErrorKind::TransientIo,
            ExchangeError::Rejected(_) => ErrorKind::Business,
        }
    }
}
