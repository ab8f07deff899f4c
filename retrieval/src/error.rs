//! Error types for the retrieval core.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RetrievalErr>;

/// Errors surfaced by the retrieval and indexing pipeline.
///
/// Worker variants are transient and scoped to a single request or slot.
/// Store variants are recoverable: retrieval degrades instead of failing.
/// Config variants are fatal and surface to the caller.
#[derive(Debug, Error)]
pub enum RetrievalErr {
    #[error("worker request timed out after {timeout_secs}s")]
    WorkerTimeout { timeout_secs: u64 },

    #[error("worker slot {slot} is restarting: {reason}")]
    WorkerRestarting { slot: usize, reason: String },

    #[error("worker request failed: {cause}")]
    WorkerFailed { cause: String },

    #[error("encoder pool is shut down")]
    PoolClosed,

    #[error("store table unavailable: {cause}")]
    StoreMissing { cause: String },

    #[error("full-text index unavailable: {cause}")]
    FtsUnavailable { cause: String },

    #[error("store operation '{operation}' failed: {cause}")]
    StoreFailed { operation: String, cause: String },

    #[error("meta file {path:?} is corrupt: {cause}")]
    MetaCorrupt { path: PathBuf, cause: String },

    #[error("invalid config value for '{field}': {cause}")]
    ConfigError { field: String, cause: String },

    #[error("failed to parse config {path:?}: {cause}")]
    ConfigParseError { path: PathBuf, cause: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
