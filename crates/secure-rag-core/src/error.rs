//! Error taxonomy for the retrieval engine.
//!
//! Every failure that crosses the engine boundary is one of four kinds.
//! Data conditions such as "document produced no chunks" or "corpus is
//! empty" are not errors at all; they surface as empty results.

use thiserror::Error;

/// Errors returned by index construction, persistence, and querying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetrievalError {
    /// Fatal misconfiguration: dimension or model mismatch, fusion weights
    /// that do not sum to 1.0, chunk overlap not smaller than chunk size.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Recoverable failure: embedding provider unreachable or timed out,
    /// interrupted disk write. Safe to retry from scratch.
    #[error("transient error: {0}")]
    Transient(String),

    /// A persisted artifact exists but is unreadable, malformed, missing
    /// its siblings, or out of sync with them.
    #[error("index corrupted: {0}")]
    Corrupted(String),

    /// The caller sent a request that can never succeed (e.g. `k == 0`).
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl RetrievalError {
    /// Returns `true` if the operation may succeed when retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetrievalError::Transient(_))
    }

    /// Short machine-readable kind, used in logs and HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            RetrievalError::Configuration(_) => "configuration",
            RetrievalError::Transient(_) => "transient",
            RetrievalError::Corrupted(_) => "corrupted",
            RetrievalError::InvalidQuery(_) => "invalid_query",
        }
    }
}

/// Convenience alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, RetrievalError>;
