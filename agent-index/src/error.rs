//! Error types for the embedding index.

use serde_json::Error as SerdeError;
use thiserror::Error;

/// Errors emitted by the index, its store and embedders.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Persisted index could not be read or is corrupt. Callers rebuild.
    #[error("index storage error: {reason}")]
    Storage {
        /// Human-readable reason describing the failure.
        reason: String,
    },
    /// Underlying I/O failure while writing the index.
    #[error("i/o error: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
    /// Serialization error while encoding records.
    #[error("serialization error: {source}")]
    Serialization {
        /// Source [`serde_json::Error`].
        #[from]
        source: SerdeError,
    },
    /// Embedding vector failed validation.
    #[error("invalid embedding record: {0}")]
    InvalidRecord(&'static str),
    /// A query asked for zero results.
    #[error("top_k must be at least 1")]
    InvalidTopK,
    /// Vectors of different dimensionality were compared.
    #[error("embedding dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality of the indexed vectors.
        expected: usize,
        /// Dimensionality of the offending vector.
        actual: usize,
    },
    /// The embedding function failed.
    #[error("embedding failed: {reason}")]
    Embedding {
        /// Human-readable reason describing the failure.
        reason: String,
    },
    /// The embedding function did not answer in time.
    #[error("embedding timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        timeout_ms: u128,
    },
}

impl IndexError {
    /// Helper to construct storage errors from string-like values.
    #[must_use]
    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            reason: reason.into(),
        }
    }

    /// Helper to construct embedding errors from string-like values.
    #[must_use]
    pub fn embedding(reason: impl Into<String>) -> Self {
        Self::Embedding {
            reason: reason.into(),
        }
    }

    /// Returns `true` when the persisted index should be discarded and rebuilt.
    #[must_use]
    pub const fn requires_rebuild(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

/// Result type alias for index operations.
pub type IndexResult<T> = Result<T, IndexError>;
