//! Shared error definitions for catalog loading and primitive types.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Error as UuidError;

/// Result alias used throughout the runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading or validating primitive types.
///
/// Every catalog variant is a load-time failure: the process should refuse to
/// start rather than index a partial catalog.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided query identifier could not be parsed.
    #[error("invalid query id: {source}")]
    InvalidQueryId {
        /// Source parsing error from the UUID library.
        #[from]
        source: UuidError,
    },

    /// Descriptor file could not be read.
    #[error("failed to read tool catalog `{}`: {source}", path.display())]
    Io {
        /// Path of the catalog file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Descriptor file is not valid JSON or does not match the expected shape.
    #[error("malformed tool catalog: {source}")]
    Malformed {
        /// Source decoding error.
        #[from]
        source: serde_json::Error,
    },

    /// A descriptor omitted a mandatory field.
    #[error("tool descriptor #{position} is missing required field `{field}`")]
    MissingField {
        /// Zero-based position of the descriptor in the catalog file.
        position: usize,
        /// Name of the missing field.
        field: &'static str,
    },

    /// Two descriptors share the same name.
    #[error("tool `{name}` is defined more than once")]
    DuplicateTool {
        /// Name of the offending tool.
        name: String,
    },

    /// Descriptor content failed validation.
    #[error("invalid tool descriptor `{name}`: {reason}")]
    InvalidDescriptor {
        /// Tool name, or an empty string when the name itself is invalid.
        name: String,
        /// Human-readable reason for rejection.
        reason: String,
    },
}

impl Error {
    /// Convenience constructor for descriptor validation failures.
    #[must_use]
    pub fn invalid_descriptor(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for failures raised while loading a catalog.
    #[must_use]
    pub const fn is_load_error(&self) -> bool {
        !matches!(self, Self::InvalidQueryId { .. })
    }
}
