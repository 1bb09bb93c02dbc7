//! Result of invoking a tool through the executor.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification of a failed invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No backend offers a tool with that name.
    NotFound,
    /// Arguments failed schema validation; the backend was never contacted.
    InvalidArguments,
    /// Transport failure or timeout. Retryable.
    BackendUnavailable,
    /// The tool ran and reported a domain error. Not retryable.
    BackendError,
}

impl FailureKind {
    /// Whether a retry may succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::BackendUnavailable)
    }

    /// Stable snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidArguments => "invalid_arguments",
            Self::BackendUnavailable => "backend_unavailable",
            Self::BackendError => "backend_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one tool invocation. Never fabricated: a `Success` value always
/// comes from a backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// The tool returned a value.
    Success {
        /// JSON value returned by the tool.
        value: Value,
    },
    /// The invocation failed.
    Failure {
        /// Failure classification.
        kind: FailureKind,
        /// Human-readable message, surfaced verbatim for backend errors.
        message: String,
    },
}

impl ToolOutcome {
    /// Successful outcome.
    #[must_use]
    pub const fn success(value: Value) -> Self {
        Self::Success { value }
    }

    /// Failed outcome.
    #[must_use]
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    /// Returns `true` for [`ToolOutcome::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Failure kind, if any.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }
}
