//! Errors raised by the orchestrator itself.
//!
//! Failures of the pipeline's collaborators (retrieval, decision service,
//! backends) are not errors: they end the query in a terminal state recorded
//! on the report.

use agent_primitives::QueryId;
use thiserror::Error;

use crate::scheduler::SchedulerError;
use crate::state::QueryState;

/// Result alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

/// Errors produced by the kernel.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The query was empty after trimming.
    #[error("query must not be empty")]
    EmptyQuery,
    /// A state change outside the transition table was attempted.
    #[error("invalid transition from {from} to {to} for query {query_id}")]
    InvalidTransition {
        /// Query whose transition failed.
        query_id: QueryId,
        /// State prior to the attempted transition.
        from: QueryState,
        /// Requested state.
        to: QueryState,
    },
    /// The scheduler refused the query.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// The orchestrator configuration is unusable.
    #[error("invalid orchestrator configuration: {reason}")]
    Configuration {
        /// Additional context for the failure.
        reason: String,
    },
}

impl KernelError {
    /// Convenience constructor for configuration errors.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}
