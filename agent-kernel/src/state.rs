//! Per-query state machine.

use std::fmt;

use agent_primitives::QueryId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KernelError, KernelResult};

/// States a query passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    /// Accepted, not yet processed.
    Received,
    /// Looking up candidate tools.
    Retrieving,
    /// Waiting on the decision service.
    Deciding,
    /// Invoking the chosen tool.
    Executing,
    /// Finished with an answer.
    Answered,
    /// Finished with a refusal.
    Declined,
    /// Finished without an answer.
    Failed,
}

impl QueryState {
    /// Returns `true` for `Answered`, `Declined` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Answered | Self::Declined | Self::Failed)
    }

    /// Whether the transition table allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Retrieving)
                | (Self::Retrieving, Self::Deciding | Self::Declined | Self::Failed)
                | (
                    Self::Deciding,
                    Self::Executing | Self::Answered | Self::Declined | Self::Failed
                )
                | (Self::Executing, Self::Answered | Self::Failed)
        )
    }

    /// Stable snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Retrieving => "retrieving",
            Self::Deciding => "deciding",
            Self::Executing => "executing",
            Self::Answered => "answered",
            Self::Declined => "declined",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the state of one query and the path it took.
#[derive(Debug, Clone)]
pub struct QueryLifecycle {
    query_id: QueryId,
    visited: Vec<QueryState>,
}

impl QueryLifecycle {
    /// Starts a lifecycle in [`QueryState::Received`].
    #[must_use]
    pub fn new(query_id: QueryId) -> Self {
        Self {
            query_id,
            visited: vec![QueryState::Received],
        }
    }

    /// Identifier of the tracked query.
    #[must_use]
    pub const fn query_id(&self) -> QueryId {
        self.query_id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> QueryState {
        self.visited.last().copied().unwrap_or(QueryState::Received)
    }

    /// Every state visited so far, in order.
    #[must_use]
    pub fn visited(&self) -> &[QueryState] {
        &self.visited
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidTransition`] when the table forbids the
    /// move, including any move out of a terminal state.
    pub fn advance(&mut self, next: QueryState) -> KernelResult<QueryState> {
        let from = self.state();
        if !from.can_transition(next) {
            return Err(KernelError::InvalidTransition {
                query_id: self.query_id,
                from,
                to: next,
            });
        }
        debug!(query_id = %self.query_id, %from, to = %next, "query transition");
        self.visited.push(next);
        Ok(next)
    }

    /// Consumes the lifecycle, returning the visited states.
    #[must_use]
    pub fn into_visited(self) -> Vec<QueryState> {
        self.visited
    }
}
