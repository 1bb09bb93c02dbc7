//! What happened to one query.

use std::fmt;
use std::time::Duration;

use agent_index::RetrievedTool;
use agent_primitives::{QueryId, ToolCall};
use agent_tools::ToolOutcome;
use serde::{Deserialize, Serialize};

use crate::state::QueryState;

/// Why a query ended in [`QueryState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// Candidate retrieval failed (embedding error or timeout).
    Retrieval,
    /// The decision service failed after its retries.
    DecisionService,
    /// The tool backend stayed unreachable after one retry.
    BackendUnavailable,
}

impl FailureCause {
    /// Stable snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
            Self::DecisionService => "decision_service",
            Self::BackendUnavailable => "backend_unavailable",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    /// An answer for the caller. Tool failures other than unavailability are
    /// answered with their message.
    Answered {
        /// Text returned to the caller.
        answer: String,
    },
    /// The query was refused.
    Declined {
        /// Explanation returned to the caller.
        reason: String,
    },
    /// No answer could be produced.
    Failed {
        /// Distinguishable cause.
        cause: FailureCause,
        /// Detail of the last error.
        message: String,
    },
}

impl QueryOutcome {
    /// State the outcome corresponds to.
    #[must_use]
    pub const fn state(&self) -> QueryState {
        match self {
            Self::Answered { .. } => QueryState::Answered,
            Self::Declined { .. } => QueryState::Declined,
            Self::Failed { .. } => QueryState::Failed,
        }
    }

    /// Text to show the caller.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Answered { answer } => answer,
            Self::Declined { reason } => reason,
            Self::Failed { message, .. } => message,
        }
    }
}

/// One retrieved candidate, as recorded on the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTrace {
    /// Tool name.
    pub tool_name: String,
    /// Similarity score; absent when retrieval was bypassed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    /// 1-based rank.
    pub rank: usize,
}

impl CandidateTrace {
    /// A candidate offered without scoring, at catalog position `rank`.
    #[must_use]
    pub fn unscored(tool_name: impl Into<String>, rank: usize) -> Self {
        Self {
            tool_name: tool_name.into(),
            score: None,
            rank,
        }
    }
}

impl From<&RetrievedTool> for CandidateTrace {
    fn from(tool: &RetrievedTool) -> Self {
        Self {
            tool_name: tool.tool_name().to_owned(),
            score: Some(tool.score()),
            rank: tool.rank(),
        }
    }
}

/// Full record of one query, handed to the [`crate::sink::ReportSink`] and
/// returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryReport {
    /// Query identifier.
    pub query_id: QueryId,
    /// Query text as submitted (trimmed).
    pub query: String,
    /// Candidates produced by retrieval, best first.
    pub candidates: Vec<CandidateTrace>,
    /// Tool call chosen by the decision service, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<ToolCall>,
    /// Outcome of the tool call, if one was attempted or rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_outcome: Option<ToolOutcome>,
    /// Terminal result.
    pub outcome: QueryOutcome,
    /// States visited, starting at `received`.
    pub states: Vec<QueryState>,
    /// Tool invocations attempted, counting retries.
    pub tool_attempts: u32,
    /// Wall-clock time spent on the query.
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

impl QueryReport {
    /// Final state.
    #[must_use]
    pub const fn final_state(&self) -> QueryState {
        self.outcome.state()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
