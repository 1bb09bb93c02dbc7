//! Destinations for finished query reports.

use std::sync::{Mutex, PoisonError};

use tracing::{info, warn};

use crate::report::{QueryOutcome, QueryReport};

/// Receives every finished [`QueryReport`].
pub trait ReportSink: Send + Sync {
    /// Records one report. Must not block for long.
    fn record(&self, report: &QueryReport);
}

/// Logs reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn record(&self, report: &QueryReport) {
        let tool = report.call.as_ref().map(agent_primitives::ToolCall::tool_name);
        let best = report.candidates.first();
        let elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX);
        match &report.outcome {
            QueryOutcome::Failed { cause, message } => warn!(
                query_id = %report.query_id,
                state = %report.final_state(),
                %cause,
                tool,
                candidates = report.candidates.len(),
                elapsed_ms,
                "query failed: {message}"
            ),
            _ => info!(
                query_id = %report.query_id,
                state = %report.final_state(),
                tool,
                candidates = report.candidates.len(),
                best_tool = best.map(|candidate| candidate.tool_name.as_str()),
                score = best.and_then(|candidate| candidate.score),
                attempts = report.tool_attempts,
                elapsed_ms,
                "query finished"
            ),
        }
    }
}

/// Keeps reports in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    reports: Mutex<Vec<QueryReport>>,
}

impl CollectingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the reports recorded so far.
    #[must_use]
    pub fn reports(&self) -> Vec<QueryReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of reports recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReportSink for CollectingSink {
    fn record(&self, report: &QueryReport) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
    }
}
