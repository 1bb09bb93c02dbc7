//! Drives one query through Retrieve, Decide and Execute.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_adapters::{AdapterError, AdapterResult, Decision, DecisionService};
use agent_index::{DEFAULT_SCORE_THRESHOLD, DEFAULT_TOP_K, ToolRetriever};
use agent_primitives::{QueryId, ToolCall, ToolDescriptor};
use agent_tools::{FailureKind, ToolExecutor, ToolOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{Instrument, debug, info_span, warn};

use crate::error::{KernelError, KernelResult};
use crate::report::{CandidateTrace, FailureCause, QueryOutcome, QueryReport};
use crate::retry::RetryPolicy;
use crate::sink::{ReportSink, TracingReportSink};
use crate::state::{QueryLifecycle, QueryState};

/// Message used when retrieval finds nothing and the policy is to decline.
pub const NO_TOOLS_MESSAGE: &str = "I couldn't find any relevant tools to answer your question.";

/// What to do when retrieval returns no candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyCandidatePolicy {
    /// Decline immediately without consulting the decision service.
    #[default]
    Decline,
    /// Ask the decision service anyway, with an empty tool list.
    Consult,
}

impl FromStr for EmptyCandidatePolicy {
    type Err = KernelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "decline" => Ok(Self::Decline),
            "consult" => Ok(Self::Consult),
            other => Err(KernelError::configuration(format!(
                "unknown empty-candidate policy `{other}` (expected `decline` or `consult`)"
            ))),
        }
    }
}

/// How candidate tools are chosen for the decision service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Rank the catalog against the query and keep the top candidates.
    #[default]
    Retrieve,
    /// Offer every catalog tool, in catalog order, without scoring.
    AllTools,
}

impl RetrievalMode {
    /// Stable snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Retrieve => "retrieve",
            Self::AllTools => "all_tools",
        }
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalMode {
    type Err = KernelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "retrieve" => Ok(Self::Retrieve),
            "all_tools" => Ok(Self::AllTools),
            other => Err(KernelError::configuration(format!(
                "unknown retrieval mode `{other}` (expected `retrieve` or `all_tools`)"
            ))),
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    retrieval_mode: RetrievalMode,
    top_k: usize,
    score_threshold: f32,
    empty_candidates: EmptyCandidatePolicy,
    decision_timeout: Duration,
    decision_retry: RetryPolicy,
    backend_retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retrieval_mode: RetrievalMode::default(),
            top_k: DEFAULT_TOP_K,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            empty_candidates: EmptyCandidatePolicy::default(),
            decision_timeout: Duration::from_secs(60),
            decision_retry: RetryPolicy::default(),
            backend_retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Sets how candidates are chosen.
    #[must_use]
    pub const fn with_retrieval_mode(mut self, mode: RetrievalMode) -> Self {
        self.retrieval_mode = mode;
        self
    }

    /// Candidate selection mode.
    #[must_use]
    pub const fn retrieval_mode(&self) -> RetrievalMode {
        self.retrieval_mode
    }

    /// Sets the number of candidates to retrieve.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Configuration`] for `0`.
    pub fn with_top_k(mut self, top_k: usize) -> KernelResult<Self> {
        if top_k == 0 {
            return Err(KernelError::configuration("top_k must be at least 1"));
        }
        self.top_k = top_k;
        Ok(self)
    }

    /// Sets the minimum similarity score.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Configuration`] outside `[-1, 1]`.
    pub fn with_score_threshold(mut self, threshold: f32) -> KernelResult<Self> {
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(KernelError::configuration(format!(
                "score threshold {threshold} is outside [-1, 1]"
            )));
        }
        self.score_threshold = threshold;
        Ok(self)
    }

    /// Sets the empty-candidate policy.
    #[must_use]
    pub const fn with_empty_candidates(mut self, policy: EmptyCandidatePolicy) -> Self {
        self.empty_candidates = policy;
        self
    }

    /// Sets the per-attempt decision service timeout.
    #[must_use]
    pub const fn with_decision_timeout(mut self, timeout: Duration) -> Self {
        self.decision_timeout = timeout;
        self
    }

    /// Sets how decision service calls are retried.
    #[must_use]
    pub const fn with_decision_retry(mut self, retry: RetryPolicy) -> Self {
        self.decision_retry = retry;
        self
    }

    /// Sets how unavailable backends are retried.
    #[must_use]
    pub const fn with_backend_retry(mut self, retry: RetryPolicy) -> Self {
        self.backend_retry = retry;
        self
    }

    /// Candidates retrieved per query.
    #[must_use]
    pub const fn top_k(&self) -> usize {
        self.top_k
    }

    /// Minimum similarity score.
    #[must_use]
    pub const fn score_threshold(&self) -> f32 {
        self.score_threshold
    }

    /// Empty-candidate policy.
    #[must_use]
    pub const fn empty_candidates(&self) -> EmptyCandidatePolicy {
        self.empty_candidates
    }
}

/// Runs queries through retrieval, the decision service and the executor.
///
/// Holds no per-query state; one instance serves any number of concurrent
/// queries.
pub struct Orchestrator {
    retriever: ToolRetriever,
    decision: Arc<dyn DecisionService>,
    executor: Arc<ToolExecutor>,
    sink: Arc<dyn ReportSink>,
    config: OrchestratorConfig,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

/// Mutable working state of one query.
struct Run {
    lifecycle: QueryLifecycle,
    query: String,
    candidates: Vec<CandidateTrace>,
    call: Option<ToolCall>,
    tool_outcome: Option<ToolOutcome>,
    tool_attempts: u32,
    started: Instant,
}

impl Run {
    fn finish(mut self, outcome: QueryOutcome) -> KernelResult<QueryReport> {
        self.lifecycle.advance(outcome.state())?;
        Ok(QueryReport {
            query_id: self.lifecycle.query_id(),
            query: self.query,
            candidates: self.candidates,
            call: self.call,
            tool_outcome: self.tool_outcome,
            outcome,
            states: self.lifecycle.into_visited(),
            tool_attempts: self.tool_attempts,
            elapsed: self.started.elapsed(),
        })
    }
}

impl Orchestrator {
    /// Creates an orchestrator logging reports through [`TracingReportSink`].
    #[must_use]
    pub fn new(
        retriever: ToolRetriever,
        decision: Arc<dyn DecisionService>,
        executor: Arc<ToolExecutor>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            retriever,
            decision,
            executor,
            sink: Arc::new(TracingReportSink),
            config,
        }
    }

    /// Replaces the report sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Executor used for tool calls.
    #[must_use]
    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    /// Retriever used for candidate lookup.
    #[must_use]
    pub const fn retriever(&self) -> &ToolRetriever {
        &self.retriever
    }

    /// Processes one query to a terminal state.
    ///
    /// Collaborator failures end the query in `Failed` or `Answered` and are
    /// reported, not returned.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::EmptyQuery`] for blank input, and
    /// [`KernelError::InvalidTransition`] if the state machine is violated.
    pub async fn handle(&self, query: &str) -> KernelResult<QueryReport> {
        let query = query.trim();
        if query.is_empty() {
            return Err(KernelError::EmptyQuery);
        }
        let query_id = QueryId::random();
        let span = info_span!("query", %query_id);
        let report = self.run(query_id, query).instrument(span).await?;
        self.sink.record(&report);
        Ok(report)
    }

    async fn run(&self, query_id: QueryId, query: &str) -> KernelResult<QueryReport> {
        let mut run = Run {
            lifecycle: QueryLifecycle::new(query_id),
            query: query.to_owned(),
            candidates: Vec::new(),
            call: None,
            tool_outcome: None,
            tool_attempts: 0,
            started: Instant::now(),
        };

        run.lifecycle.advance(QueryState::Retrieving)?;
        let candidates: Vec<Arc<ToolDescriptor>> = match self.config.retrieval_mode {
            RetrievalMode::Retrieve => match self
                .retriever
                .retrieve_with(query, self.config.top_k, self.config.score_threshold)
                .await
            {
                Ok(retrieved) => {
                    run.candidates = retrieved.iter().map(CandidateTrace::from).collect();
                    retrieved.iter().map(|tool| tool.descriptor().clone()).collect()
                }
                Err(err) => {
                    warn!(error = %err, "retrieval failed");
                    return run.finish(QueryOutcome::Failed {
                        cause: FailureCause::Retrieval,
                        message: err.to_string(),
                    });
                }
            },
            RetrievalMode::AllTools => {
                let catalog = self.retriever.index().catalog();
                let all: Vec<Arc<ToolDescriptor>> = catalog.iter().cloned().collect();
                run.candidates = all
                    .iter()
                    .enumerate()
                    .map(|(position, tool)| CandidateTrace::unscored(tool.name(), position + 1))
                    .collect();
                debug!(candidates = all.len(), "retrieval bypassed; offering every tool");
                all
            }
        };

        if candidates.is_empty() && self.config.empty_candidates == EmptyCandidatePolicy::Decline {
            debug!("no candidates; declining");
            return run.finish(QueryOutcome::Declined {
                reason: NO_TOOLS_MESSAGE.to_owned(),
            });
        }

        run.lifecycle.advance(QueryState::Deciding)?;
        let decision = self
            .with_decision_retry("decide", || self.decision.decide(query, &candidates))
            .await;
        let call = match decision {
            Ok(Decision::Call(call)) => call,
            Ok(Decision::Answer(answer)) => return run.finish(QueryOutcome::Answered { answer }),
            Ok(Decision::Decline(reason)) => return run.finish(QueryOutcome::Declined { reason }),
            Err(err) => return run.finish(decision_failure(&err)),
        };

        run.lifecycle.advance(QueryState::Executing)?;
        run.call = Some(call.clone());
        let outcome = self.execute(&call, &candidates, &mut run.tool_attempts).await;
        run.tool_outcome = Some(outcome.clone());

        match outcome {
            ToolOutcome::Success { value } => {
                match self.compose(query, &call, &value).await {
                    Ok(answer) => run.finish(QueryOutcome::Answered { answer }),
                    Err(err) => run.finish(decision_failure(&err)),
                }
            }
            ToolOutcome::Failure {
                kind: FailureKind::BackendUnavailable,
                message,
            } => run.finish(QueryOutcome::Failed {
                cause: FailureCause::BackendUnavailable,
                message,
            }),
            ToolOutcome::Failure { message, .. } => run.finish(QueryOutcome::Answered { answer: message }),
        }
    }

    /// Invokes `call`, retrying while the backend is unavailable. Calls naming
    /// a tool outside the offered candidates are never executed.
    async fn execute(&self, call: &ToolCall, offered: &[Arc<ToolDescriptor>], attempts: &mut u32) -> ToolOutcome {
        let offered: HashSet<&str> = offered.iter().map(|tool| tool.name()).collect();
        if !offered.contains(call.tool_name()) {
            warn!(tool = call.tool_name(), "decision named a tool outside the candidate set");
            return ToolOutcome::failure(
                FailureKind::NotFound,
                format!("tool `{}` was not among the offered candidates", call.tool_name()),
            );
        }

        let policy = self.config.backend_retry;
        loop {
            *attempts += 1;
            let outcome = self.executor.invoke(call).await;
            let unavailable = outcome.failure_kind().is_some_and(FailureKind::is_retryable);
            if !unavailable || *attempts >= policy.max_attempts() {
                debug!(tool = call.tool_name(), attempts = *attempts, success = outcome.is_success(), "tool call finished");
                return outcome;
            }
            let delay = policy.delay_after(*attempts);
            warn!(tool = call.tool_name(), attempt = *attempts, ?delay, "backend unavailable; retrying");
            tokio::time::sleep(delay).await;
        }
    }

    async fn compose(&self, query: &str, call: &ToolCall, value: &Value) -> AdapterResult<String> {
        self.with_decision_retry("compose_answer", || self.decision.compose_answer(query, call, value))
            .await
    }

    async fn with_decision_retry<T, F, Fut>(&self, label: &str, mut operation: F) -> AdapterResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AdapterResult<T>>,
    {
        let timeout = self.config.decision_timeout;
        self.config
            .decision_retry
            .run(
                label,
                |_| {
                    let attempt = operation();
                    async move {
                        tokio::time::timeout(timeout, attempt)
                            .await
                            .map_err(|_| AdapterError::Timeout { timeout })?
                    }
                },
                AdapterError::is_retryable,
            )
            .await
    }
}

fn decision_failure(err: &AdapterError) -> QueryOutcome {
    warn!(error = %err, "decision service failed");
    QueryOutcome::Failed {
        cause: FailureCause::DecisionService,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parses() {
        assert_eq!("Consult".parse::<EmptyCandidatePolicy>().unwrap(), EmptyCandidatePolicy::Consult);
        assert!("maybe".parse::<EmptyCandidatePolicy>().is_err());
    }

    #[test]
    fn retrieval_mode_parses_either_spelling() {
        assert_eq!("all-tools".parse::<RetrievalMode>().unwrap(), RetrievalMode::AllTools);
        assert_eq!(" Retrieve ".parse::<RetrievalMode>().unwrap(), RetrievalMode::Retrieve);
        assert!("none".parse::<RetrievalMode>().is_err());
        assert_eq!(RetrievalMode::AllTools.to_string(), "all_tools");
    }

    #[test]
    fn config_rejects_bad_values() {
        assert!(OrchestratorConfig::default().with_top_k(0).is_err());
        assert!(OrchestratorConfig::default().with_score_threshold(1.5).is_err());
        let config = OrchestratorConfig::default().with_top_k(5).unwrap();
        assert_eq!(config.top_k(), 5);
    }
}
