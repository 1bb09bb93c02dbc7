//! Per-query orchestration: the Retrieve, Decide, Execute state machine.
//!
//! [`Orchestrator::handle`] runs one query to a terminal state and returns a
//! [`QueryReport`]; [`QueryScheduler`] bounds how many queries run at once.

#![warn(missing_docs, clippy::pedantic)]

pub mod error;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod sink;
pub mod state;

pub use error::{KernelError, KernelResult};
pub use orchestrator::{EmptyCandidatePolicy, NO_TOOLS_MESSAGE, Orchestrator, OrchestratorConfig, RetrievalMode};
pub use report::{CandidateTrace, FailureCause, QueryOutcome, QueryReport};
pub use retry::RetryPolicy;
pub use scheduler::{QueryScheduler, SchedulerConfig, SchedulerError, SchedulerResult};
pub use sink::{CollectingSink, ReportSink, TracingReportSink};
pub use state::{QueryLifecycle, QueryState};
