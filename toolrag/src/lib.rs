//! Retrieval-augmented tool selection runtime.
//!
//! Bundles the component crates and wires them together from a
//! [`config::RuntimeConfig`]: the tool catalog, the persisted embedding index,
//! the routed tool executor, the model-backed decision service and the
//! orchestrator that drives each query to a terminal state.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod runtime;

pub use error::{RuntimeError, RuntimeResult};
pub use runtime::{
    Runtime, build_decision_service, build_embedder, build_executor, open_index, orchestrator_config,
};

/// Catalog and descriptor types.
pub use agent_primitives as primitives;

/// Embedding index and retriever.
pub use agent_index as index;

/// Model adapters and the decision service.
pub use agent_adapters as adapters;

/// Tool registry, transports and executor.
pub use agent_tools as tools;

/// Query orchestration.
pub use agent_kernel as kernel;

/// Tracing setup.
pub use agent_telemetry as telemetry;

/// Runtime configuration.
pub use agent_config as config;
