//! Core shared types for the tool retrieval runtime.
//!
//! Everything downstream (index, executor, orchestrator) speaks in terms of the
//! descriptors and calls defined here.

#![warn(missing_docs, clippy::pedantic)]

mod call;
mod catalog;
mod descriptor;
mod error;
mod ids;

/// Tool invocation requested by the decision-making service.
pub use call::ToolCall;
/// Ordered, name-unique collection of tool descriptors.
pub use catalog::ToolCatalog;
/// Static metadata describing a tool and its parameters.
pub use descriptor::{ParamType, ParameterSpec, ToolDescriptor, ToolDescriptorBuilder};
/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Identifier attached to every processed query.
pub use ids::QueryId;
