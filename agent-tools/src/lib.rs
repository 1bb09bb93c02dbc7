//! Tool registration, JSON-RPC tool backends and the tool executor.
//!
//! A [`registry::ToolRegistry`] holds tool implementations registered at
//! startup. [`backend`] serves a registry over stdio or HTTP, and
//! [`executor::ToolExecutor`] invokes tools by name across any mix of
//! in-process, subprocess and HTTP backends.

#![warn(missing_docs, clippy::pedantic)]

pub mod backend;
pub mod builtin;
pub mod executor;
pub mod outcome;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod transport;

pub use builtin::register_builtin_tools;
pub use executor::{DEFAULT_BACKEND_TIMEOUT, DiscoveredTool, ToolExecutor};
pub use outcome::{FailureKind, ToolOutcome};
pub use registry::{Tool, ToolError, ToolHandle, ToolRegistry, ToolResult};
pub use transport::{
    HttpTransport, InProcessTransport, StdioConfig, StdioTransport, Transport, TransportError,
    TransportResult,
};
