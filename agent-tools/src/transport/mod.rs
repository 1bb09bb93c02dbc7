//! Transports connecting the executor to tool backends.
//!
//! Every transport exposes the same two operations, `list_tools` and `call`,
//! and owns at most one connection that is opened lazily and released by
//! `close`.

use std::time::Duration;

use agent_primitives::ToolDescriptor;
use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::{CallReply, JsonRpcError};

mod http;
mod in_process;
mod stdio;

pub use http::{DEFAULT_HTTP_TIMEOUT, HttpTransport};
pub use in_process::InProcessTransport;
pub use stdio::{DEFAULT_STDIO_TIMEOUT, StdioConfig, StdioTransport};

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Failures raised while talking to a backend.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The backend process or connection could not be started.
    #[error("failed to connect to backend: {reason}")]
    Connect {
        /// Additional context for the failure.
        reason: String,
    },
    /// Reading or writing the connection failed.
    #[error("backend i/o error: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
    /// The backend did not answer in time.
    #[error("backend did not respond within {timeout:?}")]
    Timeout {
        /// Timeout that elapsed.
        timeout: Duration,
    },
    /// The connection closed before a response arrived.
    #[error("backend connection closed")]
    Closed,
    /// The backend answered with something that is not valid protocol.
    #[error("malformed backend response: {reason}")]
    Protocol {
        /// Additional context for the failure.
        reason: String,
    },
    /// The backend answered with a JSON-RPC error object.
    #[error("backend error {}: {}", .error.code, .error.message)]
    Rpc {
        /// Error object returned by the backend.
        error: JsonRpcError,
    },
}

impl TransportError {
    /// Convenience constructor for connection failures.
    #[must_use]
    pub fn connect(reason: impl Into<String>) -> Self {
        Self::Connect {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for protocol violations.
    #[must_use]
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Whether the backend could not be reached at all, as opposed to having
    /// answered with an error.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Io { .. } | Self::Timeout { .. } | Self::Closed
        )
    }
}

/// Connection to one tool backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short label used in logs (`in_process`, `stdio`, `http`).
    fn kind(&self) -> &'static str;

    /// Lists the tools the backend offers.
    async fn list_tools(&self) -> TransportResult<Vec<ToolDescriptor>>;

    /// Invokes a tool. Domain failures come back as [`CallReply::Error`].
    async fn call(&self, name: &str, arguments: Map<String, Value>) -> TransportResult<CallReply>;

    /// Releases the connection. Later calls may reconnect.
    async fn close(&self);
}
