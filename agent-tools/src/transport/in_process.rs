use std::sync::Arc;

use agent_primitives::ToolDescriptor;
use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{Transport, TransportResult};
use crate::backend;
use crate::protocol::CallReply;
use crate::registry::ToolRegistry;

/// Calls tools registered in the same process.
///
/// Goes through the same dispatch path as the stdio and HTTP servers, so
/// in-process and remote backends classify errors identically.
#[derive(Debug, Clone)]
pub struct InProcessTransport {
    registry: Arc<ToolRegistry>,
}

impl InProcessTransport {
    /// Wraps a registry.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    fn kind(&self) -> &'static str {
        "in_process"
    }

    async fn list_tools(&self) -> TransportResult<Vec<ToolDescriptor>> {
        Ok(self.registry.list())
    }

    async fn call(&self, name: &str, arguments: Map<String, Value>) -> TransportResult<CallReply> {
        backend::call_tool(&self.registry, name, arguments)
            .await
            .map_err(|error| super::TransportError::Rpc { error })
    }

    async fn close(&self) {}
}
