//! Tool invocation requests.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A concrete request to invoke one tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(rename = "tool")]
    tool_name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

impl ToolCall {
    /// Creates a call with the supplied arguments.
    #[must_use]
    pub fn new(tool_name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }

    /// Creates a call without arguments.
    #[must_use]
    pub fn without_arguments(tool_name: impl Into<String>) -> Self {
        Self::new(tool_name, Map::new())
    }

    /// Name of the tool to invoke.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Argument object.
    #[must_use]
    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    /// Consumes the call, returning the tool name and arguments.
    #[must_use]
    pub fn into_parts(self) -> (String, Map<String, Value>) {
        (self.tool_name, self.arguments)
    }
}
