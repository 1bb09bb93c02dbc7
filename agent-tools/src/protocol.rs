//! JSON-RPC 2.0 types spoken between the executor and tool backends.

use agent_primitives::ToolDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method names understood by tool backends.
pub mod methods {
    /// Lists the tools a backend offers.
    pub const TOOLS_LIST: &str = "tools/list";
    /// Invokes one tool.
    pub const TOOLS_CALL: &str = "tools/call";
}

/// JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters, including tool arguments failing the schema.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal backend error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// The named tool is not served by this backend.
    pub const TOOL_NOT_FOUND: i32 = -32006;
}

/// JSON-RPC request identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    /// Numeric id, used by this crate's clients.
    Number(u64),
    /// String id, accepted from foreign clients.
    String(String),
}

/// JSON-RPC 2.0 request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JsonRpcId>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates a request with a numeric id.
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: Some(JsonRpcId::Number(id)),
            method: method.into(),
            params: Some(params),
        }
    }
}

/// JSON-RPC error object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code, see [`error_codes`].
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Id of the answered request; `None` when the request could not be parsed.
    pub id: Option<JsonRpcId>,
    /// Result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Creates a success response.
    #[must_use]
    pub fn success(id: Option<JsonRpcId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    #[must_use]
    pub fn error(id: Option<JsonRpcId>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Parameters of [`methods::TOOLS_CALL`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallParams {
    /// Tool name.
    pub name: String,
    /// Argument object.
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Result of [`methods::TOOLS_LIST`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListToolsResult {
    /// Offered tools.
    pub tools: Vec<ToolDescriptor>,
}

/// Result of [`methods::TOOLS_CALL`]: the tool's own verdict.
///
/// Protocol failures travel as JSON-RPC errors; domain failures of a tool that
/// did run travel as `status: "error"`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CallReply {
    /// The tool produced a value.
    Ok {
        /// Returned value.
        value: Value,
    },
    /// The tool reported a domain error.
    Error {
        /// Message reported by the tool.
        error_message: String,
    },
}
