//! Runtime registry for tool descriptors and their implementations.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use agent_primitives::ToolDescriptor;
use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema;

/// Result alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Trait implemented by tool executors.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Invokes the tool with a validated argument object, returning JSON output.
    async fn invoke(&self, arguments: Map<String, Value>) -> ToolResult<Value>;
}

#[async_trait]
impl<F, Fut> Tool for F
where
    F: Send + Sync + Fn(Map<String, Value>) -> Fut,
    Fut: Future<Output = ToolResult<Value>> + Send,
{
    async fn invoke(&self, arguments: Map<String, Value>) -> ToolResult<Value> {
        (self)(arguments).await
    }
}

/// Handle returned by the registry for direct invocation.
#[derive(Clone)]
pub struct ToolHandle {
    descriptor: Arc<ToolDescriptor>,
    executor: Arc<dyn Tool>,
}

impl ToolHandle {
    /// Returns the associated descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &Arc<ToolDescriptor> {
        &self.descriptor
    }

    /// Normalises and validates `arguments`, then executes the tool.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidArguments`] when the arguments do not match
    /// the descriptor, or propagates [`ToolError::Execution`] from the
    /// implementation.
    pub async fn invoke(&self, arguments: Map<String, Value>) -> ToolResult<Value> {
        let arguments = schema::normalize(&self.descriptor, arguments);
        schema::validate(&self.descriptor, &arguments).map_err(|reason| {
            ToolError::InvalidArguments {
                name: self.descriptor.name().to_owned(),
                reason,
            }
        })?;
        self.executor.invoke(arguments).await
    }
}

#[derive(Default)]
struct Entries {
    order: Vec<String>,
    handles: HashMap<String, ToolHandle>,
}

/// Registry that stores tool implementations keyed by name.
///
/// Tools are registered explicitly at startup; listing preserves registration
/// order.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<Entries>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ToolRegistry")
            .field("registered", &inner.order)
            .finish()
    }
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool implementation under its descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::DuplicateTool`] if the name is already present.
    pub fn register_tool<T>(&self, descriptor: ToolDescriptor, tool: T) -> ToolResult<()>
    where
        T: Tool + 'static,
    {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let name = descriptor.name().to_owned();
        if inner.handles.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }

        inner.order.push(name.clone());
        inner.handles.insert(
            name,
            ToolHandle {
                descriptor: Arc::new(descriptor),
                executor: Arc::new(tool),
            },
        );
        Ok(())
    }

    /// Returns a handle to the tool matching the supplied name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ToolHandle> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.handles.get(name).cloned()
    }

    /// Invokes a registered tool directly.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`] when the tool is not found,
    /// [`ToolError::InvalidArguments`] on schema violations, or propagates
    /// [`ToolError::Execution`] when the implementation fails.
    pub async fn invoke(&self, name: &str, arguments: Map<String, Value>) -> ToolResult<Value> {
        let handle = self.get(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_owned(),
        })?;
        handle.invoke(arguments).await
    }

    /// Lists the descriptors of all registered tools in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .order
            .iter()
            .filter_map(|name| inner.handles.get(name))
            .map(|handle| handle.descriptor.as_ref().clone())
            .collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors produced by tool registration and invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool name collided with an existing registration.
    #[error("tool `{name}` is already registered")]
    DuplicateTool {
        /// Name of the offending tool.
        name: String,
    },

    /// Requested tool does not exist.
    #[error("tool `{name}` is not registered")]
    UnknownTool {
        /// Name of the missing tool.
        name: String,
    },

    /// Arguments did not satisfy the tool's parameter schema.
    #[error("invalid arguments for `{name}`: {reason}")]
    InvalidArguments {
        /// Name of the tool.
        name: String,
        /// First schema violation found.
        reason: String,
    },

    /// Tool execution failed with a domain error.
    #[error("{reason}")]
    Execution {
        /// Human-readable error returned by the tool implementation.
        reason: String,
    },
}

impl ToolError {
    /// Creates an execution error from the supplied reason.
    #[must_use]
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use agent_primitives::{ParamType, ParameterSpec};
    use serde_json::json;

    fn descriptor() -> ToolDescriptor {
        ToolDescriptor::builder("echo", "Echo incoming payload")
            .parameter(ParameterSpec::required("message", ParamType::String))
            .build()
            .unwrap()
    }

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn register_and_invoke_tool() {
        let registry = ToolRegistry::new();
        registry
            .register_tool(descriptor(), |input: Map<String, Value>| async move {
                Ok(Value::Object(input))
            })
            .unwrap();

        let payload = json!({ "message": "hello" });
        let output = registry.invoke("echo", args(payload.clone())).await.unwrap();
        assert_eq!(output, payload);
    }

    #[tokio::test]
    async fn duplicate_registration_errors() {
        let registry = ToolRegistry::new();
        registry
            .register_tool(descriptor(), |_: Map<String, Value>| async move { Ok(Value::Null) })
            .unwrap();

        let err = registry
            .register_tool(descriptor(), |_: Map<String, Value>| async move { Ok(Value::Null) })
            .expect_err("duplicate registration should fail");

        assert!(matches!(err, ToolError::DuplicateTool { name } if name == "echo"));
    }

    #[tokio::test]
    async fn unknown_tool_errors() {
        let registry = ToolRegistry::new();
        let err = registry
            .invoke("missing", Map::new())
            .await
            .expect_err("unknown tool should error");

        assert!(matches!(err, ToolError::UnknownTool { name } if name == "missing"));
    }

    #[tokio::test]
    async fn schema_violations_never_reach_the_tool() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = ToolRegistry::new();
        registry
            .register_tool(descriptor(), move |_: Map<String, Value>| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(Value::Null) }
            })
            .unwrap();

        let err = registry
            .invoke("echo", args(json!({ "message": 42 })))
            .await
            .expect_err("wrong type");
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listing_preserves_registration_order() {
        let registry = ToolRegistry::new();
        for name in ["b", "a", "c"] {
            let descriptor = ToolDescriptor::builder(name, "x").build().unwrap();
            registry
                .register_tool(descriptor, |_: Map<String, Value>| async move { Ok(Value::Null) })
                .unwrap();
        }
        let names: Vec<_> = registry.list().iter().map(|d| d.name().to_owned()).collect();
        assert_eq!(names, ["b", "a", "c"]);
    }
}
