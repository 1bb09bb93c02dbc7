//! Routes tool calls to the backend that advertised them.
//!
//! The executor owns one transport per named backend. Routes are discovered
//! once, on first use, by asking every backend for its tool list; arguments
//! are normalised and validated against the routed descriptor before any
//! backend traffic.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use agent_primitives::{ToolCall, ToolCatalog, ToolDescriptor};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::outcome::{FailureKind, ToolOutcome};
use crate::protocol::{CallReply, error_codes};
use crate::schema;
use crate::transport::{Transport, TransportError};

/// Default per-call timeout applied on top of the transport's own.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

struct Backend {
    name: String,
    transport: Arc<dyn Transport>,
}

/// A tool advertised by one of the configured backends.
#[derive(Clone, Debug)]
pub struct DiscoveredTool {
    backend: String,
    descriptor: Arc<ToolDescriptor>,
}

impl DiscoveredTool {
    /// Name of the backend that serves the tool.
    #[must_use]
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Descriptor reported by the backend.
    #[must_use]
    pub fn descriptor(&self) -> &Arc<ToolDescriptor> {
        &self.descriptor
    }
}

#[derive(Clone)]
struct Route {
    backend: usize,
    descriptor: Arc<ToolDescriptor>,
}

#[derive(Default)]
struct Routes {
    by_name: HashMap<String, Route>,
    order: Vec<String>,
}

/// Invokes tools by name across in-process, subprocess and HTTP backends.
pub struct ToolExecutor {
    backends: Vec<Backend>,
    catalog: Option<Arc<ToolCatalog>>,
    timeout: Duration,
    routes: OnceCell<Routes>,
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolExecutor {
    /// Creates an executor without backends.
    #[must_use]
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            catalog: None,
            timeout: DEFAULT_BACKEND_TIMEOUT,
            routes: OnceCell::new(),
        }
    }

    /// Adds a named backend. Earlier backends win when two advertise the same
    /// tool and neither is the tool's declared owner.
    #[must_use]
    pub fn with_backend(mut self, name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        self.backends.push(Backend {
            name: name.into(),
            transport,
        });
        self
    }

    /// Uses `catalog` for ownership hints and as a fallback route when
    /// discovery missed a tool.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<ToolCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Overrides the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Names of the configured backends, in configuration order.
    pub fn backend_names(&self) -> impl Iterator<Item = &str> {
        self.backends.iter().map(|backend| backend.name.as_str())
    }

    /// Lists every tool reachable through the configured backends.
    ///
    /// Backends that fail to answer are logged and skipped. The route table is
    /// computed once per executor.
    pub async fn discover(&self) -> Vec<DiscoveredTool> {
        let routes = self.routes().await;
        routes
            .order
            .iter()
            .filter_map(|name| routes.by_name.get(name))
            .map(|route| DiscoveredTool {
                backend: self.backends[route.backend].name.clone(),
                descriptor: route.descriptor.clone(),
            })
            .collect()
    }

    async fn routes(&self) -> &Routes {
        self.routes.get_or_init(|| self.discover_routes()).await
    }

    async fn discover_routes(&self) -> Routes {
        let mut routes = Routes::default();
        for (index, backend) in self.backends.iter().enumerate() {
            let listing = tokio::time::timeout(self.timeout, backend.transport.list_tools()).await;
            let tools = match listing {
                Ok(Ok(tools)) => tools,
                Ok(Err(err)) => {
                    warn!(backend = %backend.name, error = %err, "tool discovery failed");
                    continue;
                }
                Err(_) => {
                    warn!(backend = %backend.name, timeout = ?self.timeout, "tool discovery timed out");
                    continue;
                }
            };
            debug!(backend = %backend.name, kind = backend.transport.kind(), tools = tools.len(), "backend listed tools");
            for descriptor in tools {
                let name = descriptor.name().to_owned();
                let route = Route {
                    backend: index,
                    descriptor: Arc::new(descriptor),
                };
                match routes.by_name.get(&name) {
                    None => {
                        routes.order.push(name.clone());
                        routes.by_name.insert(name, route);
                    }
                    Some(existing) if !self.owns(existing.backend, &name) && self.owns(index, &name) => {
                        debug!(tool = %name, backend = %backend.name, "rerouting tool to its declared owner");
                        routes.by_name.insert(name, route);
                    }
                    Some(existing) => {
                        debug!(
                            tool = %name,
                            kept = %self.backends[existing.backend].name,
                            ignored = %backend.name,
                            "tool advertised by several backends"
                        );
                    }
                }
            }
        }
        info!(tools = routes.order.len(), backends = self.backends.len(), "tool routes discovered");
        routes
    }

    /// Whether the backend at `index` is the declared owner of `tool`.
    fn owns(&self, index: usize, tool: &str) -> bool {
        let backend = &self.backends[index].name;
        let declared = self
            .catalog
            .as_ref()
            .and_then(|catalog| catalog.get(tool))
            .and_then(|descriptor| descriptor.owning_server().map(str::to_owned));
        declared.as_deref() == Some(backend.as_str())
    }

    async fn resolve(&self, tool: &str) -> Option<Route> {
        if let Some(route) = self.routes().await.by_name.get(tool) {
            return Some(route.clone());
        }
        // discovery may have missed a backend that was down; fall back to the
        // catalog's declared owner
        let descriptor = self.catalog.as_ref()?.get(tool)?.clone();
        let owner = descriptor.owning_server()?;
        let backend = self.backends.iter().position(|backend| backend.name == owner)?;
        debug!(tool, backend = owner, "routing by catalog owner");
        Some(Route { backend, descriptor })
    }

    /// Invokes `call` and classifies the result.
    ///
    /// Never fails: every problem is reported as a [`ToolOutcome::Failure`].
    pub async fn invoke(&self, call: &ToolCall) -> ToolOutcome {
        let name = call.tool_name();
        // catalog tools are checked before discovery touches any backend
        let checked = match self.catalog.as_ref().and_then(|catalog| catalog.get(name)) {
            Some(descriptor) => match checked_arguments(descriptor, call) {
                Ok(arguments) => Some(arguments),
                Err(rejected) => return rejected,
            },
            None => None,
        };

        let Some(route) = self.resolve(name).await else {
            debug!(tool = name, "no backend offers tool");
            return ToolOutcome::failure(FailureKind::NotFound, format!("tool `{name}` is not available"));
        };

        let arguments = match checked {
            Some(arguments) => arguments,
            None => match checked_arguments(&route.descriptor, call) {
                Ok(arguments) => arguments,
                Err(rejected) => return rejected,
            },
        };

        let backend = &self.backends[route.backend];
        debug!(tool = name, backend = %backend.name, kind = backend.transport.kind(), "invoking tool");
        let reply = tokio::time::timeout(self.timeout, backend.transport.call(name, arguments)).await;
        match reply {
            Ok(Ok(CallReply::Ok { value })) => ToolOutcome::success(value),
            Ok(Ok(CallReply::Error { error_message })) => {
                ToolOutcome::failure(FailureKind::BackendError, error_message)
            }
            Ok(Err(err)) => classify(name, &backend.name, err),
            Err(_) => {
                warn!(tool = name, backend = %backend.name, timeout = ?self.timeout, "tool call timed out");
                ToolOutcome::failure(
                    FailureKind::BackendUnavailable,
                    format!("backend `{}` did not respond within {:?}", backend.name, self.timeout),
                )
            }
        }
    }

    /// Releases every backend connection. Later calls reconnect lazily.
    pub async fn close(&self) {
        for backend in &self.backends {
            backend.transport.close().await;
        }
        debug!(backends = self.backends.len(), "backend connections closed");
    }
}

/// Normalizes the call's arguments and validates them against `descriptor`.
fn checked_arguments(descriptor: &ToolDescriptor, call: &ToolCall) -> Result<Map<String, Value>, ToolOutcome> {
    let name = call.tool_name();
    let arguments = schema::normalize(descriptor, call.arguments().clone());
    match schema::validate(descriptor, &arguments) {
        Ok(()) => Ok(arguments),
        Err(reason) => {
            debug!(tool = name, %reason, "arguments rejected before dispatch");
            Err(ToolOutcome::failure(
                FailureKind::InvalidArguments,
                format!("invalid arguments for `{name}`: {reason}"),
            ))
        }
    }
}

fn classify(tool: &str, backend: &str, err: TransportError) -> ToolOutcome {
    if err.is_unavailable() {
        warn!(tool, backend, error = %err, "backend unavailable");
        return ToolOutcome::failure(FailureKind::BackendUnavailable, err.to_string());
    }
    match err {
        TransportError::Rpc { error }
            if matches!(error.code, error_codes::TOOL_NOT_FOUND | error_codes::METHOD_NOT_FOUND) =>
        {
            ToolOutcome::failure(FailureKind::NotFound, error.message)
        }
        TransportError::Rpc { error } if error.code == error_codes::INVALID_PARAMS => {
            ToolOutcome::failure(FailureKind::InvalidArguments, error.message)
        }
        TransportError::Rpc { error } => ToolOutcome::failure(FailureKind::BackendError, error.message),
        other => ToolOutcome::failure(FailureKind::BackendError, other.to_string()),
    }
}

impl fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("backends", &self.backends.iter().map(|b| b.name.as_str()).collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("discovered", &self.routes.initialized())
            .finish_non_exhaustive()
    }
}
