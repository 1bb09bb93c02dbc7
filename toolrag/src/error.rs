use agent_adapters::AdapterError;
use agent_config::ConfigError;
use agent_index::IndexError;
use agent_kernel::KernelError;
use agent_tools::{ToolError, TransportError};
use thiserror::Error;

/// Result alias for runtime assembly.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Failures while assembling or running the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The tool catalog could not be loaded.
    #[error(transparent)]
    Catalog(#[from] agent_primitives::Error),
    /// The embedding index could not be opened or built.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Built-in tools could not be registered.
    #[error(transparent)]
    Tools(#[from] ToolError),
    /// A backend transport could not be configured.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A model adapter could not be configured.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    /// Query processing failed.
    #[error(transparent)]
    Kernel(#[from] KernelError),
}
