//! Runtime configuration.
//!
//! [`RuntimeConfig`] is read from a TOML file, overlaid with `TOOLRAG_*`
//! environment variables and validated before any component is built.

#![warn(missing_docs, clippy::pedantic)]

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ENV_PREFIX, apply_env, load};
pub use schema::{
    BackendConfig, CatalogConfig, DecisionConfig, DecisionProvider, EmbedderConfig, EmptyCandidates,
    ExecutionConfig, IndexConfig, LoggingConfig, RetrievalConfig, RetrievalMode, RuntimeConfig, TransportKind,
};
