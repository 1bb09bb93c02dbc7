//! Serde model of the runtime configuration file.
//!
//! Every section and field has a default, so an empty file is a complete
//! configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use agent_telemetry::LogFormat;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Tool catalog location.
    pub catalog: CatalogConfig,
    /// Candidate retrieval.
    pub retrieval: RetrievalConfig,
    /// Embedding index and embedder.
    pub index: IndexConfig,
    /// Decision service.
    pub decision: DecisionConfig,
    /// Tool execution limits.
    pub execution: ExecutionConfig,
    /// Tool backends, in routing priority order.
    pub backends: Vec<BackendConfig>,
    /// Log output.
    pub logging: LoggingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            retrieval: RetrievalConfig::default(),
            index: IndexConfig::default(),
            decision: DecisionConfig::default(),
            execution: ExecutionConfig::default(),
            backends: vec![BackendConfig::in_process("utility")],
            logging: LoggingConfig::default(),
        }
    }
}

/// Where the tool catalog lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    /// JSON catalog file.
    pub path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config/tools.json"),
        }
    }
}

/// Candidate retrieval settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Whether candidates are ranked or the whole catalog is offered.
    pub mode: RetrievalMode,
    /// Candidates handed to the decision service.
    pub top_k: usize,
    /// Minimum cosine similarity for a candidate.
    pub score_threshold: f32,
    /// Behavior when nothing clears the threshold.
    pub empty_candidates: EmptyCandidates,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::Retrieve,
            top_k: 3,
            score_threshold: 0.0,
            empty_candidates: EmptyCandidates::Decline,
        }
    }
}

/// How candidates reach the decision service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Rank the catalog and keep the top candidates.
    #[default]
    Retrieve,
    /// Offer every catalog tool without ranking.
    AllTools,
}

impl FromStr for RetrievalMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "retrieve" => Ok(Self::Retrieve),
            "all_tools" => Ok(Self::AllTools),
            _ => Err("expected `retrieve` or `all_tools`".to_owned()),
        }
    }
}

/// Behavior when retrieval returns no candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyCandidates {
    /// Decline without consulting the decision service.
    #[default]
    Decline,
    /// Consult the decision service with an empty tool list.
    Consult,
}

impl FromStr for EmptyCandidates {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "decline" => Ok(Self::Decline),
            "consult" => Ok(Self::Consult),
            _ => Err("expected `decline` or `consult`".to_owned()),
        }
    }
}

/// Embedding index settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// Persisted embedding file.
    pub path: PathBuf,
    /// Embedder used for tools and queries.
    pub embedder: EmbedderConfig,
    /// Timeout for a single remote embedding request.
    pub embed_timeout_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/tool_index.json"),
            embedder: EmbedderConfig::default(),
            embed_timeout_ms: 30_000,
        }
    }
}

impl IndexConfig {
    /// Embedding request timeout.
    #[must_use]
    pub const fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }
}

/// Embedding model selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbedderConfig {
    /// Local deterministic feature-hashing embedder.
    Hashing {
        /// Vector width.
        #[serde(default = "default_dimensions")]
        dimensions: usize,
    },
    /// Embeddings served by an Ollama daemon.
    Ollama {
        /// Embedding model, for example `nomic-embed-text`.
        model: String,
        /// Daemon address; the adapter default when absent.
        #[serde(default)]
        base_url: Option<String>,
    },
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self::Hashing {
            dimensions: default_dimensions(),
        }
    }
}

const fn default_dimensions() -> usize {
    384
}

/// Chat model provider backing the decision service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionProvider {
    /// OpenAI chat completions.
    #[default]
    OpenAi,
    /// Local Ollama daemon.
    Ollama,
}

impl fmt::Display for DecisionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        })
    }
}

impl FromStr for DecisionProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            _ => Err("expected `openai` or `ollama`".to_owned()),
        }
    }
}

/// Decision service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecisionConfig {
    /// Model provider.
    pub provider: DecisionProvider,
    /// Model identifier.
    pub model: String,
    /// Provider endpoint override.
    pub base_url: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-attempt timeout.
    pub timeout_ms: u64,
    /// Attempts before the query fails.
    pub max_attempts: u32,
    /// Initial delay between attempts.
    pub backoff_ms: u64,
    /// Replaces the built-in system prompt.
    pub system_prompt: Option<String>,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            provider: DecisionProvider::OpenAi,
            model: "gpt-4o-mini".to_owned(),
            base_url: None,
            temperature: 0.0,
            timeout_ms: 60_000,
            max_attempts: 2,
            backoff_ms: 250,
            system_prompt: None,
        }
    }
}

impl DecisionConfig {
    /// Per-attempt timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Initial retry delay.
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Tool execution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Default per-call backend timeout.
    pub timeout_ms: u64,
    /// Delay before retrying an unavailable backend.
    pub retry_backoff_ms: u64,
    /// Queries processed concurrently by batch commands.
    pub max_concurrent_queries: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retry_backoff_ms: 250,
            max_concurrent_queries: 8,
        }
    }
}

impl ExecutionConfig {
    /// Default per-call backend timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retrying an unavailable backend.
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// How a backend is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Built-in tools served inside the process.
    #[default]
    InProcess,
    /// Child process speaking JSON lines over stdio.
    Stdio,
    /// JSON-RPC over HTTP.
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InProcess => "in_process",
            Self::Stdio => "stdio",
            Self::Http => "http",
        })
    }
}

/// One tool backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Backend name, matched against `owning_server` in the catalog.
    pub name: String,
    /// Transport kind.
    #[serde(default)]
    pub transport: TransportKind,
    /// Program to spawn (`stdio`).
    #[serde(default)]
    pub command: Option<String>,
    /// Program arguments (`stdio`).
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the child (`stdio`).
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Endpoint (`http`).
    #[serde(default)]
    pub url: Option<String>,
    /// Overrides the execution timeout for this backend.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl BackendConfig {
    /// Built-in utility backend.
    #[must_use]
    pub fn in_process(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::InProcess,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            url: None,
            timeout_ms: None,
        }
    }

    /// Per-call timeout for this backend, falling back to `default`.
    #[must_use]
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout_ms.map_or(default, Duration::from_millis)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("backend name must not be empty"));
        }
        match self.transport {
            TransportKind::Stdio if self.command.as_deref().is_none_or(|cmd| cmd.trim().is_empty()) => {
                Err(ConfigError::invalid(format!(
                    "backend `{}` uses stdio but has no command",
                    self.name
                )))
            }
            TransportKind::Http if self.url.as_deref().is_none_or(|url| url.trim().is_empty()) => {
                Err(ConfigError::invalid(format!(
                    "backend `{}` uses http but has no url",
                    self.name
                )))
            }
            _ if self.timeout_ms == Some(0) => Err(ConfigError::invalid(format!(
                "backend `{}` timeout must be positive",
                self.name
            ))),
            _ => Ok(()),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub directive: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            directive: agent_telemetry::DEFAULT_DIRECTIVE.to_owned(),
        }
    }
}

impl RuntimeConfig {
    /// Checks ranges and cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::invalid("retrieval.top_k must be at least 1"));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.score_threshold) {
            return Err(ConfigError::invalid(format!(
                "retrieval.score_threshold {} is outside [-1, 1]",
                self.retrieval.score_threshold
            )));
        }
        if let EmbedderConfig::Hashing { dimensions: 0 } = self.index.embedder {
            return Err(ConfigError::invalid("index.embedder.dimensions must be positive"));
        }
        if let EmbedderConfig::Ollama { model, .. } = &self.index.embedder
            && model.trim().is_empty()
        {
            return Err(ConfigError::invalid("index.embedder.model must not be empty"));
        }
        if self.decision.model.trim().is_empty() {
            return Err(ConfigError::invalid("decision.model must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.decision.temperature) {
            return Err(ConfigError::invalid("decision.temperature must be within [0, 2]"));
        }
        if self.decision.max_attempts == 0 {
            return Err(ConfigError::invalid("decision.max_attempts must be at least 1"));
        }
        if self.decision.timeout_ms == 0 || self.execution.timeout_ms == 0 || self.index.embed_timeout_ms == 0 {
            return Err(ConfigError::invalid("timeouts must be positive"));
        }
        if self.execution.max_concurrent_queries == 0 {
            return Err(ConfigError::invalid("execution.max_concurrent_queries must be at least 1"));
        }
        if self.backends.is_empty() {
            return Err(ConfigError::invalid("at least one backend is required"));
        }
        let mut seen = std::collections::HashSet::new();
        for backend in &self.backends {
            backend.validate()?;
            if !seen.insert(backend.name.as_str()) {
                return Err(ConfigError::invalid(format!("duplicate backend `{}`", backend.name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: RuntimeConfig = toml::from_str("").unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        assert!(config.retrieval.score_threshold.abs() < f32::EPSILON);
        assert_eq!(config.decision.model, "gpt-4o-mini");
        assert_eq!(config.backends, vec![BackendConfig::in_process("utility")]);
        assert_eq!(config.index.embedder, EmbedderConfig::Hashing { dimensions: 384 });
        config.validate().unwrap();
    }

    #[test]
    fn parses_tagged_embedder_and_backends() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            [index.embedder]
            kind = "ollama"
            model = "nomic-embed-text"

            [[backends]]
            name = "grades"
            transport = "stdio"
            command = "grade-server"
            args = ["--quiet"]
            timeout_ms = 5000

            [[backends]]
            name = "weather"
            transport = "http"
            url = "http://127.0.0.1:8700/rpc"
            "#,
        )
        .unwrap();

        assert!(matches!(config.index.embedder, EmbedderConfig::Ollama { ref model, base_url: None } if model == "nomic-embed-text"));
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].transport, TransportKind::Stdio);
        assert_eq!(
            config.backends[0].timeout_or(Duration::from_secs(30)),
            Duration::from_secs(5)
        );
        assert_eq!(
            config.backends[1].timeout_or(Duration::from_secs(30)),
            Duration::from_secs(30)
        );
        config.validate().unwrap();
    }

    #[test]
    fn retrieval_mode_is_read_from_toml() {
        let config = RuntimeConfig::from_toml_str("[retrieval]\nmode = \"all_tools\"\n").unwrap();
        assert_eq!(config.retrieval.mode, RetrievalMode::AllTools);
        assert_eq!(RuntimeConfig::default().retrieval.mode, RetrievalMode::Retrieve);
        assert!(RuntimeConfig::from_toml_str("[retrieval]\nmode = \"guess\"\n").is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<RuntimeConfig>("[retrieval]\ntopk = 3\n").is_err());
    }

    #[test]
    fn validation_catches_inconsistent_backends() {
        let mut config = RuntimeConfig::default();
        config.backends.push(BackendConfig {
            transport: TransportKind::Http,
            ..BackendConfig::in_process("remote")
        });
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = RuntimeConfig::default();
        config.backends.push(BackendConfig::in_process("utility"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate backend"));
    }

    #[test]
    fn validation_checks_ranges() {
        let mut config = RuntimeConfig::default();
        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());

        let mut config = RuntimeConfig::default();
        config.retrieval.score_threshold = 1.2;
        assert!(config.validate().is_err());

        let mut config = RuntimeConfig::default();
        config.decision.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
