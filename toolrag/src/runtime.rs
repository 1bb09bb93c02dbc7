//! Assembly of the runtime from configuration.

use std::fmt;
use std::num::{NonZeroU32, NonZeroUsize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use agent_adapters::{
    DecisionService, ModelAdapter, ModelDecisionService, OllamaAdapter, OllamaConfig, OllamaEmbedder, OpenAiAdapter,
    OpenAiConfig,
};
use agent_config::{
    BackendConfig, DecisionConfig, DecisionProvider, EmbedderConfig, EmptyCandidates, IndexConfig, RetrievalMode,
    RuntimeConfig, TransportKind,
};
use agent_index::{Embedder, EmbeddingIndex, FileIndexStore, HashingEmbedder, IndexStore, ToolRetriever};
use agent_kernel::{
    self as kernel, EmptyCandidatePolicy, KernelResult, Orchestrator, OrchestratorConfig, QueryReport, QueryScheduler,
    RetryPolicy, SchedulerConfig, SchedulerError,
};
use agent_primitives::ToolCatalog;
use agent_tools::{
    HttpTransport, InProcessTransport, StdioConfig, StdioTransport, ToolExecutor, ToolRegistry, Transport,
    register_builtin_tools,
};
use tracing::{debug, info};

use crate::error::{RuntimeError, RuntimeResult};

/// A fully wired runtime: catalog, index, executor, decision service and
/// orchestrator.
pub struct Runtime {
    config: RuntimeConfig,
    catalog: Arc<ToolCatalog>,
    index: Arc<EmbeddingIndex>,
    executor: Arc<ToolExecutor>,
    orchestrator: Arc<Orchestrator>,
    scheduler: QueryScheduler,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("tools", &self.catalog.len())
            .field("indexed", &self.index.len())
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Loads configuration from `path` (defaults when `None`) and builds the
    /// runtime.
    ///
    /// # Errors
    ///
    /// See [`agent_config::load`] and [`Runtime::from_config`].
    pub async fn load(path: Option<&Path>) -> RuntimeResult<Self> {
        Self::from_config(agent_config::load(path)?).await
    }

    /// Builds every component described by `config`.
    ///
    /// The embedding index is loaded from disk and rebuilt when it is missing
    /// or stale.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when the catalog, index, backends or decision
    /// service cannot be set up.
    pub async fn from_config(config: RuntimeConfig) -> RuntimeResult<Self> {
        let catalog = Arc::new(ToolCatalog::from_path(&config.catalog.path)?);
        let decision = build_decision_service(&config.decision)?;
        Self::with_decision_service(config, catalog, decision).await
    }

    /// Builds the runtime around an explicit catalog and decision service.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when the index or backends cannot be set up.
    pub async fn with_decision_service(
        config: RuntimeConfig,
        catalog: Arc<ToolCatalog>,
        decision: Arc<dyn DecisionService>,
    ) -> RuntimeResult<Self> {
        let index = Arc::new(open_index(&config.index, catalog.clone(), false).await?);
        let executor = Arc::new(build_executor(&config, catalog.clone())?);
        let orchestrator = Arc::new(Orchestrator::new(
            ToolRetriever::new(index.clone()),
            decision,
            executor.clone(),
            orchestrator_config(&config)?,
        ));
        let concurrency =
            NonZeroUsize::new(config.execution.max_concurrent_queries).unwrap_or(NonZeroUsize::MIN);
        info!(
            tools = catalog.len(),
            indexed = index.len(),
            backends = config.backends.len(),
            "runtime ready"
        );
        Ok(Self {
            config,
            catalog,
            index,
            executor,
            orchestrator,
            scheduler: QueryScheduler::new(SchedulerConfig::new(concurrency)),
        })
    }

    /// Runs one query to a terminal state.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::handle`].
    pub async fn query(&self, text: &str) -> KernelResult<QueryReport> {
        self.orchestrator.handle(text).await
    }

    /// Runs several queries concurrently, bounded by
    /// `execution.max_concurrent_queries`. Results keep input order.
    pub async fn query_all<I, S>(&self, queries: I) -> Vec<RuntimeResult<QueryReport>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut handles = Vec::new();
        for query in queries {
            let query = query.into();
            let orchestrator = self.orchestrator.clone();
            handles.push(
                self.scheduler
                    .spawn(async move { orchestrator.handle(&query).await }),
            );
        }

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            let report = match handle {
                Ok(handle) => match handle.await {
                    Ok(Ok(report)) => report.map_err(RuntimeError::from),
                    Ok(Err(err)) => Err(RuntimeError::Kernel(err.into())),
                    Err(join) => Err(RuntimeError::Kernel(
                        SchedulerError::Aborted(join.to_string()).into(),
                    )),
                },
                Err(err) => Err(RuntimeError::Kernel(err.into())),
            };
            reports.push(report);
        }
        reports
    }

    /// Loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Tool catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    /// Embedding index.
    #[must_use]
    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    /// Tool executor.
    #[must_use]
    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    /// Query orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Stops accepting queries and closes backend connections.
    pub async fn shutdown(&self) {
        self.scheduler.close();
        self.executor.close().await;
        debug!("runtime shut down");
    }
}

/// Creates the embedder selected by `config`.
///
/// # Errors
///
/// Returns [`RuntimeError`] for zero dimensions or an invalid Ollama address.
pub fn build_embedder(config: &IndexConfig) -> RuntimeResult<Arc<dyn Embedder>> {
    match &config.embedder {
        EmbedderConfig::Hashing { dimensions } => Ok(Arc::new(HashingEmbedder::new(*dimensions)?)),
        EmbedderConfig::Ollama { model, base_url } => {
            let mut ollama = OllamaConfig::new(model.clone()).with_timeout(config.embed_timeout());
            if let Some(base_url) = base_url {
                ollama = ollama.with_base_url(base_url)?;
            }
            Ok(Arc::new(OllamaEmbedder::new(&ollama)?))
        }
    }
}

/// Opens the persisted index for `catalog`, rebuilding it when stale.
/// `force` discards any persisted records first.
///
/// # Errors
///
/// Returns [`RuntimeError::Index`] on store or embedding failures.
pub async fn open_index(
    config: &IndexConfig,
    catalog: Arc<ToolCatalog>,
    force: bool,
) -> RuntimeResult<EmbeddingIndex> {
    let embedder = build_embedder(config)?;
    let store = Arc::new(FileIndexStore::new(&config.path));
    if force {
        store.clear().await?;
        let index = EmbeddingIndex::init(catalog, embedder, store.clone())
            .await?
            .with_embed_timeout(config.embed_timeout());
        let written = index.build().await?;
        info!(records = written, path = %config.path.display(), "embedding index rebuilt");
        return Ok(index);
    }
    Ok(EmbeddingIndex::open_or_rebuild(catalog, embedder, store, config.embed_timeout()).await?)
}

/// Creates an executor with one transport per configured backend.
///
/// # Errors
///
/// Returns [`RuntimeError`] when built-in tools cannot be registered or an
/// HTTP endpoint is invalid.
pub fn build_executor(config: &RuntimeConfig, catalog: Arc<ToolCatalog>) -> RuntimeResult<ToolExecutor> {
    let timeout = config.execution.timeout();
    let mut executor = ToolExecutor::new().with_catalog(catalog).with_timeout(timeout);
    for backend in &config.backends {
        let transport = build_transport(backend, timeout)?;
        debug!(backend = %backend.name, transport = %backend.transport, "backend configured");
        executor = executor.with_backend(backend.name.clone(), transport);
    }
    Ok(executor)
}

fn build_transport(backend: &BackendConfig, default_timeout: Duration) -> RuntimeResult<Arc<dyn Transport>> {
    let timeout = backend.timeout_or(default_timeout);
    match backend.transport {
        TransportKind::InProcess => {
            let registry = ToolRegistry::new();
            register_builtin_tools(&registry)?;
            Ok(Arc::new(InProcessTransport::new(Arc::new(registry))))
        }
        TransportKind::Stdio => {
            let command = backend.command.as_deref().unwrap_or_default();
            let mut stdio = StdioConfig::new(command).args(backend.args.iter().cloned()).timeout(timeout);
            for (key, value) in &backend.env {
                stdio = stdio.env(key.clone(), value.clone());
            }
            Ok(Arc::new(StdioTransport::new(stdio)))
        }
        TransportKind::Http => {
            let url = backend.url.as_deref().unwrap_or_default();
            Ok(Arc::new(HttpTransport::new(url, timeout)?))
        }
    }
}

/// Creates the model-backed decision service selected by `config`.
///
/// # Errors
///
/// Returns [`RuntimeError::Adapter`] when the provider cannot be configured,
/// for example when `OPENAI_API_KEY` is unset.
pub fn build_decision_service(config: &DecisionConfig) -> RuntimeResult<Arc<dyn DecisionService>> {
    let adapter: Arc<dyn ModelAdapter> = match config.provider {
        DecisionProvider::OpenAi => {
            let mut openai = OpenAiConfig::from_env(config.model.clone()).with_timeout(config.timeout());
            if let Some(base_url) = &config.base_url {
                openai = openai.with_base_url(base_url)?;
            }
            Arc::new(OpenAiAdapter::new(openai)?)
        }
        DecisionProvider::Ollama => {
            let mut ollama = OllamaConfig::new(config.model.clone()).with_timeout(config.timeout());
            if let Some(base_url) = &config.base_url {
                ollama = ollama.with_base_url(base_url)?;
            }
            Arc::new(OllamaAdapter::new(ollama)?)
        }
    };
    let mut service = ModelDecisionService::new(adapter).with_temperature(config.temperature);
    if let Some(prompt) = &config.system_prompt {
        service = service.with_system_prompt(prompt.clone());
    }
    Ok(Arc::new(service))
}

/// Maps configuration onto orchestrator settings.
///
/// # Errors
///
/// Returns [`RuntimeError::Kernel`] for out-of-range retrieval settings.
pub fn orchestrator_config(config: &RuntimeConfig) -> RuntimeResult<OrchestratorConfig> {
    let attempts = NonZeroU32::new(config.decision.max_attempts).unwrap_or(NonZeroU32::MIN);
    let backend_attempts = NonZeroU32::MIN.saturating_add(1);
    let empty_candidates = match config.retrieval.empty_candidates {
        EmptyCandidates::Decline => EmptyCandidatePolicy::Decline,
        EmptyCandidates::Consult => EmptyCandidatePolicy::Consult,
    };
    let mode = match config.retrieval.mode {
        RetrievalMode::Retrieve => kernel::RetrievalMode::Retrieve,
        RetrievalMode::AllTools => kernel::RetrievalMode::AllTools,
    };
    Ok(OrchestratorConfig::default()
        .with_retrieval_mode(mode)
        .with_top_k(config.retrieval.top_k)?
        .with_score_threshold(config.retrieval.score_threshold)?
        .with_empty_candidates(empty_candidates)
        .with_decision_timeout(config.decision.timeout())
        .with_decision_retry(RetryPolicy::new(attempts, config.decision.backoff()))
        .with_backend_retry(RetryPolicy::new(backend_attempts, config.execution.retry_backoff())))
}
