use std::path::PathBuf;
use std::sync::Arc;

use agent_adapters::{AdapterResult, Decision, DecisionService};
use agent_config::{BackendConfig, RetrievalMode, RuntimeConfig, TransportKind};
use agent_kernel::{self as kernel, QueryOutcome};
use agent_primitives::{ToolCall, ToolCatalog, ToolDescriptor};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use toolrag::{Runtime, RuntimeError, build_executor, open_index, orchestrator_config};
use uuid::Uuid;

const CATALOG: &str = r#"[
    {"name": "get_current_time", "server": "utility", "description": "returns current time",
     "keywords": ["time", "clock"], "parameters": {}},
    {"name": "calculate", "server": "utility", "description": "evaluate arithmetic",
     "keywords": ["math", "sum"], "parameters": {"expression": "string"}}
]"#;

/// Calls `calculate` with a fixed expression and echoes the result.
struct Arithmetic;

#[async_trait]
impl DecisionService for Arithmetic {
    async fn decide(&self, _query: &str, candidates: &[Arc<ToolDescriptor>]) -> AdapterResult<Decision> {
        if candidates.iter().any(|tool| tool.name() == "calculate") {
            let mut arguments = Map::new();
            arguments.insert("expression".into(), json!("6 * 7"));
            return Ok(Decision::Call(ToolCall::new("calculate", arguments)));
        }
        Ok(Decision::Decline("no calculator".into()))
    }

    async fn compose_answer(&self, _query: &str, _call: &ToolCall, value: &Value) -> AdapterResult<String> {
        Ok(format!("The answer is {}.", value["result"]))
    }
}

fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("toolrag-{name}-{}", Uuid::new_v4()))
}

fn config_with_index(path: PathBuf) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.index.path = path;
    config
}

#[tokio::test]
async fn runtime_answers_with_builtin_backend() {
    let index_path = scratch("index.json");
    let config = config_with_index(index_path.clone());
    let catalog = Arc::new(ToolCatalog::from_json_str(CATALOG).unwrap());

    let runtime = Runtime::with_decision_service(config, catalog, Arc::new(Arithmetic))
        .await
        .unwrap();
    assert_eq!(runtime.index().len(), 2);
    assert!(index_path.exists(), "index is persisted on first open");

    let report = runtime.query("evaluate arithmetic").await.unwrap();
    assert_eq!(
        report.outcome,
        QueryOutcome::Answered {
            answer: "The answer is 42.".into()
        }
    );
    assert!(report.tool_outcome.as_ref().is_some_and(|outcome| outcome.is_success()));

    runtime.shutdown().await;
    let _ = std::fs::remove_file(index_path);
}

#[tokio::test]
async fn query_all_preserves_input_order() {
    let index_path = scratch("batch.json");
    let catalog = Arc::new(ToolCatalog::from_json_str(CATALOG).unwrap());
    let runtime = Runtime::with_decision_service(config_with_index(index_path.clone()), catalog, Arc::new(Arithmetic))
        .await
        .unwrap();

    let queries = ["sum these numbers", "   ", "compute something"];
    let results = runtime.query_all(queries).await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().query, "sum these numbers");
    assert!(matches!(results[1], Err(RuntimeError::Kernel(_))));
    assert_eq!(results[2].as_ref().unwrap().query, "compute something");

    let _ = std::fs::remove_file(index_path);
}

#[tokio::test]
async fn forced_rebuild_rewrites_the_index() {
    let index_path = scratch("force.json");
    let config = config_with_index(index_path.clone());
    let catalog = Arc::new(ToolCatalog::from_json_str(CATALOG).unwrap());

    let first = open_index(&config.index, catalog.clone(), false).await.unwrap();
    assert_eq!(first.len(), 2);
    std::fs::write(&index_path, "not json").unwrap();

    let rebuilt = open_index(&config.index, catalog, true).await.unwrap();
    assert_eq!(rebuilt.len(), 2);
    let stored = std::fs::read_to_string(&index_path).unwrap();
    assert!(serde_json::from_str::<Value>(&stored).is_ok());

    let _ = std::fs::remove_file(index_path);
}

#[tokio::test]
async fn executor_discovers_builtin_tools() {
    let config = RuntimeConfig::default();
    let catalog = Arc::new(ToolCatalog::from_json_str(CATALOG).unwrap());
    let executor = build_executor(&config, catalog).unwrap();

    let mut names: Vec<String> = executor
        .discover()
        .await
        .into_iter()
        .map(|tool| {
            assert_eq!(tool.backend(), "utility");
            tool.descriptor().name().to_owned()
        })
        .collect();
    names.sort();
    assert_eq!(names, ["calculate", "get_current_time"]);
}

#[test]
fn invalid_http_backend_is_rejected_at_build_time() {
    let mut config = RuntimeConfig::default();
    config.backends.push(BackendConfig {
        transport: TransportKind::Http,
        url: Some("not a url".into()),
        ..BackendConfig::in_process("remote")
    });
    let catalog = Arc::new(ToolCatalog::from_json_str("[]").unwrap());
    assert!(build_executor(&config, catalog).is_err());
}

#[test]
fn orchestrator_settings_follow_config() {
    let mut config = RuntimeConfig::default();
    config.retrieval.top_k = 5;
    let settings = orchestrator_config(&config).unwrap();
    assert_eq!(settings.top_k(), 5);
    assert_eq!(settings.retrieval_mode(), kernel::RetrievalMode::Retrieve);

    config.retrieval.mode = RetrievalMode::AllTools;
    let settings = orchestrator_config(&config).unwrap();
    assert_eq!(settings.retrieval_mode(), kernel::RetrievalMode::AllTools);

    config.retrieval.top_k = 0;
    assert!(orchestrator_config(&config).is_err());
}
