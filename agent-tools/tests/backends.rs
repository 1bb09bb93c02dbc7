use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agent_primitives::ToolCall;
use agent_tools::backend::serve_http;
use agent_tools::protocol::CallReply;
use agent_tools::{
    FailureKind, HttpTransport, StdioConfig, StdioTransport, ToolExecutor, ToolOutcome,
    ToolRegistry, Transport, register_builtin_tools,
};
use serde_json::{Map, Value, json};
use tokio::sync::oneshot;

fn expression(text: &str) -> Map<String, Value> {
    let mut arguments = Map::new();
    arguments.insert("expression".into(), json!(text));
    arguments
}

fn backend_process() -> StdioTransport {
    StdioTransport::new(
        StdioConfig::new(env!("CARGO_BIN_EXE_tool-backend"))
            .args(["--log", "error"])
            .timeout(Duration::from_secs(10)),
    )
}

#[tokio::test]
async fn subprocess_backend_lists_and_calls() {
    let transport = backend_process();
    let tools = transport.list_tools().await.expect("list");
    let names: Vec<_> = tools.iter().map(|tool| tool.name().to_owned()).collect();
    assert_eq!(names, ["get_current_time", "calculate"]);

    let reply = transport.call("calculate", expression("2 ^ 10")).await.expect("call");
    assert_eq!(
        reply,
        CallReply::Ok {
            value: json!({"expression": "2 ^ 10", "result": 1024})
        }
    );

    let reply = transport.call("calculate", expression("7 / 0")).await.expect("call");
    assert_eq!(
        reply,
        CallReply::Error {
            error_message: "division by zero".into()
        }
    );
    transport.close().await;
}

#[tokio::test]
async fn subprocess_backend_handles_concurrent_calls() {
    let transport = Arc::new(backend_process());
    let calls = (1..=8).map(|n| {
        let transport = transport.clone();
        async move {
            let reply = transport
                .call("calculate", expression(&format!("{n} * 100")))
                .await
                .expect("call");
            (n, reply)
        }
    });
    for (n, reply) in futures::future::join_all(calls).await {
        let CallReply::Ok { value } = reply else {
            panic!("call {n} failed: {reply:?}");
        };
        assert_eq!(value["result"], json!(n * 100));
    }
    transport.close().await;
}

#[tokio::test]
async fn subprocess_backend_reconnects_after_close() {
    let transport = backend_process();
    assert_eq!(transport.list_tools().await.expect("list").len(), 2);
    transport.close().await;
    assert_eq!(transport.list_tools().await.expect("relist").len(), 2);
    transport.close().await;
}

#[tokio::test]
async fn http_backend_serves_the_executor() {
    let registry = ToolRegistry::new();
    register_builtin_tools(&registry).expect("builtins");
    let (stop, stopped) = oneshot::channel::<()>();
    let addr: SocketAddr = "127.0.0.1:0".parse().expect("addr");
    let (bound, server) = serve_http(Arc::new(registry), addr, async {
        let _ = stopped.await;
    })
    .expect("bind");

    let transport = HttpTransport::new(&format!("http://{bound}/rpc"), Duration::from_secs(5)).expect("url");
    let executor = ToolExecutor::new().with_backend("utility", Arc::new(transport));

    let tools = executor.discover().await;
    assert_eq!(tools.len(), 2);

    let outcome = executor.invoke(&ToolCall::new("calculate", expression("(1 + 2) * 3"))).await;
    assert_eq!(
        outcome,
        ToolOutcome::success(json!({"expression": "(1 + 2) * 3", "result": 9}))
    );

    let outcome = executor.invoke(&ToolCall::without_arguments("calculate")).await;
    assert_eq!(outcome.failure_kind(), Some(FailureKind::InvalidArguments));

    let outcome = executor.invoke(&ToolCall::without_arguments("drop_tables")).await;
    assert_eq!(outcome.failure_kind(), Some(FailureKind::NotFound));

    executor.close().await;
    let _ = stop.send(());
    server.await.expect("join").expect("server");
}

#[tokio::test]
async fn stopped_http_backend_is_unavailable() {
    let registry = ToolRegistry::new();
    register_builtin_tools(&registry).expect("builtins");
    let (stop, stopped) = oneshot::channel::<()>();
    let addr: SocketAddr = "127.0.0.1:0".parse().expect("addr");
    let (bound, server) = serve_http(Arc::new(registry), addr, async {
        let _ = stopped.await;
    })
    .expect("bind");

    let transport = HttpTransport::new(&format!("http://{bound}/"), Duration::from_secs(2)).expect("url");
    let executor = ToolExecutor::new().with_backend("utility", Arc::new(transport));
    assert_eq!(executor.discover().await.len(), 2);
    executor.close().await;

    let _ = stop.send(());
    server.await.expect("join").expect("server");

    let outcome = executor.invoke(&ToolCall::new("calculate", expression("1 + 1"))).await;
    assert_eq!(outcome.failure_kind(), Some(FailureKind::BackendUnavailable));
}
