//! Serving a [`ToolRegistry`] as a JSON-RPC tool backend over stdio or HTTP.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::protocol::{
    CallParams, CallReply, JSONRPC_VERSION, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    error_codes, methods,
};
use crate::registry::{ToolError, ToolRegistry};

/// Runs one tool and classifies the result for the wire.
///
/// Domain failures become [`CallReply::Error`]; protocol-level problems
/// (unknown tool, schema violation) become JSON-RPC errors.
///
/// # Errors
///
/// Returns the JSON-RPC error object to send back to the caller.
pub async fn call_tool(
    registry: &ToolRegistry,
    name: &str,
    arguments: Map<String, Value>,
) -> Result<CallReply, JsonRpcError> {
    let rpc_error = |code, message: String| JsonRpcError {
        code,
        message,
        data: None,
    };
    match registry.invoke(name, arguments).await {
        Ok(value) => Ok(CallReply::Ok { value }),
        Err(ToolError::Execution { reason }) => {
            debug!(tool = name, %reason, "tool reported an error");
            Ok(CallReply::Error {
                error_message: reason,
            })
        }
        Err(err @ ToolError::UnknownTool { .. }) => {
            Err(rpc_error(error_codes::TOOL_NOT_FOUND, err.to_string()))
        }
        Err(err @ ToolError::InvalidArguments { .. }) => {
            Err(rpc_error(error_codes::INVALID_PARAMS, err.to_string()))
        }
        Err(err @ ToolError::DuplicateTool { .. }) => {
            Err(rpc_error(error_codes::INTERNAL_ERROR, err.to_string()))
        }
    }
}

/// Dispatches one request. Returns `None` for notifications.
pub async fn handle_request(registry: &ToolRegistry, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
    let id = request.id.clone();
    let response = if request.jsonrpc == JSONRPC_VERSION {
        dispatch(registry, request).await
    } else {
        JsonRpcResponse::error(
            id.clone(),
            error_codes::INVALID_REQUEST,
            format!("unsupported jsonrpc version `{}`", request.jsonrpc),
        )
    };
    id.is_some().then_some(response)
}

async fn dispatch(registry: &ToolRegistry, request: JsonRpcRequest) -> JsonRpcResponse {
    let JsonRpcRequest {
        id, method, params, ..
    } = request;
    match method.as_str() {
        methods::TOOLS_LIST => JsonRpcResponse::success(id, json!({ "tools": registry.list() })),
        methods::TOOLS_CALL => {
            let params: CallParams = match serde_json::from_value(params.unwrap_or(Value::Null)) {
                Ok(params) => params,
                Err(err) => {
                    return JsonRpcResponse::error(
                        id,
                        error_codes::INVALID_PARAMS,
                        format!("invalid tools/call params: {err}"),
                    );
                }
            };
            match call_tool(registry, &params.name, params.arguments).await {
                Ok(reply) => match serde_json::to_value(reply) {
                    Ok(result) => JsonRpcResponse::success(id, result),
                    Err(err) => JsonRpcResponse::error(id, error_codes::INTERNAL_ERROR, err.to_string()),
                },
                Err(error) => JsonRpcResponse {
                    jsonrpc: JSONRPC_VERSION.to_owned(),
                    id,
                    result: None,
                    error: Some(error),
                },
            }
        }
        other => JsonRpcResponse::error(
            id,
            error_codes::METHOD_NOT_FOUND,
            format!("method `{other}` not found"),
        ),
    }
}

/// Parses and dispatches one raw message, returning the serialized reply.
pub async fn handle_message(registry: &ToolRegistry, message: &str) -> Option<String> {
    let response = match serde_json::from_str::<JsonRpcRequest>(message) {
        Ok(request) => handle_request(registry, request).await?,
        Err(err) => {
            warn!(error = %err, "unparsable request");
            JsonRpcResponse::error(None, error_codes::PARSE_ERROR, format!("parse error: {err}"))
        }
    };
    match serde_json::to_string(&response) {
        Ok(line) => Some(line),
        Err(err) => {
            warn!(error = %err, "failed to encode response");
            None
        }
    }
}

/// Serves newline-delimited JSON-RPC until `reader` reaches end of input.
///
/// Requests are handled concurrently, so responses may be written out of
/// order; callers match them by id.
///
/// # Errors
///
/// Propagates read and write failures on the streams.
pub async fn serve_stdio<R, W>(registry: Arc<ToolRegistry>, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    info!(tools = registry.len(), "serving tools on stdio");
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let registry = registry.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(reply) = handle_message(&registry, &line).await {
                let _ = tx.send(reply);
            }
        });
    }
    drop(tx);
    debug!("stdin closed; draining responses");
    writer_task.await.map_err(std::io::Error::other)?
}

/// Binds an HTTP JSON-RPC endpoint and serves it on a background task until
/// `shutdown` resolves. Any path accepts `POST`.
///
/// # Errors
///
/// Returns the bind error when `addr` is unavailable.
pub fn serve_http<F>(
    registry: Arc<ToolRegistry>,
    addr: SocketAddr,
    shutdown: F,
) -> hyper::Result<(SocketAddr, JoinHandle<hyper::Result<()>>)>
where
    F: Future<Output = ()> + Send + 'static,
{
    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |request| {
                handle_http(registry.clone(), request)
            }))
        }
    });
    let server = Server::try_bind(&addr)?.serve(make_svc);
    let local_addr = server.local_addr();
    info!(%local_addr, "serving tools over http");
    let handle = tokio::spawn(server.with_graceful_shutdown(shutdown));
    Ok((local_addr, handle))
}

async fn handle_http(
    registry: Arc<ToolRegistry>,
    request: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if request.method() != Method::POST {
        return Ok(plain(StatusCode::METHOD_NOT_ALLOWED, "POST a JSON-RPC request"));
    }
    let bytes = match hyper::body::to_bytes(request.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => return Ok(plain(StatusCode::BAD_REQUEST, &err.to_string())),
    };
    let message = String::from_utf8_lossy(&bytes);
    let response = match handle_message(&registry, &message).await {
        Some(body) => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/json")
            .body(Body::from(body)),
        None => Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty()),
    };
    Ok(response.unwrap_or_else(|_| plain(StatusCode::INTERNAL_SERVER_ERROR, "response build failed")))
}

fn plain(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(message.to_owned()));
    *response.status_mut() = status;
    response
}
