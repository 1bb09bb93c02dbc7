use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use agent_primitives::ToolDescriptor;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Transport, TransportError, TransportResult};
use crate::protocol::{
    CallParams, CallReply, JsonRpcId, JsonRpcRequest, JsonRpcResponse, ListToolsResult, methods,
};

/// Default per-request timeout for subprocess backends.
pub const DEFAULT_STDIO_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// How to launch a subprocess backend.
#[derive(Clone, Debug)]
pub struct StdioConfig {
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl StdioConfig {
    /// Launches `command` with no arguments.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: DEFAULT_STDIO_TIMEOUT,
        }
    }

    /// Appends command-line arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Overrides the per-request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command to execute.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }
}

/// JSON-RPC over newline-delimited stdio of a child process.
///
/// Concurrent calls share one child; responses are matched to callers by id.
/// The child is spawned on first use and respawned if it exits.
pub struct StdioTransport {
    config: Option<StdioConfig>,
    timeout: Duration,
    slot: Mutex<Option<Arc<Connection>>>,
}

impl StdioTransport {
    /// Creates a transport that spawns `config.command` on first use.
    #[must_use]
    pub fn new(config: StdioConfig) -> Self {
        Self {
            timeout: config.timeout,
            config: Some(config),
            slot: Mutex::new(None),
        }
    }

    /// Speaks the protocol over already-connected streams. Once those streams
    /// close the transport stays closed.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn from_streams<R, W>(reader: R, writer: W, timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            config: None,
            timeout,
            slot: Mutex::new(Some(Arc::new(Connection::start(
                reader,
                Box::new(writer),
                None,
            )))),
        }
    }

    async fn connection(&self) -> TransportResult<Arc<Connection>> {
        let mut slot = self.slot.lock().await;
        if let Some(connection) = slot.as_ref().filter(|conn| !conn.is_closed()) {
            return Ok(connection.clone());
        }
        let Some(config) = &self.config else {
            return Err(TransportError::Closed);
        };
        if slot.take().is_some() {
            warn!(command = %config.command, "backend process exited; respawning");
        }
        let connection = Arc::new(Connection::spawn(config)?);
        *slot = Some(connection.clone());
        Ok(connection)
    }

    async fn request(&self, method: &str, params: Value) -> TransportResult<Value> {
        let exchange = async {
            let connection = self.connection().await?;
            connection.request(method, params).await
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout {
                timeout: self.timeout,
            })?
    }
}

impl fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdioTransport")
            .field("command", &self.config.as_ref().map(StdioConfig::command))
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> &'static str {
        "stdio"
    }

    async fn list_tools(&self) -> TransportResult<Vec<ToolDescriptor>> {
        let result = self.request(methods::TOOLS_LIST, json!({})).await?;
        let listing: ListToolsResult = serde_json::from_value(result)
            .map_err(|err| TransportError::protocol(format!("invalid tools/list result: {err}")))?;
        Ok(listing.tools)
    }

    async fn call(&self, name: &str, arguments: Map<String, Value>) -> TransportResult<CallReply> {
        let params = serde_json::to_value(CallParams {
            name: name.to_owned(),
            arguments,
        })
        .map_err(|err| TransportError::protocol(err.to_string()))?;
        let result = self.request(methods::TOOLS_CALL, params).await?;
        serde_json::from_value(result)
            .map_err(|err| TransportError::protocol(format!("invalid tools/call result: {err}")))
    }

    async fn close(&self) {
        if let Some(connection) = self.slot.lock().await.take() {
            connection.shutdown().await;
        }
    }
}

struct Connection {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    child: Mutex<Option<Child>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    fn spawn(config: &StdioConfig) -> TransportResult<Self> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                TransportError::connect(format!("failed to spawn `{}`: {err}", config.command))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::connect("backend stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::connect("backend stdout unavailable"))?;
        let stderr = child.stderr.take();

        let mut connection = Self::start(stdout, Box::new(stdin), Some(child));
        if let Some(stderr) = stderr {
            let command = config.command.clone();
            connection.tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        debug!(backend = %command, "{line}");
                    }
                }
            }));
        }
        debug!(command = %config.command, "spawned stdio backend");
        Ok(connection)
    }

    fn start<R>(reader: R, writer: Box<dyn AsyncWrite + Send + Unpin>, child: Option<Child>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader_task = {
            let pending = pending.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(reader);
                let mut frame = Vec::new();
                loop {
                    frame.clear();
                    match reader.read_until(b'\n', &mut frame).await {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(err) => {
                            warn!(error = %err, "backend output failed");
                            break;
                        }
                    }
                    let line = String::from_utf8_lossy(&frame);
                    if line.trim().is_empty() {
                        continue;
                    }
                    let response: JsonRpcResponse = match serde_json::from_str(line.trim()) {
                        Ok(response) => response,
                        Err(err) => {
                            warn!(error = %err, "discarding unparsable backend output");
                            continue;
                        }
                    };
                    let Some(JsonRpcId::Number(id)) = response.id else {
                        warn!(id = ?response.id, "discarding response with foreign id");
                        continue;
                    };
                    let waiter = pending
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(response);
                        }
                        None => debug!(id, "discarding late response"),
                    }
                }
                closed.store(true, Ordering::SeqCst);
                // dropping the senders wakes every waiter with `Closed`
                pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
            })
        };

        Self {
            writer: Mutex::new(writer),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            child: Mutex::new(child),
            tasks: vec![reader_task],
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn request(&self, method: &str, params: Value) -> TransportResult<Value> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))
            .map_err(|err| TransportError::protocol(err.to_string()))?;

        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };
        let rx = self.register(id)?;

        {
            let mut writer = self.writer.lock().await;
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        let response = rx.await.map_err(|_| TransportError::Closed)?;
        match (response.result, response.error) {
            (_, Some(error)) => Err(TransportError::Rpc { error }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(TransportError::protocol(
                "response carries neither result nor error",
            )),
        }
    }

    /// Adds a waiter for `id`. Fails if the reader closed the connection,
    /// including when it cleared the pending map just before the insert.
    fn register(&self, id: u64) -> TransportResult<oneshot::Receiver<JsonRpcResponse>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        if self.is_closed() {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            return Err(TransportError::Closed);
        }
        Ok(rx)
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.writer.lock().await.shutdown().await;
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(err) = child.kill().await {
                debug!(error = %err, "backend process already gone");
            }
        }
        for task in &self.tasks {
            task.abort();
        }
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Removes an abandoned request from the pending map when its caller goes
/// away (timeout or cancellation); a late response is then discarded.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex};

    #[tokio::test]
    async fn out_of_order_responses_reach_their_callers() {
        let (client, server) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, mut server_write) = tokio::io::split(server);
        let transport = Arc::new(StdioTransport::from_streams(
            client_read,
            client_write,
            Duration::from_secs(5),
        ));

        // answer two requests in reverse order
        let server = tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let mut requests = Vec::new();
            for _ in 0..2 {
                let line = lines.next_line().await.unwrap().unwrap();
                requests.push(serde_json::from_str::<JsonRpcRequest>(&line).unwrap());
            }
            for request in requests.into_iter().rev() {
                let name = request.params.as_ref().unwrap()["name"].clone();
                let response = JsonRpcResponse::success(
                    request.id,
                    json!({"status": "ok", "value": name}),
                );
                let mut line = serde_json::to_vec(&response).unwrap();
                line.push(b'\n');
                server_write.write_all(&line).await.unwrap();
            }
        });

        let a = transport.call("alpha", Map::new());
        let b = transport.call("beta", Map::new());
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap(), CallReply::Ok { value: json!("alpha") });
        assert_eq!(b.unwrap(), CallReply::Ok { value: json!("beta") });
        server.await.unwrap();
    }

    #[tokio::test]
    async fn timed_out_requests_are_forgotten() {
        let (client, server) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let transport = StdioTransport::from_streams(client_read, client_write, Duration::from_millis(50));

        let err = transport.call("slow", Map::new()).await.expect_err("timeout");
        assert!(matches!(err, TransportError::Timeout { .. }));
        assert!(err.is_unavailable());

        let slot = transport.slot.lock().await;
        let connection = slot.as_ref().unwrap();
        assert!(connection.pending.lock().unwrap().is_empty());
        drop(server);
    }

    #[tokio::test]
    async fn rpc_errors_are_surfaced() {
        let (client, server) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, mut server_write) = tokio::io::split(server);
        let transport = StdioTransport::from_streams(client_read, client_write, Duration::from_secs(5));

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let request: JsonRpcRequest = serde_json::from_str(&line).unwrap();
            let response = JsonRpcResponse::error(request.id, -32006, "unknown tool");
            let mut line = serde_json::to_vec(&response).unwrap();
            line.push(b'\n');
            server_write.write_all(&line).await.unwrap();
        });

        let err = transport.call("ghost", Map::new()).await.expect_err("rpc error");
        assert!(matches!(err, TransportError::Rpc { ref error } if error.code == -32006));
        assert!(!err.is_unavailable());
    }

    #[tokio::test]
    async fn closed_stream_reports_closed() {
        let (client, server) = duplex(64);
        let (client_read, client_write) = tokio::io::split(client);
        let transport = StdioTransport::from_streams(client_read, client_write, Duration::from_secs(5));
        drop(server);

        let err = transport.list_tools().await.expect_err("closed");
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn invalid_utf8_output_does_not_close_the_connection() {
        let (client, server) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, mut server_write) = tokio::io::split(server);
        let transport = StdioTransport::from_streams(client_read, client_write, Duration::from_secs(5));

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let request: JsonRpcRequest = serde_json::from_str(&line).unwrap();
            server_write.write_all(b"\xff\xfe warming up\n").await.unwrap();
            let response = JsonRpcResponse::success(request.id, json!({"tools": []}));
            let mut line = serde_json::to_vec(&response).unwrap();
            line.push(b'\n');
            server_write.write_all(&line).await.unwrap();
        });

        let tools = transport.list_tools().await.expect("listing after garbage");
        assert!(tools.is_empty());
    }

    #[tokio::test]
    async fn waiters_registered_after_close_fail_fast() {
        let (client, _server) = duplex(64);
        let (client_read, client_write) = tokio::io::split(client);
        let connection = Connection::start(client_read, Box::new(client_write), None);

        // the reader has cleared the map and marked the connection closed
        connection.closed.store(true, Ordering::SeqCst);
        let err = connection.register(7).expect_err("closed");
        assert!(matches!(err, TransportError::Closed));
        assert!(connection.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_command_is_a_connect_error() {
        let transport = StdioTransport::new(StdioConfig::new("/definitely/not/a/backend"));
        let err = transport.list_tools().await.expect_err("spawn");
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
