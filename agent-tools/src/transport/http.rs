use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use agent_primitives::ToolDescriptor;
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode, Uri};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Transport, TransportError, TransportResult};
use crate::protocol::{CallParams, CallReply, JsonRpcRequest, JsonRpcResponse, ListToolsResult, methods};

/// Default per-request timeout for HTTP backends.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC over HTTP POST, one request per call.
///
/// The pooled client is created on first use and dropped by `close`.
pub struct HttpTransport {
    endpoint: Uri,
    timeout: Duration,
    client: Mutex<Option<Client<HttpConnector, Body>>>,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// Creates a transport posting to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] when the URL does not parse or is
    /// not plain `http`.
    pub fn new(endpoint: &str, timeout: Duration) -> TransportResult<Self> {
        let endpoint: Uri = endpoint
            .parse()
            .map_err(|err| TransportError::connect(format!("invalid backend url `{endpoint}`: {err}")))?;
        if endpoint.scheme_str() != Some("http") {
            return Err(TransportError::connect(format!(
                "unsupported backend url `{endpoint}`: only http:// is supported"
            )));
        }
        Ok(Self {
            endpoint,
            timeout,
            client: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    async fn client(&self) -> Client<HttpConnector, Body> {
        self.client
            .lock()
            .await
            .get_or_insert_with(|| Client::builder().build_http())
            .clone()
    }

    async fn request(&self, method: &str, params: Value) -> TransportResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = serde_json::to_vec(&JsonRpcRequest::new(id, method, params))
            .map_err(|err| TransportError::protocol(err.to_string()))?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header("content-type", "application/json")
            .body(Body::from(body))
            .map_err(|err| TransportError::protocol(err.to_string()))?;

        let client = self.client().await;
        let exchange = async move {
            let response = client
                .request(request)
                .await
                .map_err(|err| TransportError::connect(err.to_string()))?;
            let status = response.status();
            let bytes = hyper::body::to_bytes(response.into_body())
                .await
                .map_err(|err| TransportError::connect(err.to_string()))?;
            Ok::<_, TransportError>((status, bytes))
        };
        let (status, bytes) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout {
                timeout: self.timeout,
            })??;

        if matches!(
            status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ) {
            return Err(TransportError::connect(format!("backend answered {status}")));
        }
        let response: JsonRpcResponse = serde_json::from_slice(&bytes).map_err(|err| {
            TransportError::protocol(format!("status {status}, unparsable body: {err}"))
        })?;
        debug!(endpoint = %self.endpoint, method, %status, "backend replied");

        match (response.result, response.error) {
            (_, Some(error)) => Err(TransportError::Rpc { error }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(TransportError::protocol(
                "response carries neither result nor error",
            )),
        }
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> &'static str {
        "http"
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
        self.client.lock().await.take();
    }
}
