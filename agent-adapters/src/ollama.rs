//! `Ollama` chat adapter.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use hyper::Uri;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http_client::{HyperClient, build_https_client, endpoint, post_json, sanitize_base_url};
use crate::traits::{AdapterError, AdapterMetadata, AdapterResult, InferenceRequest, ModelAdapter};

/// Default address of a local Ollama daemon.
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434/";

/// Configuration for the `Ollama` adapter.
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    base_url: String,
    model: String,
    default_temperature: Option<f32>,
    timeout: Duration,
}

impl OllamaConfig {
    /// Creates a configuration for the supplied model using default settings.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_BASE_URL.to_owned(),
            model: model.into(),
            default_temperature: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Overrides the base URL of the Ollama daemon.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the supplied URL is invalid.
    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> AdapterResult<Self> {
        self.base_url = sanitize_base_url("Ollama", base_url.as_ref())?;
        Ok(self)
    }

    /// Sets the default sampling temperature used when the request does not
    /// provide one explicitly.
    #[must_use]
    pub fn with_default_temperature(mut self, temperature: f32) -> Self {
        self.default_temperature = Some(temperature);
        self
    }

    /// Sets the HTTP timeout for requests to the Ollama daemon.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Normalised base URL, always ending in `/`.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Model identifier.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// HTTP timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// `Ollama` adapter that calls the daemon's `/api/chat` endpoint.
pub struct OllamaAdapter {
    client: HyperClient,
    endpoint: Uri,
    metadata: AdapterMetadata,
    timeout: Duration,
    default_temperature: Option<f32>,
}

impl fmt::Debug for OllamaAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OllamaAdapter")
            .field("model", &self.metadata.model())
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl OllamaAdapter {
    /// Constructs a new adapter from the supplied configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the endpoint is invalid.
    pub fn new(config: OllamaConfig) -> AdapterResult<Self> {
        Ok(Self {
            client: build_https_client(),
            endpoint: endpoint("Ollama", &config.base_url, "api/chat")?,
            metadata: AdapterMetadata::new("ollama", config.model),
            timeout: config.timeout,
            default_temperature: config.default_temperature,
        })
    }

    fn build_request(&self, request: &InferenceRequest) -> ChatRequest {
        let messages = request
            .flattened()
            .map(|(role, content)| ChatMessage {
                role: role.to_string(),
                content: content.to_owned(),
            })
            .collect();

        let temperature = request.temperature().or(self.default_temperature);
        let options = (temperature.is_some() || request.max_output_tokens().is_some()).then(|| {
            ChatOptions {
                temperature,
                max_output_tokens: request.max_output_tokens(),
            }
        });

        ChatRequest {
            model: self.metadata.model().to_owned(),
            stream: false,
            format: request.json_output().then_some("json"),
            messages,
            options,
        }
    }
}

#[async_trait]
impl ModelAdapter for OllamaAdapter {
    fn metadata(&self) -> &AdapterMetadata {
        &self.metadata
    }

    async fn complete(&self, request: InferenceRequest) -> AdapterResult<String> {
        let payload = self.build_request(&request);
        let bytes = post_json(&self.client, "Ollama", &self.endpoint, None, &payload, self.timeout).await?;

        let response: ChatResponse = serde_json::from_slice(&bytes)
            .map_err(|err| AdapterError::response(format!("failed to decode Ollama response: {err}")))?;
        if let Some(error) = response.error {
            return Err(AdapterError::response(error));
        }

        let content = response
            .message
            .map(|message| message.content)
            .or(response.response)
            .ok_or_else(|| AdapterError::response("Ollama response carried no message"))?;
        debug!(model = self.metadata.model(), chars = content.len(), "completion received");
        Ok(content)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "num_predict")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{MessageRole, PromptMessage};

    #[test]
    fn rejects_base_url_without_scheme() {
        let err = OllamaConfig::new("llama3.1")
            .with_base_url("localhost:11434")
            .expect_err("missing scheme should error");
        assert!(matches!(err, AdapterError::Configuration { .. }));
    }

    #[test]
    fn sanitize_adds_trailing_slash() {
        let cfg = OllamaConfig::new("llama3.1")
            .with_base_url("http://localhost:11434")
            .expect("valid url");
        assert_eq!(cfg.base_url(), "http://localhost:11434/");
    }

    #[test]
    fn chat_response_parsing_prefers_message() {
        let json = r#"{
            "message": {"role": "assistant", "content": "hi"},
            "response": "ignored"
        }"#;

        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.message.unwrap().content, "hi");
    }

    #[test]
    fn build_request_respects_defaults_and_json_mode() {
        let config = OllamaConfig::new("llama3.1").with_default_temperature(0.1);
        let adapter = OllamaAdapter::new(config).expect("adapter");
        let request = InferenceRequest::new(vec![PromptMessage::new(MessageRole::User, "hello")])
            .unwrap()
            .with_json_output();

        let chat = adapter.build_request(&request);
        assert_eq!(chat.model, adapter.metadata.model());
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.format, Some("json"));
        assert!(chat.options.is_some());
    }
}
