//! Remote embedder backed by Ollama's `/api/embeddings` endpoint.

use std::fmt;
use std::time::Duration;

use agent_index::{Embedder, EmbeddingVector, IndexError, IndexResult};
use async_trait::async_trait;
use hyper::Uri;
use serde::{Deserialize, Serialize};

use crate::http_client::{HyperClient, build_https_client, endpoint, post_json};
use crate::ollama::OllamaConfig;
use crate::traits::AdapterResult;

/// Embeds text with an Ollama embedding model such as `nomic-embed-text`.
pub struct OllamaEmbedder {
    client: HyperClient,
    endpoint: Uri,
    model: String,
    timeout: Duration,
}

impl fmt::Debug for OllamaEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OllamaEmbedder")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl OllamaEmbedder {
    /// Creates an embedder using the daemon and model from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::traits::AdapterError::Configuration`] if the endpoint
    /// is invalid.
    pub fn new(config: &OllamaConfig) -> AdapterResult<Self> {
        Ok(Self {
            client: build_https_client(),
            endpoint: endpoint("Ollama", config.base_url(), "api/embeddings")?,
            model: config.model().to_owned(),
            timeout: config.timeout(),
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> IndexResult<EmbeddingVector> {
        let payload = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };
        let bytes = post_json(&self.client, "Ollama", &self.endpoint, None, &payload, self.timeout)
            .await
            .map_err(|err| IndexError::embedding(err.to_string()))?;
        let response: EmbeddingResponse = serde_json::from_slice(&bytes)
            .map_err(|err| IndexError::embedding(format!("failed to decode embedding: {err}")))?;
        if let Some(error) = response.error {
            return Err(IndexError::embedding(error));
        }
        EmbeddingVector::new(response.embedding)
    }

    fn fingerprint(&self) -> String {
        format!("ollama:{}", self.model)
    }
}
