//! Model-backed services used by the runtime.
//!
//! [`openai`] and [`ollama`] implement the shared [`traits::ModelAdapter`]
//! interface; [`decision`] builds the decision-making service on top of any
//! adapter, and [`embeddings`] provides a remote [`agent_index::Embedder`].

#![warn(missing_docs, clippy::pedantic)]

pub mod decision;
pub mod embeddings;
pub mod ollama;
pub mod openai;
pub mod traits;

mod http_client;

pub use decision::{DEFAULT_SYSTEM_PROMPT, Decision, DecisionService, ModelDecisionService};
pub use embeddings::OllamaEmbedder;
pub use ollama::{OllamaAdapter, OllamaConfig};
pub use openai::{OpenAiAdapter, OpenAiConfig};
pub use traits::{AdapterError, AdapterMetadata, AdapterResult, ModelAdapter};
