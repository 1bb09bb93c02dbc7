//! Semantic index over tool descriptors and the retriever built on it.
//!
//! The index embeds a deterministic text rendering of every descriptor, keeps
//! the vectors in a persisted, disposable store, and answers cosine top-k
//! queries. [`ToolRetriever`] turns a natural-language query into a ranked,
//! thresholded list of candidate descriptors.

#![warn(missing_docs, clippy::pedantic)]

pub mod embeddings;
pub mod error;
pub mod index;
pub mod record;
pub mod retriever;
pub mod store;

pub use embeddings::{DEFAULT_HASHING_DIMENSIONS, Embedder, EmbeddingVector, HashingEmbedder};
pub use error::{IndexError, IndexResult};
pub use index::{DEFAULT_EMBED_TIMEOUT, EmbeddingIndex, IndexHit};
pub use record::{EmbeddingRecord, catalog_hash, source_text};
pub use retriever::{
    DEFAULT_SCORE_THRESHOLD, DEFAULT_TOP_K, RetrievalOptions, RetrievedTool, ToolRetriever,
};
pub use store::{FileIndexStore, IndexStore, MemoryIndexStore, StoredIndex};
