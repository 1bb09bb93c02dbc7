//! Query-time narrowing of the catalog to a ranked candidate set.

use std::fmt;
use std::sync::Arc;

use agent_primitives::ToolDescriptor;
use tracing::debug;

use crate::IndexResult;
use crate::index::EmbeddingIndex;

/// Default number of candidates handed to the decision service.
pub const DEFAULT_TOP_K: usize = 3;

/// Default minimum similarity; `0.0` keeps every non-negative match.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.0;

/// Candidate tool selected for a query.
#[derive(Clone, Debug)]
pub struct RetrievedTool {
    descriptor: Arc<ToolDescriptor>,
    score: f32,
    rank: usize,
}

impl RetrievedTool {
    /// Resolved descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &Arc<ToolDescriptor> {
        &self.descriptor
    }

    /// Tool name, shorthand for `descriptor().name()`.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        self.descriptor.name()
    }

    /// Cosine similarity between query and tool.
    #[must_use]
    pub const fn score(&self) -> f32 {
        self.score
    }

    /// 1-based rank.
    #[must_use]
    pub const fn rank(&self) -> usize {
        self.rank
    }
}

/// Retrieval settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetrievalOptions {
    /// Maximum number of candidates.
    pub top_k: usize,
    /// Candidates scoring strictly below this value are dropped.
    pub score_threshold: f32,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

/// Embeds queries and ranks catalog tools against them.
///
/// The retriever borrows the embedder from the index it wraps, so queries
/// and records are always embedded by the same model.
#[derive(Clone)]
pub struct ToolRetriever {
    index: Arc<EmbeddingIndex>,
    options: RetrievalOptions,
}

impl ToolRetriever {
    /// Creates a retriever with default options.
    #[must_use]
    pub fn new(index: Arc<EmbeddingIndex>) -> Self {
        Self {
            index,
            options: RetrievalOptions::default(),
        }
    }

    /// Replaces the default options used by [`ToolRetriever::retrieve`].
    #[must_use]
    pub fn with_options(mut self, options: RetrievalOptions) -> Self {
        self.options = options;
        self
    }

    /// Options applied by [`ToolRetriever::retrieve`].
    #[must_use]
    pub const fn options(&self) -> RetrievalOptions {
        self.options
    }

    /// Underlying index.
    #[must_use]
    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    /// Retrieves candidates using the configured options.
    ///
    /// # Errors
    ///
    /// See [`ToolRetriever::retrieve_with`].
    pub async fn retrieve(&self, query: &str) -> IndexResult<Vec<RetrievedTool>> {
        self.retrieve_with(query, self.options.top_k, self.options.score_threshold)
            .await
    }

    /// Retrieves at most `top_k` candidates scoring at least `score_threshold`.
    ///
    /// An empty result is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IndexError::InvalidTopK`] for `top_k == 0`, or the
    /// embedding/timeout failure of the query embedding.
    pub async fn retrieve_with(
        &self,
        query: &str,
        top_k: usize,
        score_threshold: f32,
    ) -> IndexResult<Vec<RetrievedTool>> {
        if top_k == 0 {
            return Err(crate::IndexError::InvalidTopK);
        }
        let vector = self.index.embed(query).await?;
        let hits = self.index.query(&vector, top_k)?;
        let catalog = self.index.catalog();

        let candidates: Vec<RetrievedTool> = hits
            .into_iter()
            .filter(|hit| hit.score() >= score_threshold)
            .filter_map(|hit| {
                catalog.get(hit.tool_name()).map(|descriptor| (descriptor.clone(), hit.score()))
            })
            .enumerate()
            .map(|(idx, (descriptor, score))| RetrievedTool {
                descriptor,
                score,
                rank: idx + 1,
            })
            .collect();

        debug!(
            candidates = candidates.len(),
            top_k,
            score_threshold,
            best = candidates.first().map(RetrievedTool::tool_name),
            "retrieved tool candidates"
        );
        Ok(candidates)
    }
}

impl fmt::Debug for ToolRetriever {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRetriever")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HashingEmbedder, MemoryIndexStore};
    use agent_primitives::{ToolCatalog, ToolDescriptor};

    async fn retriever() -> ToolRetriever {
        let tools = [
            ("get_current_time", "Current local date and time", "what time is it now"),
            ("calculate", "Evaluate an arithmetic expression", "what is 12 times 7"),
            ("course_schedule", "Weekly lecture schedule for a course", "when is the databases lecture"),
            ("student_grades", "Grades of a student for a semester", "show my grades"),
        ]
        .into_iter()
        .map(|(name, description, example)| {
            ToolDescriptor::builder(name, description)
                .example(example)
                .build()
                .unwrap()
        });
        let catalog = Arc::new(ToolCatalog::from_descriptors(tools).unwrap());
        let index = EmbeddingIndex::init(
            catalog,
            Arc::new(HashingEmbedder::default()),
            Arc::new(MemoryIndexStore::new()),
        )
        .await
        .unwrap();
        index.build().await.unwrap();
        ToolRetriever::new(Arc::new(index))
    }

    #[tokio::test]
    async fn ranks_are_one_based_and_bounded() {
        let retriever = retriever().await;
        let results = retriever.retrieve_with("what time is it", 2, -1.0).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].rank(), 1);
        assert_eq!(results[1].rank(), 2);
        assert_eq!(results[0].tool_name(), "get_current_time");
        assert!(results[0].score() >= results[1].score());
    }

    #[tokio::test]
    async fn threshold_filters_every_result() {
        let retriever = retriever().await;
        let results = retriever.retrieve_with("what time is it", 4, -1.0).await.unwrap();
        assert_eq!(results.len(), 4);

        let strict = retriever.retrieve_with("what time is it", 4, 0.99).await.unwrap();
        assert!(strict.iter().all(|tool| tool.score() >= 0.99));
    }

    #[tokio::test]
    async fn nonsense_query_clears_a_high_threshold_with_nothing() {
        let retriever = retriever().await;
        let results = retriever.retrieve_with("xqzvk blorf wump", 3, 0.5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn results_are_unique() {
        let retriever = retriever().await;
        let results = retriever.retrieve_with("schedule grades time", 4, -1.0).await.unwrap();
        let mut names: Vec<_> = results.iter().map(RetrievedTool::tool_name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), results.len());
    }
}
