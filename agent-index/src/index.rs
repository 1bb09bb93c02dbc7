//! Lifecycle-managed embedding index bound to one catalog.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use agent_primitives::ToolCatalog;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::embeddings::{Embedder, EmbeddingVector};
use crate::record::{EmbeddingRecord, catalog_hash, source_text};
use crate::store::{IndexStore, StoredIndex};
use crate::{IndexError, IndexResult};

/// Default timeout applied to each embedding call.
pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(10);

/// Scored match returned by [`EmbeddingIndex::query`].
#[derive(Clone, Debug, PartialEq)]
pub struct IndexHit {
    tool_name: String,
    score: f32,
}

impl IndexHit {
    /// Name of the matched tool.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Cosine similarity in `[-1, 1]`.
    #[must_use]
    pub const fn score(&self) -> f32 {
        self.score
    }
}

#[derive(Default)]
struct Snapshot {
    fingerprint: String,
    catalog_hash: String,
    dimensions: usize,
    // (catalog position, record), ascending by position
    entries: Vec<(usize, EmbeddingRecord)>,
}

impl Snapshot {
    fn from_stored(stored: StoredIndex, catalog: &ToolCatalog) -> Self {
        let mut entries: Vec<(usize, EmbeddingRecord)> = stored
            .records
            .into_iter()
            .filter_map(|record| {
                catalog
                    .position(record.tool_name())
                    .map(|position| (position, record))
            })
            .collect();
        entries.sort_by_key(|(position, _)| *position);
        entries.dedup_by_key(|(position, _)| *position);
        Self {
            fingerprint: stored.fingerprint,
            catalog_hash: stored.catalog_hash,
            dimensions: stored.dimensions,
            entries,
        }
    }
}

/// Semantic index over the descriptors of one [`ToolCatalog`].
///
/// Created with [`EmbeddingIndex::init`], populated with
/// [`EmbeddingIndex::build`] and released with [`EmbeddingIndex::shutdown`].
/// Queries read an immutable snapshot; builds are serialised and swap the
/// snapshot atomically once every record has been embedded.
pub struct EmbeddingIndex {
    catalog: Arc<ToolCatalog>,
    catalog_hash: String,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn IndexStore>,
    snapshot: RwLock<Arc<Snapshot>>,
    build_lock: Mutex<()>,
    embed_timeout: Duration,
}

impl EmbeddingIndex {
    /// Binds an index handle to a catalog, loading any persisted records.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Storage`] when the persisted index is unreadable.
    pub async fn init(
        catalog: Arc<ToolCatalog>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn IndexStore>,
    ) -> IndexResult<Self> {
        let catalog_hash = catalog_hash(&catalog);
        let snapshot = match store.load().await? {
            Some(stored) if stored.fingerprint == embedder.fingerprint() => {
                Snapshot::from_stored(stored, &catalog)
            }
            Some(stored) => {
                // vectors from another model are meaningless to this embedder
                debug!(
                    stored = %stored.fingerprint,
                    current = %embedder.fingerprint(),
                    "ignoring index built by a different embedder"
                );
                Snapshot::default()
            }
            None => Snapshot::default(),
        };
        debug!(
            tools = catalog.len(),
            records = snapshot.entries.len(),
            "initialised embedding index"
        );
        Ok(Self {
            catalog,
            catalog_hash,
            embedder,
            store,
            snapshot: RwLock::new(Arc::new(snapshot)),
            build_lock: Mutex::new(()),
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
        })
    }

    /// Initialises the index, discarding an unreadable store, and builds it
    /// when the persisted records are missing or stale.
    ///
    /// # Errors
    ///
    /// Propagates store and embedding failures from the rebuild.
    pub async fn open_or_rebuild(
        catalog: Arc<ToolCatalog>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn IndexStore>,
        embed_timeout: Duration,
    ) -> IndexResult<Self> {
        let index = match Self::init(catalog.clone(), embedder.clone(), store.clone()).await {
            Ok(index) => index,
            Err(err) if err.requires_rebuild() => {
                warn!(error = %err, "discarding unreadable embedding index");
                store.clear().await?;
                Self::init(catalog, embedder, store).await?
            }
            Err(err) => return Err(err),
        }
        .with_embed_timeout(embed_timeout);

        if !index.catalog.is_empty() && !index.is_built() {
            index.build().await?;
        }
        Ok(index)
    }

    /// Overrides the per-call embedding timeout.
    #[must_use]
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    /// Embeds every descriptor and replaces the persisted records.
    ///
    /// Returns the number of records written. An empty catalog is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates embedding, timeout and store failures. On error the previous
    /// snapshot stays in place.
    pub async fn build(&self) -> IndexResult<usize> {
        let _guard = self.build_lock.lock().await;
        let started = Instant::now();

        if self.catalog.is_empty() {
            debug!("catalog is empty; nothing to index");
            self.replace_snapshot(Snapshot {
                fingerprint: self.embedder.fingerprint(),
                catalog_hash: self.catalog_hash.clone(),
                ..Snapshot::default()
            });
            return Ok(0);
        }

        let mut records = Vec::with_capacity(self.catalog.len());
        let mut dimensions = 0;
        for descriptor in self.catalog.iter() {
            let text = source_text(descriptor);
            let vector = self.embed(&text).await?;
            if dimensions == 0 {
                dimensions = vector.len();
            } else if vector.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    actual: vector.len(),
                });
            }
            records.push(EmbeddingRecord::new(descriptor.name(), vector, text));
        }

        let stored = StoredIndex {
            fingerprint: self.embedder.fingerprint(),
            catalog_hash: self.catalog_hash.clone(),
            dimensions,
            records,
        };
        self.store.save(&stored).await?;

        let count = stored.records.len();
        self.replace_snapshot(Snapshot::from_stored(stored, &self.catalog));
        info!(
            records = count,
            dimensions,
            elapsed_ms = started.elapsed().as_millis(),
            "built embedding index"
        );
        Ok(count)
    }

    /// Whether the loaded records match the catalog and embedder.
    #[must_use]
    pub fn is_built(&self) -> bool {
        let snapshot = self.current();
        !snapshot.entries.is_empty()
            && snapshot.entries.len() == self.catalog.len()
            && snapshot.catalog_hash == self.catalog_hash
            && snapshot.fingerprint == self.embedder.fingerprint()
    }

    /// Top `top_k` tools by cosine similarity, descending, ties in catalog order.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidTopK`] when `top_k` is zero and
    /// [`IndexError::DimensionMismatch`] when `vector` does not match the index.
    pub fn query(&self, vector: &EmbeddingVector, top_k: usize) -> IndexResult<Vec<IndexHit>> {
        if top_k == 0 {
            return Err(IndexError::InvalidTopK);
        }
        let snapshot = self.current();
        if snapshot.entries.is_empty() {
            return Ok(Vec::new());
        }
        if vector.len() != snapshot.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: snapshot.dimensions,
                actual: vector.len(),
            });
        }

        let mut hits = snapshot
            .entries
            .iter()
            .map(|(_, record)| {
                Ok(IndexHit {
                    tool_name: record.tool_name().to_owned(),
                    score: record.vector().cosine(vector)?,
                })
            })
            .collect::<IndexResult<Vec<_>>>()?;
        // stable: equal scores keep catalog order
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Embeds text with the index's embedder, bounded by the embed timeout.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Timeout`] when the embedder does not answer in
    /// time, or the embedder's own error.
    pub async fn embed(&self, text: &str) -> IndexResult<EmbeddingVector> {
        tokio::time::timeout(self.embed_timeout, self.embedder.embed(text))
            .await
            .map_err(|_| IndexError::Timeout {
                timeout_ms: self.embed_timeout.as_millis(),
            })?
    }

    /// Catalog this index is bound to.
    #[must_use]
    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    /// Embedder used for both indexing and queries.
    #[must_use]
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Number of records currently loaded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current().entries.len()
    }

    /// Returns `true` when no records are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases the handle after any in-flight build finishes.
    pub async fn shutdown(self) {
        let _guard = self.build_lock.lock().await;
        debug!(records = self.len(), "embedding index shut down");
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_snapshot(&self, snapshot: Snapshot) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }
}

impl fmt::Debug for EmbeddingIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingIndex")
            .field("tools", &self.catalog.len())
            .field("records", &self.len())
            .field("fingerprint", &self.embedder.fingerprint())
            .finish_non_exhaustive()
    }
}
