//! Persistence for embedding records.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::record::EmbeddingRecord;
use crate::{IndexError, IndexResult};

/// Everything persisted for one build of the index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredIndex {
    /// Fingerprint of the embedder that produced the vectors.
    pub fingerprint: String,
    /// Hash of the catalog the records were built from.
    pub catalog_hash: String,
    /// Vector dimensionality, zero when no records exist.
    pub dimensions: usize,
    /// One record per tool, in catalog order.
    pub records: Vec<EmbeddingRecord>,
}

/// Backing storage for the embedding index.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Loads the persisted index, `None` when nothing has been saved yet.
    ///
    /// Unreadable or corrupt content is reported as [`IndexError::Storage`].
    async fn load(&self) -> IndexResult<Option<StoredIndex>>;

    /// Replaces the persisted index.
    async fn save(&self, index: &StoredIndex) -> IndexResult<()>;

    /// Removes any persisted index.
    async fn clear(&self) -> IndexResult<()>;
}

/// JSON file store. Writes go to a sibling temp file first and are renamed
/// into place, so readers never observe a half-written index.
#[derive(Debug)]
pub struct FileIndexStore {
    path: PathBuf,
}

impl FileIndexStore {
    /// Creates a store rooted at `path`. Nothing is touched until first use.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the underlying path of the index file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", Uuid::new_v4()));
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl IndexStore for FileIndexStore {
    async fn load(&self) -> IndexResult<Option<StoredIndex>> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(IndexError::storage(format!(
                    "cannot read {}: {err}",
                    self.path.display()
                )));
            }
        };
        let stored: StoredIndex = serde_json::from_slice(&data).map_err(|err| {
            IndexError::storage(format!("corrupt index {}: {err}", self.path.display()))
        })?;
        if stored
            .records
            .iter()
            .any(|record| record.vector().len() != stored.dimensions)
        {
            return Err(IndexError::storage(format!(
                "index {} mixes vector dimensions",
                self.path.display()
            )));
        }
        debug!(path = %self.path.display(), records = stored.records.len(), "loaded embedding index");
        Ok(Some(stored))
    }

    async fn save(&self, index: &StoredIndex) -> IndexResult<()> {
        if let Some(parent) = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec(index)?;
        let temp = self.temp_path();
        fs::write(&temp, data).await?;
        fs::rename(&temp, &self.path).await?;
        debug!(path = %self.path.display(), records = index.records.len(), "saved embedding index");
        Ok(())
    }

    async fn clear(&self) -> IndexResult<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    slot: Mutex<Option<StoredIndex>>,
}

impl MemoryIndexStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn load(&self) -> IndexResult<Option<StoredIndex>> {
        Ok(self.slot.lock().await.clone())
    }

    async fn save(&self, index: &StoredIndex) -> IndexResult<()> {
        *self.slot.lock().await = Some(index.clone());
        Ok(())
    }

    async fn clear(&self) -> IndexResult<()> {
        self.slot.lock().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingVector;

    fn temp_path() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("tool-index-{}.json", Uuid::new_v4()));
        path
    }

    fn sample() -> StoredIndex {
        StoredIndex {
            fingerprint: "test".into(),
            catalog_hash: "abc".into(),
            dimensions: 2,
            records: vec![EmbeddingRecord::new(
                "calculate",
                EmbeddingVector::new(vec![0.6, 0.8]).unwrap(),
                "calculate",
            )],
        }
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let store = FileIndexStore::new(temp_path());
        assert!(store.load().await.unwrap().is_none());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn save_then_load() {
        let path = temp_path();
        let store = FileIndexStore::new(&path);
        store.save(&sample()).await.unwrap();

        let loaded = store.load().await.unwrap().expect("stored index");
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].tool_name(), "calculate");
        assert_eq!(leftover_temp_files(&path), 0);

        store.clear().await.unwrap();
        assert!(!path.exists());
    }

    fn leftover_temp_files(path: &Path) -> usize {
        let stem = path.file_name().unwrap().to_string_lossy().into_owned();
        std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.starts_with(&stem) && name.ends_with(".tmp")
            })
            .count()
    }

    #[tokio::test]
    async fn concurrent_writers_use_distinct_temp_files() {
        let path = temp_path();
        let first = FileIndexStore::new(&path);
        let second = FileIndexStore::new(&path);
        assert_ne!(first.temp_path(), second.temp_path());

        let (sample_a, sample_b) = (sample(), sample());
        let (a, b) = tokio::join!(first.save(&sample_a), second.save(&sample_b));
        a.unwrap();
        b.unwrap();
        assert_eq!(first.load().await.unwrap().expect("stored index").records.len(), 1);
        assert_eq!(leftover_temp_files(&path), 0);
        first.clear().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_is_a_storage_error() {
        let path = temp_path();
        std::fs::write(&path, b"{not json").unwrap();
        let store = FileIndexStore::new(&path);
        let err = store.load().await.expect_err("corrupt");
        assert!(err.requires_rebuild());
        store.clear().await.unwrap();
    }
}
