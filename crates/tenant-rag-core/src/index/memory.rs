//! In-memory [`VectorIndex`] implementation for tests and ephemeral deployments.
//!
//! Holds the current build as an immutable snapshot (`Arc<Snapshot>`)
//! behind a `std::sync::RwLock`. `upsert` prepares the new snapshot outside
//! the lock and swaps the pointer under it, so readers see one whole build.
//! Search is brute-force cosine similarity over the snapshot.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{CoreError, CoreResult};
use crate::models::{BuildInfo, IndexEntry, RetrievalResult};
use crate::search::{rank, validate_top_k, Candidate};

use super::VectorIndex;

#[derive(Default)]
struct Snapshot {
    info: Option<BuildInfo>,
    entries: Vec<IndexEntry>,
}

/// In-memory index for testing and non-persistent deployments.
pub struct MemoryIndex {
    current: RwLock<Arc<Snapshot>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    fn snapshot(&self) -> CoreResult<Arc<Snapshot>> {
        self.current
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| CoreError::IndexRead("index lock poisoned".to_string()))
    }

    fn swap(&self, next: Snapshot) -> CoreResult<()> {
        let next = Arc::new(next);
        let mut guard = self
            .current
            .write()
            .map_err(|_| CoreError::IndexWrite("index lock poisoned".to_string()))?;
        *guard = next;
        Ok(())
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, info: BuildInfo, entries: Vec<IndexEntry>) -> CoreResult<()> {
        self.swap(Snapshot {
            info: Some(info),
            entries,
        })
    }

    async fn build_info(&self) -> CoreResult<Option<BuildInfo>> {
        Ok(self.snapshot()?.info.clone())
    }

    async fn search(&self, query: &[f32], k: usize) -> CoreResult<RetrievalResult> {
        validate_top_k(k)?;
        let snapshot = self.snapshot()?;
        rank(
            snapshot.entries.iter().map(|e| Candidate {
                text: &e.chunk.text,
                source: &e.chunk.source,
                vector: &e.vector,
                position: e.position,
            }),
            query,
            k,
        )
    }

    async fn clear(&self) -> CoreResult<()> {
        self.swap(Snapshot::default())
    }

    async fn len(&self) -> CoreResult<usize> {
        Ok(self.snapshot()?.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;
    use crate::embedding::HashEmbedder;

    fn build(source: &str, text: &str) -> Vec<IndexEntry> {
        let embedder = HashEmbedder::new(64);
        let chunks = chunk_text(source, text, 40, 8).unwrap();
        let vectors = chunks.iter().map(|c| embedder.embed_one(&c.text)).collect();
        IndexEntry::from_parts(chunks, vectors)
    }

    fn hash_info() -> BuildInfo {
        BuildInfo::new(HashEmbedder::MODEL_NAME, 64)
    }

    #[tokio::test]
    async fn test_new_index_is_empty() {
        let index = MemoryIndex::new();
        assert!(index.is_empty().await.unwrap());
        let result = index.search(&[1.0; 64], 3).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_contents() {
        let index = MemoryIndex::new();
        index
            .upsert(hash_info(), build("old.txt", "old content about tables and rows"))
            .await
            .unwrap();
        index
            .upsert(hash_info(), build("new.txt", "new content about selectors"))
            .await
            .unwrap();

        let q = HashEmbedder::new(64).embed_one("content");
        let result = index.search(&q, 10).await.unwrap();
        assert!(!result.is_empty());
        assert!(result.chunks.iter().all(|c| c.source == "new.txt"));
        assert_eq!(index.build_info().await.unwrap(), Some(hash_info()));
    }

    #[tokio::test]
    async fn test_clear() {
        let index = MemoryIndex::new();
        index.upsert(hash_info(), build("a.txt", "some text")).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);
        index.clear().await.unwrap();
        assert!(index.is_empty().await.unwrap());
        assert!(index.build_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_rejects_zero_k() {
        let index = MemoryIndex::new();
        assert!(matches!(
            index.search(&[1.0], 0).await,
            Err(CoreError::InvalidConfig(_))
        ));
    }
}
