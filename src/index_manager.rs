//! Owner of every app's vector index handle.
//!
//! One handle per app id is created on first use and cached. The manager is
//! an explicit value passed to the engine; there is no process-wide
//! registry. With the `sqlite` backend each app's index lives in
//! `<storage.root>/apps/<app_id>/index`, so isolation holds on disk too.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use tenant_rag_core::index::memory::MemoryIndex;
use tenant_rag_core::index::VectorIndex;

use crate::error::{Error, Result};
use crate::sqlite_index::SqliteIndex;

/// Storage flavour for new index handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBackend {
    Sqlite,
    Memory,
}

impl IndexBackend {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "sqlite" => Ok(IndexBackend::Sqlite),
            "memory" => Ok(IndexBackend::Memory),
            other => Err(Error::InvalidConfig(format!(
                "Unknown index backend: '{}'",
                other
            ))),
        }
    }
}

pub struct IndexManager {
    apps_dir: PathBuf,
    backend: IndexBackend,
    handles: Mutex<HashMap<String, Arc<dyn VectorIndex>>>,
}

impl IndexManager {
    /// `apps_dir` is `<storage.root>/apps`.
    pub fn new(apps_dir: impl Into<PathBuf>, backend: IndexBackend) -> Self {
        Self {
            apps_dir: apps_dir.into(),
            backend,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> IndexBackend {
        self.backend
    }

    /// Directory of one app's sqlite index.
    pub fn index_dir(&self, app_id: &str) -> PathBuf {
        self.apps_dir.join(app_id).join("index")
    }

    /// The index handle for `app_id`, opening or creating it on first use.
    pub async fn get_or_create(&self, app_id: &str) -> Result<Arc<dyn VectorIndex>> {
        let mut handles = self.handles.lock().await;
        if let Some(index) = handles.get(app_id) {
            return Ok(Arc::clone(index));
        }

        let index: Arc<dyn VectorIndex> = match self.backend {
            IndexBackend::Sqlite => Arc::new(SqliteIndex::open(self.index_dir(app_id)).await?),
            IndexBackend::Memory => Arc::new(MemoryIndex::new()),
        };
        handles.insert(app_id.to_string(), Arc::clone(&index));
        Ok(index)
    }

    /// Drop an app's index: clear it, forget the handle, remove its files.
    ///
    /// A later [`get_or_create`](Self::get_or_create) starts from empty.
    pub async fn delete(&self, app_id: &str) -> Result<()> {
        let existing = self.handles.lock().await.remove(app_id);
        if let Some(index) = existing {
            index.clear().await?;
        }

        let dir = self.index_dir(app_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::IndexWriteFailure(e.to_string())),
        }

        info!(app_id, "index deleted");
        Ok(())
    }

    /// Number of cached handles.
    pub async fn open_count(&self) -> usize {
        self.handles.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenant_rag_core::chunk::chunk_text;
    use tenant_rag_core::embedding::HashEmbedder;
    use tenant_rag_core::models::{BuildInfo, IndexEntry};

    fn entries(source: &str, text: &str) -> Vec<IndexEntry> {
        let embedder = HashEmbedder::new(32);
        let chunks = chunk_text(source, text, 100, 10).unwrap();
        let vectors = chunks.iter().map(|c| embedder.embed_one(&c.text)).collect();
        IndexEntry::from_parts(chunks, vectors)
    }

    fn hash_info() -> BuildInfo {
        BuildInfo::new(HashEmbedder::MODEL_NAME, 32)
    }

    #[tokio::test]
    async fn test_same_handle_per_app() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::new(dir.path(), IndexBackend::Sqlite);
        let a = manager.get_or_create("css").await.unwrap();
        let b = manager.get_or_create("css").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.open_count().await, 1);
        assert!(manager.index_dir("css").exists());
    }

    #[tokio::test]
    async fn test_apps_are_isolated() {
        for backend in [IndexBackend::Sqlite, IndexBackend::Memory] {
            let dir = tempfile::tempdir().unwrap();
            let manager = IndexManager::new(dir.path(), backend);
            manager
                .get_or_create("a1")
                .await
                .unwrap()
                .upsert(hash_info(), entries("a.txt", "alpha"))
                .await
                .unwrap();

            let b = manager.get_or_create("b1").await.unwrap();
            assert_eq!(b.len().await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_delete_then_recreate_is_empty() {
        for backend in [IndexBackend::Sqlite, IndexBackend::Memory] {
            let dir = tempfile::tempdir().unwrap();
            let manager = IndexManager::new(dir.path(), backend);
            let index = manager.get_or_create("css").await.unwrap();
            index
                .upsert(hash_info(), entries("doc1.txt", "CSS is a style sheet language."))
                .await
                .unwrap();

            manager.delete("css").await.unwrap();
            assert!(!manager.index_dir("css").exists());

            let fresh = manager.get_or_create("css").await.unwrap();
            assert_eq!(fresh.len().await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_delete_unknown_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::new(dir.path(), IndexBackend::Sqlite);
        manager.delete("ghost").await.unwrap();
    }

    #[test]
    fn test_parse_backend() {
        assert_eq!(IndexBackend::parse("sqlite").unwrap(), IndexBackend::Sqlite);
        assert_eq!(IndexBackend::parse("memory").unwrap(), IndexBackend::Memory);
        assert!(IndexBackend::parse("chroma").is_err());
    }
}
