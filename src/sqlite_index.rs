//! SQLite-backed [`VectorIndex`] with atomic generation swaps.
//!
//! Each app's index directory holds one complete build per SQLite file:
//!
//! ```text
//! <storage.root>/apps/<app_id>/index/
//!   CURRENT                 # name of the live generation file
//!   gen-<uuid v7>.sqlite    # the live build
//!   gen-<uuid v7>.sqlite    # the build it replaced
//! ```
//!
//! [`upsert`](VectorIndex::upsert) writes the new build into a fresh
//! generation file, points `CURRENT` at it (write-temp-then-rename), and
//! swaps the open pool under a write lock. Searches hold the read lock for
//! their whole duration. A failed build leaves the previous generation
//! untouched.
//!
//! Several processes may share one index directory (`trag serve` alongside
//! `trag train`). Every read re-resolves `CURRENT` and reopens the pool when
//! another process has installed a newer generation. Generation names sort
//! by creation time, and cleanup only removes files older than the build
//! the live one replaced, so neither a reader in another process nor a
//! build still being written is ever unlinked.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use tenant_rag_core::embedding::{blob_to_vec, vec_to_blob};
use tenant_rag_core::index::VectorIndex;
use tenant_rag_core::models::{BuildInfo, IndexEntry, RetrievalResult};
use tenant_rag_core::search::{rank, validate_top_k, Candidate};
use tenant_rag_core::{CoreError, CoreResult};

use crate::db;
use crate::migrate::run_index_migrations;

const CURRENT_FILE: &str = "CURRENT";
const CURRENT_TMP: &str = "CURRENT.tmp";

struct Generation {
    file_name: String,
    pool: SqlitePool,
    info: Option<BuildInfo>,
}

impl Generation {
    /// Open an existing generation file read for searching.
    async fn open(dir: &Path, file_name: String) -> CoreResult<Self> {
        let pool = db::connect_existing(&dir.join(&file_name))
            .await
            .map_err(read_err)?;
        let row = sqlx::query("SELECT model, dims FROM build LIMIT 1")
            .fetch_optional(&pool)
            .await
            .map_err(read_err)?;
        let info = row.map(|row| {
            let dims: i64 = row.get("dims");
            BuildInfo::new(row.get::<String, _>("model"), dims as usize)
        });
        Ok(Self {
            file_name,
            pool,
            info,
        })
    }
}

/// Persistent vector index for one app.
pub struct SqliteIndex {
    dir: PathBuf,
    current: RwLock<Option<Generation>>,
    /// Serializes builds so two writers never race on `CURRENT`.
    writer: Mutex<()>,
}

fn write_err(e: impl std::fmt::Display) -> CoreError {
    CoreError::IndexWrite(e.to_string())
}

fn read_err(e: impl std::fmt::Display) -> CoreError {
    CoreError::IndexRead(e.to_string())
}

fn is_generation(name: &str) -> bool {
    name.starts_with("gen-") && name.ends_with(".sqlite")
}

fn new_generation_name() -> String {
    format!("gen-{}.sqlite", uuid::Uuid::now_v7())
}

/// Name of the live generation recorded in `dir/CURRENT`.
async fn read_current(dir: &Path) -> CoreResult<Option<String>> {
    match tokio::fs::read_to_string(dir.join(CURRENT_FILE)).await {
        Ok(name) => {
            let name = name.trim();
            Ok((!name.is_empty()).then(|| name.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(read_err(e)),
    }
}

async fn list_generations(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return names;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_generation(&name) {
            names.push(name);
        }
    }
    names.sort();
    names
}

async fn remove_generation_files(dir: &Path, file_name: &str) {
    for suffix in ["", "-wal", "-shm"] {
        let path = dir.join(format!("{}{}", file_name, suffix));
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to remove index file");
            }
        }
    }
}

impl SqliteIndex {
    /// Open the index stored in `dir`, creating the directory if needed.
    ///
    /// Resolves `CURRENT` to reopen the last complete build and removes
    /// generations older than the one it replaced.
    pub async fn open(dir: impl Into<PathBuf>) -> CoreResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(read_err)?;

        let current = match read_current(&dir).await? {
            Some(file_name) if dir.join(&file_name).exists() => {
                let generation = Generation::open(&dir, file_name).await?;
                debug!(dir = %dir.display(), generation = %generation.file_name, "reopened index");
                Some(generation)
            }
            Some(file_name) => {
                warn!(dir = %dir.display(), generation = %file_name, "CURRENT points at a missing generation");
                None
            }
            None => None,
        };

        let index = Self {
            dir,
            current: RwLock::new(current),
            writer: Mutex::new(()),
        };
        if let Some(live) = index.generation().await {
            index.remove_superseded(&live).await;
        }
        Ok(index)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Name of the generation this handle currently reads from, if any.
    pub async fn generation(&self) -> Option<String> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|g| g.file_name.clone())
    }

    /// Close the live generation without deleting it.
    pub async fn close(&self) {
        if let Some(generation) = self.current.write().await.take() {
            generation.pool.close().await;
        }
    }

    /// Follow `CURRENT` if another process has moved it.
    async fn refresh(&self) -> CoreResult<()> {
        let named = read_current(&self.dir).await?;
        if named == self.generation().await {
            return Ok(());
        }

        let mut guard = self.current.write().await;
        let named = read_current(&self.dir).await?;
        let live = guard.as_ref().map(|g| g.file_name.clone());
        if named == live {
            return Ok(());
        }

        let next = match named {
            Some(file_name) => Some(Generation::open(&self.dir, file_name).await?),
            None => None,
        };
        debug!(
            dir = %self.dir.display(),
            from = ?live,
            to = ?next.as_ref().map(|g| g.file_name.as_str()),
            "following generation installed elsewhere"
        );
        if let Some(old) = std::mem::replace(&mut *guard, next) {
            old.pool.close().await;
        }
        Ok(())
    }

    /// Remove generations older than the one `live` replaced.
    ///
    /// Newer files may be builds still being written by another process and
    /// are left alone, as is the immediate predecessor, which a reader in
    /// another process may not have switched away from yet.
    async fn remove_superseded(&self, live: &str) {
        let older: Vec<String> = list_generations(&self.dir)
            .await
            .into_iter()
            .filter(|name| name.as_str() < live)
            .collect();
        let Some((_previous, stale)) = older.split_last() else {
            return;
        };
        for name in stale {
            debug!(generation = %name, "removing superseded generation");
            remove_generation_files(&self.dir, name).await;
        }
    }

    async fn write_generation(
        &self,
        file_name: &str,
        info: &BuildInfo,
        entries: &[IndexEntry],
    ) -> CoreResult<SqlitePool> {
        let pool = db::connect(&self.dir.join(file_name))
            .await
            .map_err(write_err)?;
        let result = async {
            run_index_migrations(&pool).await.map_err(write_err)?;

            let mut tx = pool.begin().await.map_err(write_err)?;
            sqlx::query("INSERT INTO build (model, dims) VALUES (?, ?)")
                .bind(&info.model)
                .bind(info.dims as i64)
                .execute(&mut *tx)
                .await
                .map_err(write_err)?;
            for entry in entries {
                sqlx::query(
                    "INSERT INTO entries (position, chunk_id, source, ordinal, text, hash, embedding) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(entry.position)
                .bind(&entry.chunk.id)
                .bind(&entry.chunk.source)
                .bind(entry.chunk.ordinal)
                .bind(&entry.chunk.text)
                .bind(&entry.chunk.hash)
                .bind(vec_to_blob(&entry.vector))
                .execute(&mut *tx)
                .await
                .map_err(write_err)?;
            }
            tx.commit().await.map_err(write_err)
        }
        .await;

        match result {
            Ok(()) => Ok(pool),
            Err(e) => {
                pool.close().await;
                Err(e)
            }
        }
    }

    async fn point_current_at(&self, file_name: &str) -> CoreResult<()> {
        let tmp = self.dir.join(CURRENT_TMP);
        tokio::fs::write(&tmp, file_name).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, self.dir.join(CURRENT_FILE))
            .await
            .map_err(write_err)
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, info: BuildInfo, entries: Vec<IndexEntry>) -> CoreResult<()> {
        let _writer = self.writer.lock().await;

        let file_name = new_generation_name();
        let pool = match self.write_generation(&file_name, &info, &entries).await {
            Ok(pool) => pool,
            Err(e) => {
                remove_generation_files(&self.dir, &file_name).await;
                return Err(e);
            }
        };

        let old = {
            let mut guard = self.current.write().await;
            if let Err(e) = self.point_current_at(&file_name).await {
                drop(guard);
                pool.close().await;
                remove_generation_files(&self.dir, &file_name).await;
                return Err(e);
            }
            std::mem::replace(
                &mut *guard,
                Some(Generation {
                    file_name: file_name.clone(),
                    pool,
                    info: Some(info),
                }),
            )
        };
        if let Some(old) = old {
            old.pool.close().await;
        }
        self.remove_superseded(&file_name).await;

        info!(dir = %self.dir.display(), generation = %file_name, entries = entries.len(), "index generation installed");
        Ok(())
    }

    async fn build_info(&self) -> CoreResult<Option<BuildInfo>> {
        self.refresh().await?;
        Ok(self
            .current
            .read()
            .await
            .as_ref()
            .and_then(|g| g.info.clone()))
    }

    async fn search(&self, query: &[f32], k: usize) -> CoreResult<RetrievalResult> {
        validate_top_k(k)?;
        self.refresh().await?;

        let guard = self.current.read().await;
        let Some(generation) = guard.as_ref() else {
            return Ok(RetrievalResult::default());
        };

        let rows = sqlx::query("SELECT position, source, text, embedding FROM entries")
            .fetch_all(&generation.pool)
            .await
            .map_err(read_err)?;

        let stored: Vec<(i64, String, String, Vec<f32>)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (
                    row.get("position"),
                    row.get("source"),
                    row.get("text"),
                    blob_to_vec(&blob),
                )
            })
            .collect();

        rank(
            stored.iter().map(|(position, source, text, vector)| Candidate {
                text,
                source,
                vector,
                position: *position,
            }),
            query,
            k,
        )
    }

    async fn clear(&self) -> CoreResult<()> {
        let _writer = self.writer.lock().await;

        let old = {
            let mut guard = self.current.write().await;
            match tokio::fs::remove_file(self.dir.join(CURRENT_FILE)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(write_err(e)),
            }
            guard.take()
        };
        if let Some(old) = old {
            old.pool.close().await;
        }
        for name in list_generations(&self.dir).await {
            remove_generation_files(&self.dir, &name).await;
        }
        Ok(())
    }

    async fn len(&self) -> CoreResult<usize> {
        self.refresh().await?;

        let guard = self.current.read().await;
        let Some(generation) = guard.as_ref() else {
            return Ok(0);
        };

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&generation.pool)
            .await
            .map_err(read_err)?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tenant_rag_core::chunk::chunk_text;
    use tenant_rag_core::embedding::HashEmbedder;

    fn build(source: &str, text: &str) -> Vec<IndexEntry> {
        let embedder = HashEmbedder::new(64);
        let chunks = chunk_text(source, text, 40, 8).unwrap();
        let vectors = chunks.iter().map(|c| embedder.embed_one(&c.text)).collect();
        IndexEntry::from_parts(chunks, vectors)
    }

    fn hash_info() -> BuildInfo {
        BuildInfo::new(HashEmbedder::MODEL_NAME, 64)
    }

    fn generation_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| is_generation(n))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteIndex::open(dir.path().join("index")).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 0);
        assert!(index.search(&[1.0; 64], 3).await.unwrap().is_empty());
        assert!(index.generation().await.is_none());
        assert!(index.build_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_generation() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteIndex::open(dir.path()).await.unwrap();

        index
            .upsert(hash_info(), build("old.txt", "old content about tables and rows"))
            .await
            .unwrap();
        let first = index.generation().await.unwrap();

        index
            .upsert(hash_info(), build("new.txt", "new content about selectors"))
            .await
            .unwrap();
        let second = index.generation().await.unwrap();
        assert_ne!(first, second);
        assert!(first < second);

        let q = HashEmbedder::new(64).embed_one("content");
        let result = index.search(&q, 10).await.unwrap();
        assert!(!result.is_empty());
        assert!(result.chunks.iter().all(|c| c.source == "new.txt"));
        assert_eq!(index.build_info().await.unwrap(), Some(hash_info()));
    }

    #[tokio::test]
    async fn test_keeps_live_and_previous_generation() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteIndex::open(dir.path()).await.unwrap();

        let mut names = Vec::new();
        for text in ["first build", "second build", "third build"] {
            index.upsert(hash_info(), build("a.txt", text)).await.unwrap();
            names.push(index.generation().await.unwrap());
        }

        assert_eq!(generation_files(dir.path()), vec![names[1].clone(), names[2].clone()]);
    }

    #[tokio::test]
    async fn test_reopen_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let entries = build("doc.txt", "CSS is a style sheet language used for presentation.");
        let expected = entries.len();
        {
            let index = SqliteIndex::open(dir.path()).await.unwrap();
            index.upsert(hash_info(), entries).await.unwrap();
            index.close().await;
        }

        let reopened = SqliteIndex::open(dir.path()).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), expected);
        assert_eq!(reopened.build_info().await.unwrap(), Some(hash_info()));
        let q = HashEmbedder::new(64).embed_one("style sheet");
        let result = reopened.search(&q, 1).await.unwrap();
        assert_eq!(result.chunks[0].source, "doc.txt");
    }

    #[tokio::test]
    async fn test_open_removes_only_superseded_generations() {
        let dir = tempfile::tempdir().unwrap();
        let live = {
            let index = SqliteIndex::open(dir.path()).await.unwrap();
            index.upsert(hash_info(), build("a.txt", "one")).await.unwrap();
            index.upsert(hash_info(), build("a.txt", "two")).await.unwrap();
            let live = index.generation().await.unwrap();
            index.close().await;
            live
        };
        let previous = generation_files(dir.path())[0].clone();

        // An orphan from long ago and a build another process is still writing
        let orphan = "gen-00000000-0000-7000-8000-000000000000.sqlite";
        let in_flight = "gen-ffffffff-ffff-7fff-bfff-ffffffffffff.sqlite";
        std::fs::write(dir.path().join(orphan), b"partial").unwrap();
        std::fs::write(dir.path().join(in_flight), b"partial").unwrap();

        let index = SqliteIndex::open(dir.path()).await.unwrap();
        assert_eq!(index.generation().await.unwrap(), live);
        assert_eq!(
            generation_files(dir.path()),
            vec![previous, live, in_flight.to_string()]
        );
    }

    #[tokio::test]
    async fn test_handles_follow_builds_from_other_handles() {
        let dir = tempfile::tempdir().unwrap();
        let reader = SqliteIndex::open(dir.path()).await.unwrap();
        let writer = SqliteIndex::open(dir.path()).await.unwrap();
        let q = HashEmbedder::new(64).embed_one("content");

        writer
            .upsert(hash_info(), build("old.txt", "old content about tables"))
            .await
            .unwrap();
        let result = reader.search(&q, 10).await.unwrap();
        assert!(result.chunks.iter().all(|c| c.source == "old.txt"));

        writer
            .upsert(hash_info(), build("new.txt", "new content about selectors"))
            .await
            .unwrap();
        let result = reader.search(&q, 10).await.unwrap();
        assert!(!result.is_empty());
        assert!(result.chunks.iter().all(|c| c.source == "new.txt"));
        assert_eq!(reader.generation().await, writer.generation().await);

        writer.clear().await.unwrap();
        assert_eq!(reader.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_install_keeps_previous_build() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteIndex::open(dir.path()).await.unwrap();
        index
            .upsert(hash_info(), build("old.txt", "old content about tables"))
            .await
            .unwrap();
        let live = index.generation().await.unwrap();
        let count = index.len().await.unwrap();

        // CURRENT cannot be rewritten while its temp path is a directory
        std::fs::create_dir(dir.path().join(CURRENT_TMP)).unwrap();
        let err = index
            .upsert(hash_info(), build("new.txt", "new content about selectors"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::IndexWrite(_)));

        assert_eq!(index.generation().await.unwrap(), live);
        assert_eq!(index.len().await.unwrap(), count);
        assert_eq!(generation_files(dir.path()), vec![live]);
    }

    #[tokio::test]
    async fn test_clear_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteIndex::open(dir.path()).await.unwrap();
        index.upsert(hash_info(), build("a.txt", "some text")).await.unwrap();
        index.upsert(hash_info(), build("a.txt", "more text")).await.unwrap();
        index.clear().await.unwrap();

        assert_eq!(index.len().await.unwrap(), 0);
        assert!(generation_files(dir.path()).is_empty());
        assert!(!dir.path().join(CURRENT_FILE).exists());
    }

    #[tokio::test]
    async fn test_concurrent_search_sees_whole_builds() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(SqliteIndex::open(dir.path()).await.unwrap());
        let a = build("a.txt", &"alpha beta gamma delta ".repeat(20));
        let b = build("b.txt", &"epsilon zeta eta theta ".repeat(20));
        index.upsert(hash_info(), a.clone()).await.unwrap();

        let reader = {
            let index = Arc::clone(&index);
            tokio::spawn(async move {
                let q = HashEmbedder::new(64).embed_one("alpha epsilon");
                for _ in 0..20 {
                    let result = index.search(&q, 100).await.unwrap();
                    let first = &result.chunks[0].source;
                    assert!(result.chunks.iter().all(|c| &c.source == first));
                }
            })
        };

        for i in 0..5 {
            let next = if i % 2 == 0 { b.clone() } else { a.clone() };
            index.upsert(hash_info(), next).await.unwrap();
        }
        reader.await.unwrap();
    }
}
