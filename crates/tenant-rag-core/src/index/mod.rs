//! Per-app vector index abstraction.
//!
//! The [`VectorIndex`] trait defines the operations the training pipeline
//! and the chat service need from an app's index, enabling pluggable
//! backends (SQLite generation files in the app crate, in-memory here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes, and
//! must make [`upsert`](VectorIndex::upsert) atomic from every reader's
//! perspective: a concurrent [`search`](VectorIndex::search) observes either
//! the previous contents or the new contents, never a mixture.

pub mod memory;

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::models::{BuildInfo, IndexEntry, RetrievalResult};

/// Abstract vector index scoped to exactly one app.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Replace the entire contents with a new build |
/// | [`build_info`](VectorIndex::build_info) | Embedding model of the current build |
/// | [`search`](VectorIndex::search) | Top-k cosine search, ties broken by build position |
/// | [`clear`](VectorIndex::clear) | Drop all contents |
/// | [`len`](VectorIndex::len) | Number of stored entries |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replace everything in the index with `entries`, embedded by `info`.
    async fn upsert(&self, info: BuildInfo, entries: Vec<IndexEntry>) -> CoreResult<()>;

    /// Model and dimensions of the current build, `None` before the first.
    async fn build_info(&self) -> CoreResult<Option<BuildInfo>>;

    /// Return the `k` entries most similar to `query`, best first.
    ///
    /// Fails with `InvalidConfig` when `k == 0` or when `query` does not
    /// have the dimensions of the stored vectors.
    async fn search(&self, query: &[f32], k: usize) -> CoreResult<RetrievalResult>;

    /// Drop all contents.
    async fn clear(&self) -> CoreResult<()>;

    /// Number of entries in the current build.
    async fn len(&self) -> CoreResult<usize>;

    async fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len().await? == 0)
    }
}
