//! Training pipeline: stored documents → chunks → embeddings → index.
//!
//! ```text
//! train(app_id)
//!   ├── preconditions (no state change on failure)
//!   │     AppNotFound · NoDocuments · TrainingInProgress
//!   ├── CREATED|READY|FAILED → INDEXING   (one conditional UPDATE)
//!   ├── read + chunk every document (filename order)
//!   ├── embed all chunk texts
//!   ├── upsert into the app's index (atomic swap)
//!   └── READY with counts, or FAILED with the reason
//!         (written only while the app is still INDEXING)
//! ```
//!
//! The `INDEXING` status is the per-app lock: a second `train` call or a
//! `chat` call sees it before any work begins. A failed run leaves the
//! previous build in the index.

use chrono::Utc;
use tracing::{debug, error, info, warn};

use tenant_rag_core::chunk::chunk_text;
use tenant_rag_core::models::{BuildInfo, IndexEntry};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::meta::list_indexing;
use crate::models::{AppStatus, TrainReport};

/// Reason recorded on apps found `INDEXING` at startup.
pub const INTERRUPTED_REASON: &str = "training interrupted";

struct Build {
    documents: usize,
    chunks: usize,
}

impl Engine {
    /// Rebuild an app's index from all of its stored documents.
    pub async fn train(&self, app_id: &str) -> Result<TrainReport> {
        let app_id = app_id.to_ascii_lowercase();
        let mut app = self.require_app(&app_id).await?;

        if self.docs.list(&app_id).await?.is_empty() {
            return Err(Error::NoDocuments(app_id));
        }
        if app.status == AppStatus::Indexing {
            return Err(Error::TrainingInProgress(app_id));
        }
        if !self.meta.begin_training(&app_id).await? {
            return match self.meta.get(&app_id).await? {
                Some(_) => Err(Error::TrainingInProgress(app_id)),
                None => Err(Error::AppNotFound(app_id)),
            };
        }

        info!(app_id = %app_id, "training started");
        let result = self.build_index(&app_id).await;
        app.updated_at = Utc::now();

        let err = match result {
            Ok(build) => {
                app.status = AppStatus::Ready;
                app.last_trained_at = Some(app.updated_at);
                app.document_count = build.documents as i64;
                app.chunk_count = build.chunks as i64;
                app.failure_reason = None;

                match self.meta.finish_training(&app).await {
                    Ok(true) => {
                        info!(
                            app_id = %app_id,
                            documents = build.documents,
                            chunks = build.chunks,
                            "training complete"
                        );
                        return Ok(TrainReport {
                            app_id,
                            documents: build.documents,
                            chunks: build.chunks,
                            status: AppStatus::Ready,
                        });
                    }
                    Ok(false) => return Err(self.outcome_discarded(&app_id).await),
                    Err(err) => err,
                }
            }
            Err(err) => err,
        };

        // Best effort: an app must not stay INDEXING once its run is over
        app.status = AppStatus::Failed;
        app.failure_reason = Some(err.to_string());
        if let Err(write_err) = self.meta.finish_training(&app).await {
            error!(app_id = %app_id, error = %write_err, "could not record failed training");
        }

        warn!(app_id = %app_id, error = %err, "training failed");
        Err(err)
    }

    /// Error for a run whose app left `INDEXING` before the outcome landed.
    async fn outcome_discarded(&self, app_id: &str) -> Error {
        match self.meta.get(app_id).await {
            Ok(Some(app)) => {
                warn!(app_id, status = %app.status, "app changed during training; result discarded");
                Error::Other(format!(
                    "Training result for app '{}' discarded: status changed to {} during the run",
                    app_id, app.status
                ))
            }
            Ok(None) => Error::AppNotFound(app_id.to_string()),
            Err(err) => err,
        }
    }

    async fn build_index(&self, app_id: &str) -> Result<Build> {
        let filenames = self.docs.list(app_id).await?;
        let chunking = &self.config.chunking;

        let mut chunks = Vec::new();
        for filename in &filenames {
            let text = self.docs.read_text(app_id, filename).await?;
            let doc_chunks = chunk_text(filename, &text, chunking.size, chunking.overlap)?;
            debug!(app_id, filename = %filename, chunks = doc_chunks.len(), "chunked document");
            chunks.extend(doc_chunks);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(&texts).await?
        };
        if vectors.len() != texts.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "provider returned {} vectors for {} chunks",
                vectors.len(),
                texts.len()
            )));
        }
        debug!(app_id, vectors = vectors.len(), model = self.embedder.model_name(), "embedded chunks");

        let dims = vectors.first().map_or(self.embedder.dims(), |v| v.len());
        let info = BuildInfo::new(self.embedder.model_name(), dims);

        // Never recreate the index of an app removed while embedding
        self.require_app(app_id).await?;

        let total = chunks.len();
        let index = self.indexes.get_or_create(app_id).await?;
        index.upsert(info, IndexEntry::from_parts(chunks, vectors)).await?;

        Ok(Build {
            documents: filenames.len(),
            chunks: total,
        })
    }

    /// Mark apps left `INDEXING` by a previous process as `FAILED`.
    ///
    /// Call once at startup, before serving requests. Returns the ids of
    /// the apps that were recovered.
    pub async fn recover_interrupted(&self) -> Result<Vec<String>> {
        let mut recovered = Vec::new();
        for mut app in list_indexing(self.meta.as_ref()).await? {
            app.status = AppStatus::Failed;
            app.failure_reason = Some(INTERRUPTED_REASON.to_string());
            app.updated_at = Utc::now();
            if !self.meta.finish_training(&app).await? {
                continue;
            }

            warn!(app_id = %app.app_id, "interrupted training marked as failed");
            recovered.push(app.app_id);
        }
        Ok(recovered)
    }
}
