//! Retrieval and answer composition for chat requests.

use tracing::debug;

use crate::embedding::embed_query;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::models::{Answer, AppStatus, RetrievalResult};

impl Engine {
    /// Answer `message` from the app's documents.
    ///
    /// Only `READY` apps are queryable; chat never changes any state.
    pub async fn chat(&self, app_id: &str, message: &str) -> Result<Answer> {
        let message = message.trim();
        if message.is_empty() {
            return Err(Error::EmptyMessage);
        }

        let app_id = app_id.to_ascii_lowercase();
        let app = self.require_app(&app_id).await?;
        if app.status != AppStatus::Ready {
            return Err(Error::AppNotReady {
                app_id,
                status: app.status,
            });
        }

        let retrieval = self.retrieve(&app_id, message).await?;
        debug!(app_id = %app_id, passages = retrieval.len(), "retrieved passages");

        self.generator.generate(&app, message, &retrieval).await
    }

    /// Top-k passages of one app's index for `query`.
    ///
    /// Fails with `InvalidConfig` when the index was built by a different
    /// embedding model than the one configured now.
    pub async fn retrieve(&self, app_id: &str, query: &str) -> Result<RetrievalResult> {
        let vector = embed_query(self.embedder.as_ref(), query).await?;
        let index = self.indexes.get_or_create(app_id).await?;
        if let Some(info) = index.build_info().await? {
            info.ensure_compatible(self.embedder.model_name(), vector.len())?;
        }
        Ok(index.search(&vector, self.config.retrieval.top_k).await?)
    }
}
