//! The engine: one explicitly owned value holding every collaborator.
//!
//! [`Engine`] wires the metadata store, document storage, per-app index
//! manager, embedding provider, and answer generator together. App
//! administration lives here; training is in [`crate::train`] and chat in
//! [`crate::chat`], both as further `impl Engine` blocks.

use std::sync::Arc;

use tracing::info;

use tenant_rag_core::embedding::EmbeddingProvider;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::error::{Error, Result};
use crate::generate::AnswerGenerator;
use crate::index_manager::{IndexBackend, IndexManager};
use crate::meta::{MetaStore, Removal, SqliteMetaStore};
use crate::models::{AppRecord, DocumentRecord};
use crate::storage::{DocumentStore, FsDocumentStore};

const MIN_APP_ID_LEN: usize = 2;
const MAX_APP_ID_LEN: usize = 50;

/// Validate and lowercase a new app id.
///
/// Accepts 2-50 ASCII letters, digits, and dashes.
pub fn normalize_app_id(app_id: &str) -> Result<String> {
    let len = app_id.chars().count();
    let valid_chars = app_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if !valid_chars || !(MIN_APP_ID_LEN..=MAX_APP_ID_LEN).contains(&len) {
        return Err(Error::InvalidAppId(app_id.to_string()));
    }
    Ok(app_id.to_ascii_lowercase())
}

pub struct Engine {
    pub(crate) config: Config,
    pub(crate) meta: Arc<dyn MetaStore>,
    pub(crate) docs: Arc<dyn DocumentStore>,
    pub(crate) indexes: IndexManager,
    pub(crate) embedder: Arc<dyn EmbeddingProvider>,
    pub(crate) generator: AnswerGenerator,
}

impl Engine {
    /// Open storage under `config.storage.root` and build every component
    /// from configuration.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let embedder = create_provider(&config.embedding)?;
        let generator = AnswerGenerator::from_config(&config.generator)?;
        Self::with_components(config, embedder, generator).await
    }

    /// Like [`open`](Self::open) but with a caller-supplied embedding
    /// provider and answer generator.
    pub async fn with_components(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: AnswerGenerator,
    ) -> Result<Self> {
        config.validate()?;
        let backend = IndexBackend::parse(&config.index.backend)?;

        std::fs::create_dir_all(config.apps_dir())?;
        let meta = SqliteMetaStore::open(&config.metadata_path()).await?;

        info!(
            root = %config.storage.root.display(),
            embedder = embedder.model_name(),
            generator = generator.kind(),
            "engine ready"
        );

        Ok(Self {
            docs: Arc::new(FsDocumentStore::new(config.apps_dir())),
            indexes: IndexManager::new(config.apps_dir(), backend),
            meta: Arc::new(meta),
            embedder,
            generator,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    pub fn generator(&self) -> &AnswerGenerator {
        &self.generator
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    /// Load an app or fail with `AppNotFound`.
    pub(crate) async fn require_app(&self, app_id: &str) -> Result<AppRecord> {
        self.meta
            .get(app_id)
            .await?
            .ok_or_else(|| Error::AppNotFound(app_id.to_string()))
    }

    /// Register a new app in the `CREATED` state with an empty index.
    pub async fn create_app(&self, app_id: &str, name: &str) -> Result<AppRecord> {
        let app_id = normalize_app_id(app_id)?;
        if self.meta.get(&app_id).await?.is_some() {
            return Err(Error::AppAlreadyExists(app_id));
        }

        let name = match name.trim() {
            "" => app_id.as_str(),
            trimmed => trimmed,
        };
        let app = AppRecord::new(&app_id, name);

        std::fs::create_dir_all(self.config.apps_dir().join(&app_id).join("files"))?;
        self.indexes.get_or_create(&app_id).await?;
        self.meta.upsert(&app).await?;

        info!(app_id = %app.app_id, "app created");
        Ok(app)
    }

    pub async fn list_apps(&self) -> Result<Vec<AppRecord>> {
        self.meta.list().await
    }

    pub async fn get_app(&self, app_id: &str) -> Result<AppRecord> {
        self.require_app(&app_id.to_ascii_lowercase()).await
    }

    /// Remove an app's metadata, stored files, and index.
    ///
    /// Refused with `TrainingInProgress` while the app is indexing. The
    /// metadata row goes first in one conditional statement; storage is only
    /// touched once no training run can start or finish for the app.
    pub async fn delete_app(&self, app_id: &str) -> Result<()> {
        let app_id = app_id.to_ascii_lowercase();
        match self.meta.delete(&app_id).await? {
            Removal::Removed => {}
            Removal::Missing => return Err(Error::AppNotFound(app_id)),
            Removal::Indexing => return Err(Error::TrainingInProgress(app_id)),
        }

        self.indexes.delete(&app_id).await?;
        self.docs.remove_app(&app_id).await?;

        let app_dir = self.config.apps_dir().join(&app_id);
        match tokio::fs::remove_dir_all(&app_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(app_id = %app_id, "app deleted");
        Ok(())
    }

    /// Store one `.txt`/`.md` file for an app.
    ///
    /// Re-uploading a filename overwrites it. The new content is only
    /// searchable after the next training run.
    pub async fn upload(&self, app_id: &str, filename: &str, bytes: &[u8]) -> Result<DocumentRecord> {
        let app_id = app_id.to_ascii_lowercase();
        self.require_app(&app_id).await?;

        let record = self.docs.save(&app_id, filename, bytes).await?;
        self.meta.add_document(&record).await?;

        info!(app_id = %app_id, filename, bytes = bytes.len(), "document uploaded");
        Ok(record)
    }

    pub async fn list_documents(&self, app_id: &str) -> Result<Vec<DocumentRecord>> {
        let app_id = app_id.to_ascii_lowercase();
        self.require_app(&app_id).await?;
        self.meta.list_documents(&app_id).await
    }
}
