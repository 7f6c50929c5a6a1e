//! Per-app document file storage.
//!
//! Uploaded source files live under `<storage.root>/apps/<app_id>/files/`.
//! Only flat `.txt` and `.md` files are accepted; the filename is the
//! document's identity inside its app.

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::models::DocumentRecord;

/// File extensions accepted for upload, lowercase.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md"];

/// Raw document storage for all apps.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Filenames stored for `app_id`, sorted ascending.
    async fn list(&self, app_id: &str) -> Result<Vec<String>>;

    /// Read a stored file as UTF-8 text. Fails with `Decode` on invalid bytes.
    async fn read_text(&self, app_id: &str, filename: &str) -> Result<String>;

    /// Store (or overwrite) a file and describe what was written.
    async fn save(&self, app_id: &str, filename: &str, bytes: &[u8]) -> Result<DocumentRecord>;

    /// Remove every file of `app_id`.
    async fn remove_app(&self, app_id: &str) -> Result<()>;
}

/// Check that `filename` is a bare `.txt`/`.md` name.
pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty()
        || filename.starts_with('.')
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains('\0')
    {
        return Err(Error::UnsupportedFile(format!(
            "invalid filename '{}'",
            filename
        )));
    }

    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(Error::UnsupportedFile(format!(
            "'{}' is not supported. Allowed: .txt, .md",
            filename
        )));
    }

    Ok(())
}

/// Hex SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Filesystem implementation of [`DocumentStore`].
pub struct FsDocumentStore {
    apps_dir: PathBuf,
}

impl FsDocumentStore {
    /// `apps_dir` is `<storage.root>/apps`.
    pub fn new(apps_dir: impl Into<PathBuf>) -> Self {
        Self {
            apps_dir: apps_dir.into(),
        }
    }

    pub fn files_dir(&self, app_id: &str) -> PathBuf {
        self.apps_dir.join(app_id).join("files")
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn list(&self, app_id: &str) -> Result<Vec<String>> {
        let dir = self.files_dir(app_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if validate_filename(&name).is_ok() {
                names.push(name);
            }
        }

        // Sort for deterministic chunk order
        names.sort();
        Ok(names)
    }

    async fn read_text(&self, app_id: &str, filename: &str) -> Result<String> {
        let bytes = tokio::fs::read(self.files_dir(app_id).join(filename)).await?;
        String::from_utf8(bytes).map_err(|e| Error::Decode {
            filename: filename.to_string(),
            reason: e.utf8_error().to_string(),
        })
    }

    async fn save(&self, app_id: &str, filename: &str, bytes: &[u8]) -> Result<DocumentRecord> {
        validate_filename(filename)?;

        let dir = self.files_dir(app_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(filename), bytes).await?;

        Ok(DocumentRecord {
            app_id: app_id.to_string(),
            filename: filename.to_string(),
            size_bytes: bytes.len() as i64,
            sha256: sha256_hex(bytes),
            uploaded_at: Utc::now(),
        })
    }

    async fn remove_app(&self, app_id: &str) -> Result<()> {
        let dir = self.files_dir(app_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
