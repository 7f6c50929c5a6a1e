//! Error taxonomy for tenant-rag operations.
//!
//! Precondition errors (`InvalidConfig`, `NoDocuments`, `TrainingInProgress`,
//! `AppNotFound`, `AppNotReady`, and the request validation variants) are
//! returned before any state changes. Runtime training errors
//! (`EmbeddingUnavailable`, `IndexWriteFailure`, `Decode`) are recorded on
//! the app as `FAILED` by the training pipeline and then returned.

use thiserror::Error;

use tenant_rag_core::CoreError;

use crate::models::AppStatus;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("No documents uploaded for app '{0}'. Please upload files first.")]
    NoDocuments(String),

    #[error("Training already in progress for app '{0}'")]
    TrainingInProgress(String),

    #[error("App '{0}' not found")]
    AppNotFound(String),

    #[error("App '{app_id}' is not trained yet. Status: {status}")]
    AppNotReady { app_id: String, status: AppStatus },

    #[error("Index write failed: {0}")]
    IndexWriteFailure(String),

    #[error("Index read failed: {0}")]
    IndexRead(String),

    #[error("Could not decode '{filename}' as UTF-8 text: {reason}")]
    Decode { filename: String, reason: String },

    #[error("Answer generation failed: {0}")]
    Generation(String),

    #[error("Invalid app id '{0}': use 2-50 letters, digits, and dashes")]
    InvalidAppId(String),

    #[error("App '{0}' already exists")]
    AppAlreadyExists(String),

    #[error("Unsupported file: {0}")]
    UnsupportedFile(String),

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is a caller mistake rather than a system failure.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_)
                | Error::NoDocuments(_)
                | Error::TrainingInProgress(_)
                | Error::AppNotFound(_)
                | Error::AppNotReady { .. }
                | Error::InvalidAppId(_)
                | Error::AppAlreadyExists(_)
                | Error::UnsupportedFile(_)
                | Error::EmptyMessage
        )
    }
}

impl From<CoreError> for Error {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidConfig(msg) => Error::InvalidConfig(msg),
            CoreError::EmbeddingUnavailable(msg) => Error::EmbeddingUnavailable(msg),
            CoreError::IndexWrite(msg) => Error::IndexWriteFailure(msg),
            CoreError::IndexRead(msg) => Error::IndexRead(msg),
        }
    }
}

/// Result type alias for tenant-rag
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_map_to_taxonomy() {
        assert!(matches!(
            Error::from(CoreError::IndexWrite("disk full".into())),
            Error::IndexWriteFailure(_)
        ));
        assert!(matches!(
            Error::from(CoreError::EmbeddingUnavailable("no model".into())),
            Error::EmbeddingUnavailable(_)
        ));
        assert!(matches!(
            Error::from(CoreError::InvalidConfig("k".into())),
            Error::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_precondition_classification() {
        assert!(Error::NoDocuments("css".into()).is_precondition());
        assert!(Error::AppNotReady {
            app_id: "css".into(),
            status: AppStatus::Indexing
        }
        .is_precondition());
        assert!(!Error::EmbeddingUnavailable("x".into()).is_precondition());
        assert!(!Error::IndexWriteFailure("x".into()).is_precondition());
    }

    #[test]
    fn test_not_ready_message_names_status() {
        let e = Error::AppNotReady {
            app_id: "css".into(),
            status: AppStatus::Failed,
        };
        assert_eq!(e.to_string(), "App 'css' is not trained yet. Status: FAILED");
    }
}
