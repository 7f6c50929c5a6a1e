//! Errors raised by the core crate.
//!
//! The application crate folds these into its own error taxonomy.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Bad chunking or retrieval parameters.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The embedding backend could not be reached or loaded.
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The index storage rejected a rebuild.
    #[error("Index write failed: {0}")]
    IndexWrite(String),

    /// The index storage could not be read.
    #[error("Index read failed: {0}")]
    IndexRead(String),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
