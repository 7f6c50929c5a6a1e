//! Records persisted by the metadata store and values returned by the
//! engine's operations.
//!
//! Chunk, index entry, and retrieval types live in `tenant-rag-core` and
//! are re-exported here so callers need a single import path.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub use tenant_rag_core::models::{Chunk, IndexEntry, RetrievalResult, RetrievedChunk};

/// Lifecycle state of an app.
///
/// ```text
/// CREATED ──train──▶ INDEXING ──ok──▶ READY
///                        │              │
///                        └──err──▶ FAILED
/// READY / FAILED ──train──▶ INDEXING
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppStatus {
    Created,
    Indexing,
    Ready,
    Failed,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Created => "CREATED",
            AppStatus::Indexing => "INDEXING",
            AppStatus::Ready => "READY",
            AppStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(AppStatus::Created),
            "INDEXING" => Ok(AppStatus::Indexing),
            "READY" => Ok(AppStatus::Ready),
            "FAILED" => Ok(AppStatus::Failed),
            other => Err(Error::Other(format!("unknown app status '{}'", other))),
        }
    }
}

/// One tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRecord {
    pub app_id: String,
    pub name: String,
    pub status: AppStatus,
    pub last_trained_at: Option<DateTime<Utc>>,
    pub document_count: i64,
    pub chunk_count: i64,
    /// Set when the last training run failed; cleared on success.
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppRecord {
    /// A fresh record in the `CREATED` state.
    pub fn new(app_id: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            app_id: app_id.to_string(),
            name: name.to_string(),
            status: AppStatus::Created,
            last_trained_at: None,
            document_count: 0,
            chunk_count: 0,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A stored source file belonging to one app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub app_id: String,
    pub filename: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Outcome of a successful training run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainReport {
    pub app_id: String,
    pub documents: usize,
    pub chunks: usize,
    pub status: AppStatus,
}

/// A chat reply and the files it was drawn from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    /// Distinct filenames in retrieval order.
    pub sources: Vec<String>,
}
