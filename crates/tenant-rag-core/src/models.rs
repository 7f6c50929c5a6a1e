//! Data types that flow from the chunker, through the embedding step,
//! into a per-app vector index, and back out as retrieval results.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// A contiguous slice of one document's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic UUID derived from the source filename and ordinal.
    pub id: String,
    /// Filename of the document this chunk was cut from.
    pub source: String,
    /// Position of the chunk within its document, starting at 0.
    pub ordinal: i64,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// A chunk paired with its embedding, as stored in a vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    /// Position of the chunk in the build order across all documents.
    /// Used as the ranking tie-break (earlier wins).
    pub position: i64,
}

impl IndexEntry {
    /// Pair chunks with vectors, assigning build positions in input order.
    pub fn from_parts(chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Vec<IndexEntry> {
        chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (chunk, vector))| IndexEntry {
                chunk,
                vector,
                position: i as i64,
            })
            .collect()
    }
}

/// The embedding model that produced an index build.
///
/// Stored alongside every build so a query embedded by a different model
/// is rejected instead of being scored against incomparable vectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub model: String,
    pub dims: usize,
}

impl BuildInfo {
    pub fn new(model: impl Into<String>, dims: usize) -> Self {
        Self {
            model: model.into(),
            dims,
        }
    }

    /// Fail with `InvalidConfig` unless queries from `model` with `dims`
    /// dimensions can be searched against this build.
    pub fn ensure_compatible(&self, model: &str, dims: usize) -> CoreResult<()> {
        if self.model != model || self.dims != dims {
            return Err(CoreError::InvalidConfig(format!(
                "index was built with embedding model '{}' ({} dims) but the provider is '{}' ({} dims); retrain the app",
                self.model, self.dims, model, dims
            )));
        }
        Ok(())
    }
}

/// One passage returned by a vector search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub source: String,
    /// Cosine similarity to the query, in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Passages ordered by descending relevance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Distinct source filenames, in ranking order.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for c in &self.chunks {
            if !sources.iter().any(|s| s == &c.source) {
                sources.push(c.source.clone());
            }
        }
        sources
    }
}
