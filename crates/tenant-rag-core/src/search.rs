//! Nearest-neighbour ranking shared by every vector index backend.
//!
//! The metric is cosine similarity. Results are ordered by score
//! (descending), then by build position (ascending), so equal scores keep
//! the order in which chunks were produced during training. Every backend
//! funnels its candidates through [`rank`], which keeps ordering identical
//! across the in-memory and SQLite indexes.

use std::cmp::Ordering;

use crate::embedding::cosine_similarity;
use crate::error::{CoreError, CoreResult};
use crate::models::{RetrievalResult, RetrievedChunk};

/// Number of passages retrieved when the caller does not say otherwise.
pub const DEFAULT_TOP_K: usize = 3;

/// A stored chunk as seen by the ranker.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub text: &'a str,
    pub source: &'a str,
    pub vector: &'a [f32],
    pub position: i64,
}

/// Reject `k == 0`.
pub fn validate_top_k(k: usize) -> CoreResult<()> {
    if k == 0 {
        return Err(CoreError::InvalidConfig("top_k must be >= 1".to_string()));
    }
    Ok(())
}

/// Score every candidate against `query` and keep the best `k`.
///
/// Every candidate vector must have the query's dimensions.
pub fn rank<'a, I>(candidates: I, query: &[f32], k: usize) -> CoreResult<RetrievalResult>
where
    I: IntoIterator<Item = Candidate<'a>>,
{
    validate_top_k(k)?;

    let mut scored: Vec<(f32, Candidate<'a>)> = Vec::new();
    for c in candidates {
        if c.vector.len() != query.len() {
            return Err(CoreError::InvalidConfig(format!(
                "query has {} dimensions but the index stores {}",
                query.len(),
                c.vector.len()
            )));
        }
        scored.push((cosine_similarity(query, c.vector), c));
    }

    scored.sort_by(|(sa, a), (sb, b)| {
        sb.partial_cmp(sa)
            .unwrap_or(Ordering::Equal)
            .then(a.position.cmp(&b.position))
    });
    scored.truncate(k);

    Ok(RetrievalResult {
        chunks: scored
            .into_iter()
            .map(|(score, c)| RetrievedChunk {
                text: c.text.to_string(),
                source: c.source.to_string(),
                score,
            })
            .collect(),
    })
}
