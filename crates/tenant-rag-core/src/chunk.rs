//! Fixed-window text chunker.
//!
//! Splits document text into overlapping [`Chunk`]s of `size` characters.
//! Splitting is length-based (no sentence or paragraph awareness) and counts
//! Unicode scalar values, so multi-byte text is never cut mid-character.
//!
//! Each chunk receives a deterministic UUID derived from its source filename
//! and ordinal, plus a SHA-256 hash of its text.
//!
//! # Algorithm
//!
//! 1. Reject `size == 0` or `overlap >= size`.
//! 2. Empty text yields no chunks.
//! 3. Emit the window `[start, start + size)`.
//! 4. If the window reached the end of the text, stop; otherwise the next
//!    window starts at `end - overlap`.
//!
//! Because every window after the first starts exactly `overlap` characters
//! before the previous one ended, dropping the first `overlap` characters of
//! each later chunk and concatenating reconstructs the input.
//!
//! # Example
//!
//! ```rust
//! use tenant_rag_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("doc1.txt", "CSS is a style sheet language.", 800, 120).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].ordinal, 0);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::Chunk;

/// Check chunking parameters without chunking anything.
pub fn validate_params(size: usize, overlap: usize) -> CoreResult<()> {
    if size == 0 {
        return Err(CoreError::InvalidConfig(
            "chunk size must be >= 1".to_string(),
        ));
    }
    if overlap >= size {
        return Err(CoreError::InvalidConfig(format!(
            "chunk overlap ({}) must be smaller than chunk size ({})",
            overlap, size
        )));
    }
    Ok(())
}

/// Split `text` into overlapping windows of `size` characters.
///
/// # Arguments
///
/// * `source`: Filename of the document, recorded on every chunk.
/// * `text`: The decoded document text.
/// * `size`: Target characters per chunk.
/// * `overlap`: Characters repeated at the start of the next chunk.
///
/// # Guarantees
///
/// - Ordinals are contiguous: `0, 1, 2, …, N-1`.
/// - Input of at most `size` characters yields exactly one chunk equal to it.
/// - Empty input yields an empty vector.
pub fn chunk_text(source: &str, text: &str, size: usize, overlap: usize) -> CoreResult<Vec<Chunk>> {
    validate_params(size, overlap)?;

    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every char, plus the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = bounds.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut ordinal: i64 = 0;

    loop {
        let end = (start + size).min(char_count);
        chunks.push(make_chunk(source, ordinal, &text[bounds[start]..bounds[end]]));
        ordinal += 1;
        if end == char_count {
            break;
        }
        start = end - overlap;
    }

    Ok(chunks)
}

/// Deterministic chunk id: UUID v5 over `source` and `ordinal`.
pub fn chunk_id(source: &str, ordinal: i64) -> String {
    let name = format!("{}#{}", source, ordinal);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

fn make_chunk(source: &str, ordinal: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_id(source, ordinal),
        source: source.to_string(),
        ordinal,
        text: text.to_string(),
        hash,
    }
}
