//! Sliding-window text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters.
//! Consecutive chunks share `overlap` characters so that a passage cut at a
//! window edge still appears whole in one of its neighbours.
//!
//! Each chunk receives a deterministic UUID derived from its document ID
//! and ordinal, plus a SHA-256 hash of its text.
//!
//! # Algorithm
//!
//! 1. Validate `chunk_size > 0` and `overlap < chunk_size`.
//! 2. Index the text by character (never by byte) so multi-byte UTF-8 is
//!    never split.
//! 3. Emit a window `[start, start + chunk_size)` clamped to the text end.
//! 4. Stop once a window reaches the end of the text; otherwise advance
//!    `start` by `chunk_size - overlap`.
//!
//! The final window may be shorter than `chunk_size`. It is always longer
//! than `overlap`, so every chunk after the first contributes new text.
//!
//! # Example
//!
//! ```rust
//! use agentic_rag_core::chunk::chunk_text;
//!
//! let text = "a".repeat(1100);
//! let chunks = chunk_text("doc-123", &text, 500, 50).unwrap();
//! assert_eq!(chunks.len(), 3);
//! assert_eq!(chunks[2].char_len(), 200);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{RagError, Result};
use crate::models::Chunk;

/// Namespace for chunk ids, so identical `(document, ordinal)` pairs map
/// to identical ids across runs.
const CHUNK_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_03c2_5b8e_4d8f_9c47_2e0b_71d5_a3e9);

/// Check chunker parameters without chunking anything.
pub fn validate_params(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::Configuration(
            "chunk_size must be > 0".to_string(),
        ));
    }
    if overlap >= chunk_size {
        return Err(RagError::Configuration(format!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }
    Ok(())
}

/// Split text into overlapping fixed-size windows.
///
/// # Arguments
///
/// * `document_id`: The parent document's id (stored on every chunk).
/// * `text`: The full document text.
/// * `chunk_size`: Maximum characters per chunk.
/// * `overlap`: Characters shared between consecutive chunks.
///
/// # Guarantees
///
/// - Empty text yields no chunks.
/// - Ordinals are contiguous: `0, 1, 2, …, N-1`.
/// - `chunks[0].text` followed by every later chunk's
///   [`fresh_text`](Chunk::fresh_text) reproduces `text` exactly.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    validate_params(chunk_size, overlap)?;

    // Byte offset of every char, plus the end of the string.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let total = bounds.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    bounds.push(text.len());

    let stride = chunk_size - overlap;
    let mut chunks = Vec::with_capacity(total.div_ceil(stride));
    let mut start = 0usize;

    loop {
        let end = (start + chunk_size).min(total);
        let span = &text[bounds[start]..bounds[end]];
        let ordinal = chunks.len();
        let shared = if ordinal == 0 { 0 } else { overlap };
        chunks.push(make_chunk(document_id, ordinal, span, shared, start));

        if end == total {
            break;
        }
        start += stride;
    }

    Ok(chunks)
}

/// Deterministic chunk id for a document position.
pub fn chunk_id(document_id: &str, ordinal: usize) -> String {
    let name = format!("{}:{}", document_id, ordinal);
    Uuid::new_v5(&CHUNK_NAMESPACE, name.as_bytes()).to_string()
}

fn make_chunk(document_id: &str, ordinal: usize, text: &str, overlap: usize, start: usize) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_id(document_id, ordinal),
        document_id: document_id.to_string(),
        ordinal,
        text: text.to_string(),
        overlap,
        start,
        hash,
    }
}

/// Rebuild the original text from its chunks.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        out.push_str(chunk.fresh_text());
    }
    out
}
