//! Core data models used throughout Agentic RAG.
//!
//! These types represent the documents, chunks, index entries, and retrieval
//! results that flow between the agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A parsed document, ready for chunking.
///
/// Created by the ingestion agent once the format parser has produced
/// plain text. Never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub filename: String,
    /// Lower-case format tag, e.g. `"pdf"` or `"md"`.
    pub format: String,
    pub text: String,
    pub ingested_at: DateTime<Utc>,
}

/// A contiguous, possibly overlapping window of a document's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Position of this chunk within its document, starting at 0.
    pub ordinal: usize,
    pub text: String,
    /// Number of leading characters shared with the previous chunk.
    pub overlap: usize,
    /// Character offset of the first character in the document text.
    pub start: usize,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

impl Chunk {
    /// Length of the chunk in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// The part of the text not already covered by the previous chunk.
    pub fn fresh_text(&self) -> &str {
        match self.text.char_indices().nth(self.overlap) {
            Some((i, _)) => &self.text[i..],
            None => "",
        }
    }
}

/// The unit stored in the vector index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub text: String,
    pub embedding: Vec<f32>,
    /// Monotonic insertion sequence; earlier entries win score ties.
    pub seq: u64,
}

/// One ranked passage returned for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub score: f32,
}

/// Ranked passages for a single query, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetrievalResult {
    pub items: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn new(items: Vec<RetrievedChunk>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Distinct document ids in rank order.
    pub fn document_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for item in &self.items {
            if !ids.contains(&item.document_id) {
                ids.push(item.document_id.clone());
            }
        }
        ids
    }
}

/// A completed question/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// Conversation history for one chat session.
#[derive(Debug, Clone, Default)]
pub struct QuerySession {
    turns: Vec<Turn>,
}

impl QuerySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns[skip..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Catalog record kept for every successfully ingested document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub id: String,
    pub filename: String,
    pub format: String,
    pub chunk_count: usize,
    pub text_chars: usize,
    pub ingested_at: DateTime<Utc>,
}
