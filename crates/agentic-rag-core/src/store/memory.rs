//! In-memory [`VectorIndex`].
//!
//! Entries live in a `Vec` behind `std::sync::RwLock`, in insertion order.
//! Search is brute-force over all stored vectors, which is fine for the
//! document counts a single chat session sees.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::embedding::SimilarityMetric;
use crate::error::{RagError, Result};
use crate::models::{Chunk, IndexEntry};

use super::{IndexStats, ScoredEntry};

#[derive(Default)]
struct IndexState {
    entries: Vec<Arc<IndexEntry>>,
    next_seq: u64,
    generation: u64,
}

/// Append-only vector index with exclusive reset.
pub struct VectorIndex {
    dimension: usize,
    metric: SimilarityMetric,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    /// Create an empty index. The metric is fixed for the index lifetime.
    pub fn create(dimension: usize, metric: SimilarityMetric) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::Configuration(
                "index dimension must be > 0".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            metric,
            state: RwLock::new(IndexState::default()),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: len,
            });
        }
        Ok(())
    }

    /// Append an entry for `chunk`.
    ///
    /// Fails with [`RagError::DimensionMismatch`] without touching the
    /// index if the embedding has the wrong length.
    pub fn insert(&self, chunk: &Chunk, embedding: Vec<f32>) -> Result<IndexEntry> {
        self.check_dimension(embedding.len())?;
        let mut state = self.write();
        Ok(push_entry(&mut state, chunk, embedding))
    }

    /// Like [`insert`](Self::insert), but only if no reset happened since
    /// `generation` was observed.
    ///
    /// Lets a multi-chunk ingestion detect that a reset wiped its earlier
    /// chunks, instead of leaving a half-indexed document behind.
    pub fn insert_in_generation(
        &self,
        generation: u64,
        chunk: &Chunk,
        embedding: Vec<f32>,
    ) -> Result<IndexEntry> {
        self.check_dimension(embedding.len())?;
        let mut state = self.write();
        if state.generation != generation {
            return Err(RagError::IndexReset(chunk.document_id.clone()));
        }
        Ok(push_entry(&mut state, chunk, embedding))
    }

    /// Return up to `top_k` entries ranked by descending similarity.
    ///
    /// Ties keep insertion order (earlier wins). An empty index yields an
    /// empty result, not an error.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredEntry>> {
        if top_k == 0 {
            return Err(RagError::InvalidArgument(
                "top_k must be >= 1".to_string(),
            ));
        }
        self.check_dimension(query.len())?;

        let state = self.read();
        let mut scored: Vec<ScoredEntry> = state
            .entries
            .iter()
            .map(|entry| {
                let score = self.metric.score(query, &entry.embedding);
                ScoredEntry {
                    entry: Arc::clone(entry),
                    // `+ 0.0` folds -0.0 into 0.0 so equal scores compare equal.
                    score: if score.is_nan() { f32::MIN } else { score + 0.0 },
                }
            })
            .collect();
        drop(state);

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.entry.seq.cmp(&b.entry.seq))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Drop every entry belonging to `document_id`. Returns how many were removed.
    pub fn remove_document(&self, document_id: &str) -> usize {
        let mut state = self.write();
        let before = state.entries.len();
        state.entries.retain(|e| e.document_id != document_id);
        before - state.entries.len()
    }

    /// Discard all entries. Returns how many were removed.
    pub fn reset(&self) -> usize {
        let mut state = self.write();
        let removed = state.entries.len();
        state.entries.clear();
        state.generation += 1;
        removed
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Number of entries stored for one document.
    pub fn document_count(&self, document_id: &str) -> usize {
        self.read()
            .entries
            .iter()
            .filter(|e| e.document_id == document_id)
            .count()
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.read();
        let documents: HashSet<&str> = state
            .entries
            .iter()
            .map(|e| e.document_id.as_str())
            .collect();
        IndexStats {
            entries: state.entries.len(),
            documents: documents.len(),
            dimension: self.dimension,
            metric: self.metric,
            generation: state.generation,
        }
    }
}

fn push_entry(state: &mut IndexState, chunk: &Chunk, embedding: Vec<f32>) -> IndexEntry {
    let entry = IndexEntry {
        chunk_id: chunk.id.clone(),
        document_id: chunk.document_id.clone(),
        ordinal: chunk.ordinal,
        text: chunk.text.clone(),
        embedding,
        seq: state.next_seq,
    };
    state.next_seq += 1;
    state.entries.push(Arc::new(entry.clone()));
    entry
}
