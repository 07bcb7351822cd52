//! Vector storage for Agentic RAG.
//!
//! The [`VectorIndex`] is an explicitly constructed, in-memory index that
//! is shared by reference (`Arc`) between the ingestion and retrieval
//! agents. There is no global instance.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`create`](VectorIndex::create) | Build an empty index for a dimension and metric |
//! | [`insert`](VectorIndex::insert) | Append one chunk embedding |
//! | [`search`](VectorIndex::search) | Top-k similarity search |
//! | [`remove_document`](VectorIndex::remove_document) | Roll back one document's entries |
//! | [`reset`](VectorIndex::reset) | Discard every entry |
//!
//! # Consistency
//!
//! Every operation runs under a single `RwLock`. A search holds the read
//! lock for its whole scan, so it observes exactly the inserts that
//! completed before it started. `reset` takes the write lock and is
//! therefore exclusive with all inserts and searches.

pub mod memory;

use std::sync::Arc;

use serde::Serialize;

use crate::embedding::SimilarityMetric;
use crate::models::IndexEntry;

pub use memory::VectorIndex;

/// An index entry paired with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: Arc<IndexEntry>,
    /// Higher is more similar. Range depends on the metric.
    pub score: f32,
}

/// Point-in-time summary of the index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub entries: usize,
    pub documents: usize,
    pub dimension: usize,
    pub metric: SimilarityMetric,
    /// Incremented on every reset.
    pub generation: u64,
}
