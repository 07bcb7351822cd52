//! # Agentic RAG Core
//!
//! Shared, runtime-agnostic logic for Agentic RAG: data models, chunking,
//! the in-memory vector index, the inter-agent message protocol, the error
//! taxonomy, and the embedding / generation / parsing traits.
//!
//! This crate contains no tokio, HTTP clients, filesystem I/O, or other
//! native-only dependencies. Agents, providers, and the CLI live in the
//! `agentic-rag` app crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod models;
pub mod parse;
pub mod protocol;
pub mod store;

pub use error::{ErrorKind, RagError, Result, ServiceError, ServiceErrorKind};
