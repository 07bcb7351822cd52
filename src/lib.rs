//! # Agentic RAG
//!
//! Question answering over uploaded documents, split across cooperating
//! agents that talk only through typed messages.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────┐
//!   upload / query ─▶│ CoordinatorAgent │  state machine, trace ids, retries
//!                    └────────┬─────────┘
//!                             │ MessageBus (logged, per-trace spans)
//!          ┌──────────────────┼──────────────────┐
//!          ▼                  ▼                  ▼
//!   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!   │  Ingestion   │   │  Retrieval   │   │   Response   │
//!   │ parse+chunk  │   │ embed+search │   │ prompt+LLM   │
//!   └──────┬───────┘   └──────┬───────┘   └──────────────┘
//!          └────────▶ VectorIndex ◀───────┘
//! ```
//!
//! Chunking, the vector index, the message protocol and the service
//! traits live in the `agentic-rag-core` crate. This crate supplies the
//! agents, the provider clients, document parsing and the `arag` CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration |
//! | [`coordinator`] | Orchestration state machine |
//! | [`bus`] | Message routing and history |
//! | [`agents`] | Ingestion, retrieval and response agents |
//! | [`parser`] | PDF, PPTX, DOCX, CSV, TXT and MD text extraction |
//! | [`prompt`] | Context budgeting and prompt assembly |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Text generation providers |
//! | [`http`] | Shared HTTP client helpers |
//! | [`telemetry`] | `tracing` subscriber setup |
//! | [`cli`] | `arag` command implementations |

pub mod agents;
pub mod bus;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod embedding;
pub mod generation;
pub mod http;
pub mod parser;
pub mod prompt;
pub mod telemetry;

pub use agentic_rag_core as core;
