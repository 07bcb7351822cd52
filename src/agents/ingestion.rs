//! Ingestion agent: `INGEST_REQUEST` → `INGEST_RESPONSE`.
//!
//! Pipeline per document: parse → chunk → embed and insert each chunk.
//! Ingestion is atomic per document: if any step fails after the first
//! insert, every entry already written for the document is removed again
//! and the ERROR reports how many were rolled back.
//!
//! A dimension mismatch means the embedder and the index disagree, which
//! no later document can fix. The agent then refuses every request with
//! `IngestionHalted` until [`reset`](IngestionAgent::reset).

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use agentic_rag_core::chunk::chunk_text;
use agentic_rag_core::embedding::Embedder;
use agentic_rag_core::models::{Document, DocumentInfo};
use agentic_rag_core::parse::FormatParser;
use agentic_rag_core::protocol::{
    AgentName, ErrorPayload, IngestRequest, IngestResponse, Message, Payload,
};
use agentic_rag_core::store::VectorIndex;
use agentic_rag_core::RagError;

use super::{embed_with_timeout, reply_with, unsupported, Agent};

/// Why a document was not ingested, and what was undone.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestFailure {
    pub error: RagError,
    pub rolled_back: usize,
}

impl From<RagError> for IngestFailure {
    fn from(error: RagError) -> Self {
        Self {
            error,
            rolled_back: 0,
        }
    }
}

pub struct IngestionAgent {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    parser: Arc<dyn FormatParser>,
    chunk_size: usize,
    overlap: usize,
    call_timeout: Duration,
    halted: Mutex<Option<String>>,
    catalog: Mutex<Vec<DocumentInfo>>,
}

impl IngestionAgent {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        parser: Arc<dyn FormatParser>,
        chunk_size: usize,
        overlap: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            index,
            embedder,
            parser,
            chunk_size,
            overlap,
            call_timeout,
            halted: Mutex::new(None),
            catalog: Mutex::new(Vec::new()),
        }
    }

    pub async fn ingest(&self, req: &IngestRequest) -> Result<IngestResponse, IngestFailure> {
        if let Some(reason) = self.halt_reason() {
            return Err(RagError::IngestionHalted(reason).into());
        }
        if self.is_cataloged(&req.document_id) {
            return Err(RagError::InvalidArgument(format!(
                "document {} was already ingested",
                req.document_id
            ))
            .into());
        }

        let generation = self.index.generation();

        let text = self.parser.parse(&req.content, &req.format)?;
        if text.trim().is_empty() {
            return Err(RagError::ParseFailure(format!(
                "{} contains no extractable text",
                req.filename
            ))
            .into());
        }
        let document = Document {
            id: req.document_id.clone(),
            filename: req.filename.clone(),
            format: req.format.clone(),
            text,
            ingested_at: Utc::now(),
        };

        let chunks = chunk_text(&document.id, &document.text, self.chunk_size, self.overlap)?;
        tracing::debug!(
            document = %document.filename,
            chunks = chunks.len(),
            "parsed and chunked"
        );

        for chunk in &chunks {
            let step = async {
                let embedding =
                    embed_with_timeout(self.embedder.as_ref(), &chunk.text, self.call_timeout)
                        .await?;
                self.index.insert_in_generation(generation, chunk, embedding)
            };
            if let Err(error) = step.await {
                return Err(self.roll_back(&document, error));
            }
        }

        let mut catalog = self.catalog.lock().unwrap_or_else(PoisonError::into_inner);
        if self.index.generation() != generation {
            drop(catalog);
            return Err(self.roll_back(&document, RagError::IndexReset(document.id.clone())));
        }
        catalog.push(DocumentInfo {
            id: document.id.clone(),
            filename: document.filename.clone(),
            format: document.format.clone(),
            chunk_count: chunks.len(),
            text_chars: document.text.chars().count(),
            ingested_at: document.ingested_at,
        });
        drop(catalog);

        tracing::info!(
            document = %document.filename,
            chunks = chunks.len(),
            "document indexed"
        );
        Ok(IngestResponse {
            document_id: document.id,
            chunk_count: chunks.len(),
        })
    }

    fn roll_back(&self, document: &Document, error: RagError) -> IngestFailure {
        let rolled_back = self.index.remove_document(&document.id);
        if let RagError::DimensionMismatch { expected, actual } = &error {
            let reason = format!(
                "embedder produced {}-dimensional vectors for a {}-dimensional index",
                actual, expected
            );
            tracing::error!(reason = %reason, "halting ingestion");
            *self.halted.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
        }
        tracing::warn!(
            document = %document.filename,
            error = %error,
            rolled_back,
            "ingestion failed; document rolled back"
        );
        IngestFailure { error, rolled_back }
    }

    fn halt_reason(&self) -> Option<String> {
        self.halted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_halted(&self) -> bool {
        self.halt_reason().is_some()
    }

    fn is_cataloged(&self, document_id: &str) -> bool {
        self.catalog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|d| d.id == document_id)
    }

    /// Successfully ingested documents, in completion order.
    pub fn documents(&self) -> Vec<DocumentInfo> {
        self.catalog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn supported_formats(&self) -> Vec<&'static str> {
        self.parser.supported_formats()
    }

    /// Forget every document and lift a halt. The index itself is reset
    /// by its owner.
    pub fn reset(&self) {
        self.catalog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.halted.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[async_trait]
impl Agent for IngestionAgent {
    fn name(&self) -> AgentName {
        AgentName::Ingestion
    }

    async fn handle(&self, message: Message) -> Message {
        match message.payload() {
            Payload::IngestRequest(req) => {
                let outcome = self
                    .ingest(req)
                    .await
                    .map(Payload::IngestResponse)
                    .map_err(|failure| {
                        ErrorPayload::from_error(&failure.error)
                            .for_document(req.document_id.clone(), failure.rolled_back)
                    });
                reply_with(&message, self.name(), outcome)
            }
            _ => unsupported(&message, self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentic_rag_core::embedding::SimilarityMetric;
    use agentic_rag_core::protocol::TraceId;
    use agentic_rag_core::{ServiceError, ServiceErrorKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::parser::DocumentParser;

    /// Fixed-length vectors; fails on the chunk containing `poison`.
    struct FlakyEmbedder {
        dims: usize,
        poison: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl FlakyEmbedder {
        fn new(dims: usize, poison: Option<&'static str>) -> Self {
            Self {
                dims,
                poison,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn model_name(&self) -> &str {
            "flaky"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(p) = self.poison {
                if text.contains(p) {
                    return Err(ServiceError::new(ServiceErrorKind::Unavailable, "boom"));
                }
            }
            Ok(vec![1.0; self.dims])
        }
    }

    fn agent(index_dims: usize, embedder: FlakyEmbedder) -> (Arc<VectorIndex>, IngestionAgent) {
        let index = Arc::new(VectorIndex::create(index_dims, SimilarityMetric::Cosine).unwrap());
        let agent = IngestionAgent::new(
            Arc::clone(&index),
            Arc::new(embedder),
            Arc::new(DocumentParser),
            500,
            50,
            Duration::from_secs(1),
        );
        (index, agent)
    }

    fn request(id: &str, filename: &str, content: &str) -> IngestRequest {
        IngestRequest {
            document_id: id.to_string(),
            filename: filename.to_string(),
            format: agentic_rag_core::parse::format_tag(filename),
            content: content.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_ingests_1100_chars_as_three_chunks() {
        let (index, agent) = agent(4, FlakyEmbedder::new(4, None));
        let resp = agent.ingest(&request("d1", "a.txt", &"x".repeat(1100))).await.unwrap();
        assert_eq!(resp.chunk_count, 3);
        assert_eq!(index.len(), 3);
        assert_eq!(agent.documents()[0].chunk_count, 3);
    }

    #[tokio::test]
    async fn test_unsupported_format_touches_nothing() {
        let (index, agent) = agent(4, FlakyEmbedder::new(4, None));
        let failure = agent.ingest(&request("d1", "a.xyz", "data")).await.unwrap_err();
        assert!(matches!(failure.error, RagError::UnsupportedFormat(_)));
        assert_eq!(failure.rolled_back, 0);
        assert!(index.is_empty());
        assert!(!agent.is_halted());
    }

    #[tokio::test]
    async fn test_embedding_failure_rolls_back_document() {
        let text = format!("{}{}", "a".repeat(900), "POISON".repeat(20));
        let (index, agent) = agent(4, FlakyEmbedder::new(4, Some("POISON")));
        agent.ingest(&request("keep", "k.txt", "safe text")).await.unwrap();

        let failure = agent.ingest(&request("d2", "b.txt", &text)).await.unwrap_err();
        assert!(matches!(failure.error, RagError::EmbeddingService(_)));
        assert!(failure.rolled_back >= 1);
        assert_eq!(index.document_count("d2"), 0);
        assert_eq!(index.document_count("keep"), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_halts_until_reset() {
        let (index, agent) = agent(4, FlakyEmbedder::new(3, None));
        let failure = agent.ingest(&request("d1", "a.txt", "hello")).await.unwrap_err();
        assert!(matches!(failure.error, RagError::DimensionMismatch { .. }));
        assert!(agent.is_halted());

        let failure = agent.ingest(&request("d2", "b.txt", "hello")).await.unwrap_err();
        assert!(matches!(failure.error, RagError::IngestionHalted(_)));
        assert!(index.is_empty());

        agent.reset();
        assert!(!agent.is_halted());
    }

    #[tokio::test]
    async fn test_blank_document_is_parse_failure() {
        let (_, agent) = agent(4, FlakyEmbedder::new(4, None));
        let failure = agent.ingest(&request("d1", "a.md", "  \n ")).await.unwrap_err();
        assert!(matches!(failure.error, RagError::ParseFailure(_)));
    }

    #[tokio::test]
    async fn test_duplicate_document_id_rejected() {
        let (index, agent) = agent(4, FlakyEmbedder::new(4, None));
        agent.ingest(&request("d1", "a.txt", "one")).await.unwrap();
        let failure = agent.ingest(&request("d1", "a.txt", "one")).await.unwrap_err();
        assert!(matches!(failure.error, RagError::InvalidArgument(_)));
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_error_reply_carries_document_and_trace() {
        let (_, agent) = agent(4, FlakyEmbedder::new(4, None));
        let msg = Message::request(
            AgentName::Coordinator,
            AgentName::Ingestion,
            TraceId::from("trace-i"),
            Payload::IngestRequest(request("d9", "slides.key", "??")),
        )
        .unwrap();
        let reply = agent.handle(msg).await;
        assert_eq!(reply.trace_id().as_str(), "trace-i");
        match reply.into_payload() {
            Payload::Error(err) => {
                assert_eq!(err.document_id.as_deref(), Some("d9"));
                assert_eq!(err.kind, agentic_rag_core::ErrorKind::UnsupportedFormat);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
