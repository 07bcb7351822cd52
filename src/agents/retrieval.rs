//! Retrieval agent: `CONTEXT_REQUEST` → `CONTEXT_RESPONSE`.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use agentic_rag_core::embedding::Embedder;
use agentic_rag_core::models::{RetrievalResult, RetrievedChunk};
use agentic_rag_core::protocol::{AgentName, ContextResponse, ErrorPayload, Message, Payload};
use agentic_rag_core::store::VectorIndex;
use agentic_rag_core::RagError;

use super::{embed_with_timeout, reply_with, unsupported, Agent};

pub struct RetrievalAgent {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    call_timeout: Duration,
}

impl RetrievalAgent {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>, call_timeout: Duration) -> Self {
        Self {
            index,
            embedder,
            call_timeout,
        }
    }

    /// Embed `query` and return the `top_k` nearest chunks, best first.
    ///
    /// An empty index answers with `no_context = true` without calling the
    /// embedder.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<ContextResponse, RagError> {
        if self.index.is_empty() {
            return Ok(ContextResponse {
                results: RetrievalResult::default(),
                no_context: true,
            });
        }

        let embedding = embed_with_timeout(self.embedder.as_ref(), query, self.call_timeout).await?;
        let hits = self.index.search(&embedding, top_k)?;

        let items: Vec<RetrievedChunk> = hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                chunk_id: hit.entry.chunk_id.clone(),
                document_id: hit.entry.document_id.clone(),
                text: hit.entry.text.clone(),
                score: hit.score,
            })
            .collect();
        let results = RetrievalResult::new(items);
        tracing::debug!(hits = results.len(), top_k, "retrieved context");

        Ok(ContextResponse {
            no_context: results.is_empty(),
            results,
        })
    }
}

#[async_trait]
impl Agent for RetrievalAgent {
    fn name(&self) -> AgentName {
        AgentName::Retrieval
    }

    async fn handle(&self, message: Message) -> Message {
        match message.payload() {
            Payload::ContextRequest(req) => {
                let outcome = self
                    .retrieve(&req.query, req.top_k)
                    .await
                    .map(Payload::ContextResponse)
                    .map_err(|e| {
                        tracing::warn!(error = %e, "retrieval failed");
                        ErrorPayload::from_error(&e)
                    });
                reply_with(&message, self.name(), outcome)
            }
            _ => unsupported(&message, self.name()),
        }
    }
}
