//! Protocol-speaking agents.
//!
//! Each agent owns one step of the pipeline and answers exactly one
//! request type. Dispatch is an explicit `match` on the closed
//! [`Payload`] set; anything else is answered with a `MalformedMessage`
//! ERROR carrying the request's trace id.
//!
//! | Agent | Handles | Replies |
//! |-------|---------|---------|
//! | [`IngestionAgent`] | `INGEST_REQUEST` | `INGEST_RESPONSE` / `ERROR` |
//! | [`RetrievalAgent`] | `CONTEXT_REQUEST` | `CONTEXT_RESPONSE` / `ERROR` |
//! | [`ResponseAgent`] | `RESPONSE_REQUEST` | `RESPONSE_COMPLETE` / `ERROR` |
//!
//! The [`CoordinatorAgent`](crate::coordinator::CoordinatorAgent) sends the
//! requests through the [`MessageBus`](crate::bus::MessageBus).

pub mod ingestion;
pub mod response;
pub mod retrieval;

use async_trait::async_trait;
use std::time::Duration;

use agentic_rag_core::embedding::Embedder;
use agentic_rag_core::generation::Generator;
use agentic_rag_core::protocol::{AgentName, ErrorPayload, Message, Payload};
use agentic_rag_core::{RagError, ServiceError};

pub use ingestion::IngestionAgent;
pub use response::ResponseAgent;
pub use retrieval::RetrievalAgent;

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> AgentName;

    /// Answer one request. Always returns a message for the sender,
    /// either the matching response or an `ERROR`.
    async fn handle(&self, message: Message) -> Message;
}

/// Turn a handler outcome into the reply for `request`.
pub(crate) fn reply_with(
    request: &Message,
    from: AgentName,
    outcome: Result<Payload, ErrorPayload>,
) -> Message {
    match outcome {
        Ok(payload) => request
            .reply(from, payload)
            .unwrap_or_else(|e| request.error_reply(from, ErrorPayload::from_error(&e))),
        Err(error) => request.error_reply(from, error),
    }
}

pub(crate) fn unsupported(request: &Message, from: AgentName) -> Message {
    let error = RagError::MalformedMessage(format!(
        "{} cannot handle {}",
        from,
        request.message_type()
    ));
    tracing::warn!(agent = %from, error = %error, "rejected message");
    request.error_reply(from, ErrorPayload::from_error(&error))
}

/// Embed `text`, failing with a timeout error after `limit`.
pub(crate) async fn embed_with_timeout(
    embedder: &dyn Embedder,
    text: &str,
    limit: Duration,
) -> Result<Vec<f32>, RagError> {
    match tokio::time::timeout(limit, embedder.embed(text)).await {
        Ok(Ok(vector)) => Ok(vector),
        Ok(Err(e)) => Err(RagError::EmbeddingService(e)),
        Err(_) => Err(RagError::EmbeddingService(ServiceError::timeout(limit))),
    }
}

/// Generate a completion, failing with a timeout error after `limit`.
pub(crate) async fn generate_with_timeout(
    generator: &dyn Generator,
    prompt: &str,
    max_tokens: usize,
    limit: Duration,
) -> Result<String, RagError> {
    match tokio::time::timeout(limit, generator.generate(prompt, max_tokens)).await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(RagError::GenerationService(e)),
        Err(_) => Err(RagError::GenerationService(ServiceError::timeout(limit))),
    }
}
