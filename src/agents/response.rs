//! Response agent: `RESPONSE_REQUEST` → `RESPONSE_COMPLETE`.
//!
//! Builds a bounded prompt from the query, the retrieved context and the
//! most recent conversation turns, then makes one generation call. Retries
//! are the coordinator's decision, never this agent's.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use agentic_rag_core::generation::Generator;
use agentic_rag_core::models::RetrievalResult;
use agentic_rag_core::protocol::{
    AgentName, ErrorPayload, Message, Payload, ResponseComplete, ResponseRequest,
};
use agentic_rag_core::RagError;

use super::{generate_with_timeout, reply_with, unsupported, Agent};
use crate::config::ResponseConfig;
use crate::prompt::{build_prompt, fit_context};

pub struct ResponseAgent {
    generator: Arc<dyn Generator>,
    config: ResponseConfig,
    call_timeout: Duration,
}

impl ResponseAgent {
    pub fn new(generator: Arc<dyn Generator>, config: ResponseConfig, call_timeout: Duration) -> Self {
        Self {
            generator,
            config,
            call_timeout,
        }
    }

    pub async fn respond(&self, req: &ResponseRequest) -> Result<ResponseComplete, RagError> {
        let fitted = fit_context(&req.context.items, self.config.context_budget_chars);
        if fitted.dropped > 0 || fitted.truncated {
            tracing::debug!(
                dropped = fitted.dropped,
                truncated = fitted.truncated,
                "context trimmed to budget"
            );
        }

        let skip = req.history.len().saturating_sub(self.config.history_turns);
        let prompt = build_prompt(&req.query, &fitted.items, &req.history[skip..]);

        let answer = generate_with_timeout(
            self.generator.as_ref(),
            &prompt,
            self.config.max_tokens,
            self.call_timeout,
        )
        .await?;

        let cited_chunk_ids = fitted.items.iter().map(|c| c.chunk_id.clone()).collect();
        Ok(ResponseComplete {
            answer,
            cited_document_ids: RetrievalResult::new(fitted.items).document_ids(),
            cited_chunk_ids,
        })
    }
}

#[async_trait]
impl Agent for ResponseAgent {
    fn name(&self) -> AgentName {
        AgentName::Response
    }

    async fn handle(&self, message: Message) -> Message {
        match message.payload() {
            Payload::ResponseRequest(req) => {
                let outcome = self
                    .respond(req)
                    .await
                    .map(Payload::ResponseComplete)
                    .map_err(|e| {
                        tracing::warn!(error = %e, "generation failed");
                        ErrorPayload::from_error(&e)
                    });
                reply_with(&message, self.name(), outcome)
            }
            _ => unsupported(&message, self.name()),
        }
    }
}
