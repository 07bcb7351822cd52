//! In-process message bus.
//!
//! Routes validated [`Message`]s to registered agents and keeps a bounded
//! log of everything that passed through, queryable by trace id. Each hop
//! runs inside a `tracing` span carrying the trace id, so log lines from
//! the agents can be correlated with the action that caused them.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;

use agentic_rag_core::protocol::{AgentName, Message, Payload, TraceId};
use agentic_rag_core::RagError;

use crate::agents::Agent;

/// Default number of log entries kept before the oldest are dropped.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Summary of one routed message. Payload bodies are reduced to a short
/// description so that large uploads are not retained.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub sender: String,
    pub receiver: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

impl LogEntry {
    fn from_message(message: &Message) -> Self {
        Self {
            sender: message.sender().to_string(),
            receiver: message.receiver().to_string(),
            message_type: message.message_type().to_string(),
            trace_id: message.trace_id().to_string(),
            timestamp: message.timestamp(),
            summary: summarize(message.payload()),
        }
    }
}

fn summarize(payload: &Payload) -> String {
    match payload {
        Payload::IngestRequest(p) => format!("{} ({} bytes)", p.filename, p.content.len()),
        Payload::IngestResponse(p) => format!("{}: {} chunks", p.document_id, p.chunk_count),
        Payload::ContextRequest(p) => format!("top {} for {:?}", p.top_k, p.query),
        Payload::ContextResponse(p) if p.no_context => "no context".to_string(),
        Payload::ContextResponse(p) => format!("{} results", p.results.len()),
        Payload::ResponseRequest(p) => format!(
            "{:?} with {} chunks, {} turns",
            p.query,
            p.context.len(),
            p.history.len()
        ),
        Payload::ResponseComplete(p) => format!(
            "{} chars citing {}",
            p.answer.chars().count(),
            p.cited_document_ids.len()
        ),
        Payload::Error(p) => p.to_string(),
    }
}

pub struct MessageBus {
    agents: HashMap<AgentName, Arc<dyn Agent>>,
    log: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            agents: HashMap::new(),
            log: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register an agent under its own name, replacing any previous one.
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.name(), agent);
    }

    /// Deliver `message` to its receiver and return the reply.
    ///
    /// The reply must be addressed back to the sender and carry the same
    /// trace id; anything else is a protocol violation.
    pub async fn dispatch(&self, message: Message) -> Result<Message, RagError> {
        let receiver = message.receiver();
        let agent = self.agents.get(&receiver).ok_or_else(|| {
            RagError::MalformedMessage(format!("no agent registered as {}", receiver))
        })?;

        let sender = message.sender();
        let trace_id = message.trace_id().clone();
        let span = tracing::info_span!(
            "hop",
            trace_id = %trace_id,
            agent = %receiver,
            msg_type = %message.message_type(),
        );

        self.record(&message);
        let reply = agent.handle(message).instrument(span).await;
        self.record(&reply);

        if reply.trace_id() != &trace_id {
            return Err(RagError::MalformedMessage(format!(
                "{} replied with trace id {} to {}",
                receiver,
                reply.trace_id(),
                trace_id
            )));
        }
        if reply.receiver() != sender {
            return Err(RagError::MalformedMessage(format!(
                "{} replied to {} instead of {}",
                receiver,
                reply.receiver(),
                sender
            )));
        }
        Ok(reply)
    }

    fn record(&self, message: &Message) {
        let entry = LogEntry::from_message(message);
        tracing::debug!(
            sender = %entry.sender,
            receiver = %entry.receiver,
            msg_type = %entry.message_type,
            summary = %entry.summary,
            "message"
        );
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        if log.len() == self.capacity {
            log.pop_front();
        }
        log.push_back(entry);
    }

    /// Logged messages, oldest first, optionally restricted to one trace.
    pub fn history(&self, trace_id: Option<&TraceId>) -> Vec<LogEntry> {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.iter()
            .filter(|e| trace_id.map_or(true, |t| e.trace_id == t.as_str()))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentic_rag_core::models::RetrievalResult;
    use agentic_rag_core::protocol::{ContextRequest, ContextResponse};
    use async_trait::async_trait;

    struct EmptyRetrieval;

    #[async_trait]
    impl Agent for EmptyRetrieval {
        fn name(&self) -> AgentName {
            AgentName::Retrieval
        }
        async fn handle(&self, message: Message) -> Message {
            message
                .reply(
                    AgentName::Retrieval,
                    Payload::ContextResponse(ContextResponse {
                        results: RetrievalResult::default(),
                        no_context: true,
                    }),
                )
                .unwrap()
        }
    }

    /// Answers with a fresh trace id, which the bus must reject.
    struct TraceForger;

    #[async_trait]
    impl Agent for TraceForger {
        fn name(&self) -> AgentName {
            AgentName::Retrieval
        }
        async fn handle(&self, _message: Message) -> Message {
            Message::request(
                AgentName::Coordinator,
                AgentName::Retrieval,
                TraceId::generate(),
                context_request(),
            )
            .unwrap()
            .reply(
                AgentName::Retrieval,
                Payload::ContextResponse(ContextResponse {
                    results: RetrievalResult::default(),
                    no_context: true,
                }),
            )
            .unwrap()
        }
    }

    fn context_request() -> Payload {
        Payload::ContextRequest(ContextRequest {
            query: "q".into(),
            top_k: 1,
        })
    }

    fn request(trace: &str) -> Message {
        Message::request(
            AgentName::Coordinator,
            AgentName::Retrieval,
            TraceId::from(trace),
            context_request(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_logs_both_directions() {
        let mut bus = MessageBus::default();
        bus.register(Arc::new(EmptyRetrieval));
        let reply = bus.dispatch(request("t1")).await.unwrap();
        assert_eq!(reply.trace_id().as_str(), "t1");

        let history = bus.history(Some(&TraceId::from("t1")));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message_type, "CONTEXT_REQUEST");
        assert_eq!(history[1].message_type, "CONTEXT_RESPONSE");
        assert_eq!(history[1].summary, "no context");
    }

    #[tokio::test]
    async fn test_history_filters_by_trace() {
        let mut bus = MessageBus::default();
        bus.register(Arc::new(EmptyRetrieval));
        bus.dispatch(request("a")).await.unwrap();
        bus.dispatch(request("b")).await.unwrap();
        assert_eq!(bus.history(None).len(), 4);
        assert_eq!(bus.history(Some(&TraceId::from("b"))).len(), 2);
        bus.clear();
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn test_log_is_bounded() {
        let mut bus = MessageBus::new(3);
        bus.register(Arc::new(EmptyRetrieval));
        bus.dispatch(request("old")).await.unwrap();
        bus.dispatch(request("new")).await.unwrap();
        assert_eq!(bus.len(), 3);
        assert_eq!(bus.history(Some(&TraceId::from("old"))).len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_receiver() {
        let bus = MessageBus::default();
        let err = bus.dispatch(request("t")).await.unwrap_err();
        assert!(matches!(err, RagError::MalformedMessage(_)));
    }

    #[tokio::test]
    async fn test_reply_with_other_trace_rejected() {
        let mut bus = MessageBus::default();
        bus.register(Arc::new(TraceForger));
        let err = bus.dispatch(request("t")).await.unwrap_err();
        assert!(matches!(err, RagError::MalformedMessage(_)));
    }
}
