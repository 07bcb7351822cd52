//! Inter-agent message protocol.
//!
//! Every hop between agents is a [`Message`]: a typed [`Payload`] wrapped in
//! routing information (sender, receiver), a [`TraceId`] shared by every
//! message derived from one user action, and a timestamp.
//!
//! Messages can only be created through [`Message::build`] (or the
//! [`reply`](Message::reply) helpers built on it), which rejects anything
//! that violates the protocol with [`RagError::MalformedMessage`]:
//!
//! - the payload variant must match the declared [`MessageType`];
//! - request types must be addressed to their designated handler agent,
//!   and response types must come from it;
//! - the trace id must be non-empty;
//! - the payload must satisfy its type's schema (e.g. a `CONTEXT_REQUEST`
//!   needs a non-empty query and `top_k >= 1`).
//!
//! # Wire format
//!
//! ```text
//! { "sender": "RetrievalAgent", "receiver": "CoordinatorAgent",
//!   "type": "CONTEXT_RESPONSE", "trace_id": "…",
//!   "payload": { … }, "timestamp": "2025-01-01T00:00:00Z" }
//! ```
//!
//! [`Message::to_envelope`] and [`Message::from_envelope`] convert between
//! the typed form and this JSON shape. Decoding applies the same rules as
//! [`Message::build`], so malformed JSON is rejected at the boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, RagError, Result, ServiceError, ServiceErrorKind};
use crate::models::{RetrievalResult, Turn};

// ═══════════════════════════════════════════════════════════════════════
// Names, types, trace ids
// ═══════════════════════════════════════════════════════════════════════

/// The closed set of agents that may send or receive messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentName {
    Coordinator,
    Ingestion,
    Retrieval,
    Response,
}

impl AgentName {
    pub const ALL: [AgentName; 4] = [
        AgentName::Coordinator,
        AgentName::Ingestion,
        AgentName::Retrieval,
        AgentName::Response,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentName::Coordinator => "CoordinatorAgent",
            AgentName::Ingestion => "IngestionAgent",
            AgentName::Retrieval => "RetrievalAgent",
            AgentName::Response => "ResponseAgent",
        }
    }
}

impl std::fmt::Display for AgentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentName {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        AgentName::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| RagError::MalformedMessage(format!("unknown agent '{}'", s)))
    }
}

/// Recognised message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    IngestRequest,
    IngestResponse,
    ContextRequest,
    ContextResponse,
    ResponseRequest,
    ResponseComplete,
    Error,
}

impl MessageType {
    pub const ALL: [MessageType; 7] = [
        MessageType::IngestRequest,
        MessageType::IngestResponse,
        MessageType::ContextRequest,
        MessageType::ContextResponse,
        MessageType::ResponseRequest,
        MessageType::ResponseComplete,
        MessageType::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::IngestRequest => "INGEST_REQUEST",
            MessageType::IngestResponse => "INGEST_RESPONSE",
            MessageType::ContextRequest => "CONTEXT_REQUEST",
            MessageType::ContextResponse => "CONTEXT_RESPONSE",
            MessageType::ResponseRequest => "RESPONSE_REQUEST",
            MessageType::ResponseComplete => "RESPONSE_COMPLETE",
            MessageType::Error => "ERROR",
        }
    }

    pub fn is_request(self) -> bool {
        matches!(
            self,
            MessageType::IngestRequest | MessageType::ContextRequest | MessageType::ResponseRequest
        )
    }

    /// The agent that handles a request type, or sends a response type.
    ///
    /// `None` for `ERROR`, which any agent may send.
    pub fn owner(self) -> Option<AgentName> {
        match self {
            MessageType::IngestRequest | MessageType::IngestResponse => Some(AgentName::Ingestion),
            MessageType::ContextRequest | MessageType::ContextResponse => Some(AgentName::Retrieval),
            MessageType::ResponseRequest | MessageType::ResponseComplete => {
                Some(AgentName::Response)
            }
            MessageType::Error => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageType {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RagError::MalformedMessage(format!("unknown message type '{}'", s)))
    }
}

/// Opaque identifier threading one user action through every agent hop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Mint a fresh, globally unique trace id.
    ///
    /// Only the coordinator calls this; every other component copies the
    /// id from the message it is answering.
    pub fn generate() -> Self {
        TraceId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TraceId {
    fn from(s: &str) -> Self {
        TraceId(s.to_string())
    }
}

impl From<String> for TraceId {
    fn from(s: String) -> Self {
        TraceId(s)
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Payload schemas
// ═══════════════════════════════════════════════════════════════════════

/// Upload a single document for ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub document_id: String,
    pub filename: String,
    /// Lower-case format tag. May be empty; the parser rejects it then.
    pub format: String,
    /// Raw file bytes, base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub document_id: String,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRequest {
    pub query: String,
    pub top_k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextResponse {
    pub results: RetrievalResult,
    /// Set when the index held nothing to search. Callers must check it.
    pub no_context: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRequest {
    pub query: String,
    pub context: RetrievalResult,
    #[serde(default)]
    pub history: Vec<Turn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseComplete {
    pub answer: String,
    pub cited_document_ids: Vec<String>,
    /// Chunks actually placed in the prompt, in rank order.
    #[serde(default)]
    pub cited_chunk_ids: Vec<String>,
}

/// Body of an `ERROR` message.
///
/// `message` carries the human-readable detail without the kind prefix;
/// the optional fields keep enough structure for
/// [`into_error`](Self::into_error) to rebuild the original [`RagError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// Chunks removed from the index by a per-document rollback.
    #[serde(default)]
    pub rolled_back_chunks: usize,
    /// Failure class for embedding / generation service errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceErrorKind>,
    /// `[expected, actual]` for dimension mismatches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<[usize; 2]>,
}

impl ErrorPayload {
    pub fn from_error(error: &RagError) -> Self {
        let mut payload = Self {
            kind: error.kind(),
            message: String::new(),
            document_id: None,
            rolled_back_chunks: 0,
            service: None,
            dimensions: None,
        };
        payload.message = match error {
            RagError::Configuration(m)
            | RagError::InvalidArgument(m)
            | RagError::UnsupportedFormat(m)
            | RagError::ParseFailure(m)
            | RagError::MalformedMessage(m)
            | RagError::Busy(m)
            | RagError::IngestionHalted(m) => m.clone(),
            RagError::EmbeddingService(e) | RagError::GenerationService(e) => {
                payload.service = Some(e.kind);
                e.message.clone()
            }
            RagError::DimensionMismatch { expected, actual } => {
                payload.dimensions = Some([*expected, *actual]);
                error.to_string()
            }
            RagError::IndexReset(doc) => {
                payload.document_id = Some(doc.clone());
                error.to_string()
            }
            RagError::EmptyIndexQuery => error.to_string(),
        };
        if payload.message.trim().is_empty() {
            payload.message = payload.kind.to_string();
        }
        payload
    }

    /// Tag the error with the document it concerns.
    pub fn for_document(mut self, document_id: impl Into<String>, rolled_back: usize) -> Self {
        self.document_id = Some(document_id.into());
        self.rolled_back_chunks = rolled_back;
        self
    }

    /// Rebuild the typed error this payload was made from.
    pub fn into_error(self) -> RagError {
        let service = |kind: Option<ServiceErrorKind>, message: String| {
            ServiceError::new(kind.unwrap_or(ServiceErrorKind::Unavailable), message)
        };
        match self.kind {
            ErrorKind::ConfigurationError => RagError::Configuration(self.message),
            ErrorKind::InvalidArgument => RagError::InvalidArgument(self.message),
            ErrorKind::UnsupportedFormat => RagError::UnsupportedFormat(self.message),
            ErrorKind::ParseFailure => RagError::ParseFailure(self.message),
            ErrorKind::DimensionMismatch => {
                let [expected, actual] = self.dimensions.unwrap_or([0, 0]);
                RagError::DimensionMismatch { expected, actual }
            }
            ErrorKind::EmbeddingServiceError => {
                RagError::EmbeddingService(service(self.service, self.message))
            }
            ErrorKind::GenerationServiceError => {
                RagError::GenerationService(service(self.service, self.message))
            }
            ErrorKind::MalformedMessage => RagError::MalformedMessage(self.message),
            ErrorKind::EmptyIndexQuery => RagError::EmptyIndexQuery,
            ErrorKind::Busy => RagError::Busy(self.message),
            ErrorKind::IndexReset => RagError::IndexReset(self.document_id.unwrap_or(self.message)),
            ErrorKind::IngestionHalted => RagError::IngestionHalted(self.message),
        }
    }
}

impl std::fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Type-specific message body. One variant per [`MessageType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    IngestRequest(IngestRequest),
    IngestResponse(IngestResponse),
    ContextRequest(ContextRequest),
    ContextResponse(ContextResponse),
    ResponseRequest(ResponseRequest),
    ResponseComplete(ResponseComplete),
    Error(ErrorPayload),
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::IngestRequest(_) => MessageType::IngestRequest,
            Payload::IngestResponse(_) => MessageType::IngestResponse,
            Payload::ContextRequest(_) => MessageType::ContextRequest,
            Payload::ContextResponse(_) => MessageType::ContextResponse,
            Payload::ResponseRequest(_) => MessageType::ResponseRequest,
            Payload::ResponseComplete(_) => MessageType::ResponseComplete,
            Payload::Error(_) => MessageType::Error,
        }
    }

    /// Check the schema rules for this payload's type.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| {
            Err(RagError::MalformedMessage(format!(
                "{}: {}",
                self.message_type(),
                msg
            )))
        };
        match self {
            Payload::IngestRequest(p) => {
                if p.document_id.trim().is_empty() {
                    return fail("document_id must not be empty");
                }
                if p.filename.trim().is_empty() {
                    return fail("filename must not be empty");
                }
            }
            Payload::IngestResponse(p) => {
                if p.document_id.trim().is_empty() {
                    return fail("document_id must not be empty");
                }
            }
            Payload::ContextRequest(p) => {
                if p.query.trim().is_empty() {
                    return fail("query must not be empty");
                }
                if p.top_k == 0 {
                    return fail("top_k must be >= 1");
                }
            }
            Payload::ContextResponse(p) => {
                if p.no_context != p.results.is_empty() {
                    return fail("no_context must be set exactly when results are empty");
                }
            }
            Payload::ResponseRequest(p) => {
                if p.query.trim().is_empty() {
                    return fail("query must not be empty");
                }
            }
            Payload::ResponseComplete(_) => {}
            Payload::Error(p) => {
                if p.message.trim().is_empty() {
                    return fail("message must not be empty");
                }
            }
        }
        Ok(())
    }

    fn to_value(&self) -> serde_json::Value {
        let value = match self {
            Payload::IngestRequest(p) => serde_json::to_value(p),
            Payload::IngestResponse(p) => serde_json::to_value(p),
            Payload::ContextRequest(p) => serde_json::to_value(p),
            Payload::ContextResponse(p) => serde_json::to_value(p),
            Payload::ResponseRequest(p) => serde_json::to_value(p),
            Payload::ResponseComplete(p) => serde_json::to_value(p),
            Payload::Error(p) => serde_json::to_value(p),
        };
        // Plain structs with string keys always serialize.
        value.unwrap_or(serde_json::Value::Null)
    }

    fn from_value(message_type: MessageType, value: serde_json::Value) -> Result<Self> {
        fn decode<T: serde::de::DeserializeOwned>(
            t: MessageType,
            v: serde_json::Value,
        ) -> Result<T> {
            serde_json::from_value(v)
                .map_err(|e| RagError::MalformedMessage(format!("{} payload: {}", t, e)))
        }
        Ok(match message_type {
            MessageType::IngestRequest => Payload::IngestRequest(decode(message_type, value)?),
            MessageType::IngestResponse => Payload::IngestResponse(decode(message_type, value)?),
            MessageType::ContextRequest => Payload::ContextRequest(decode(message_type, value)?),
            MessageType::ContextResponse => Payload::ContextResponse(decode(message_type, value)?),
            MessageType::ResponseRequest => Payload::ResponseRequest(decode(message_type, value)?),
            MessageType::ResponseComplete => {
                Payload::ResponseComplete(decode(message_type, value)?)
            }
            MessageType::Error => Payload::Error(decode(message_type, value)?),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Message
// ═══════════════════════════════════════════════════════════════════════

/// A validated protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    sender: AgentName,
    receiver: AgentName,
    trace_id: TraceId,
    payload: Payload,
    timestamp: DateTime<Utc>,
}

impl Message {
    /// Construct and validate a message.
    pub fn build(
        sender: AgentName,
        receiver: AgentName,
        message_type: MessageType,
        trace_id: TraceId,
        payload: Payload,
    ) -> Result<Self> {
        Self::build_at(sender, receiver, message_type, trace_id, payload, Utc::now())
    }

    fn build_at(
        sender: AgentName,
        receiver: AgentName,
        message_type: MessageType,
        trace_id: TraceId,
        payload: Payload,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        if trace_id.as_str().trim().is_empty() {
            return Err(RagError::MalformedMessage(
                "trace_id must not be empty".to_string(),
            ));
        }
        if payload.message_type() != message_type {
            return Err(RagError::MalformedMessage(format!(
                "declared type {} does not match {} payload",
                message_type,
                payload.message_type()
            )));
        }
        if sender == receiver {
            return Err(RagError::MalformedMessage(format!(
                "{} cannot message itself",
                sender
            )));
        }
        if let Some(owner) = message_type.owner() {
            if message_type.is_request() && receiver != owner {
                return Err(RagError::MalformedMessage(format!(
                    "{} must be addressed to {}, not {}",
                    message_type, owner, receiver
                )));
            }
            if !message_type.is_request() && sender != owner {
                return Err(RagError::MalformedMessage(format!(
                    "{} must be sent by {}, not {}",
                    message_type, owner, sender
                )));
            }
        }
        payload.validate()?;

        Ok(Self {
            sender,
            receiver,
            trace_id,
            payload,
            timestamp,
        })
    }

    /// Build a request, inferring the type from the payload.
    pub fn request(
        sender: AgentName,
        receiver: AgentName,
        trace_id: TraceId,
        payload: Payload,
    ) -> Result<Self> {
        let message_type = payload.message_type();
        Self::build(sender, receiver, message_type, trace_id, payload)
    }

    /// Answer this message, copying its trace id.
    pub fn reply(&self, from: AgentName, payload: Payload) -> Result<Self> {
        let message_type = payload.message_type();
        Self::build(from, self.sender, message_type, self.trace_id.clone(), payload)
    }

    /// Answer this message with an `ERROR`, copying its trace id.
    ///
    /// Infallible: an error payload built from a [`RagError`] always has a
    /// non-empty message, and `ERROR` may be sent by any agent.
    pub fn error_reply(&self, from: AgentName, payload: ErrorPayload) -> Self {
        let receiver = if self.sender == from {
            self.receiver
        } else {
            self.sender
        };
        let payload = if payload.message.trim().is_empty() {
            ErrorPayload {
                message: payload.kind.to_string(),
                ..payload
            }
        } else {
            payload
        };
        Self {
            sender: from,
            receiver,
            trace_id: self.trace_id.clone(),
            payload: Payload::Error(payload),
            timestamp: Utc::now(),
        }
    }

    pub fn sender(&self) -> AgentName {
        self.sender
    }

    pub fn receiver(&self) -> AgentName {
        self.receiver
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, Payload::Error(_))
    }

    /// Convert to the JSON wire shape.
    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            sender: self.sender.as_str().to_string(),
            receiver: self.receiver.as_str().to_string(),
            message_type: self.message_type().as_str().to_string(),
            trace_id: self.trace_id.as_str().to_string(),
            payload: self.payload.to_value(),
            timestamp: self.timestamp.to_rfc3339(),
        }
    }

    /// Decode and validate a wire envelope.
    pub fn from_envelope(envelope: Envelope) -> Result<Self> {
        let sender: AgentName = envelope.sender.parse()?;
        let receiver: AgentName = envelope.receiver.parse()?;
        let message_type: MessageType = envelope.message_type.parse()?;
        let timestamp = DateTime::parse_from_rfc3339(&envelope.timestamp)
            .map_err(|e| RagError::MalformedMessage(format!("timestamp: {}", e)))?
            .with_timezone(&Utc);
        let payload = Payload::from_value(message_type, envelope.payload)?;
        Self::build_at(
            sender,
            receiver,
            message_type,
            TraceId::from(envelope.trace_id),
            payload,
            timestamp,
        )
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.to_envelope()).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(json)
            .map_err(|e| RagError::MalformedMessage(format!("envelope: {}", e)))?;
        Self::from_envelope(envelope)
    }
}

/// Untyped wire form of a [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: String,
    pub receiver: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub trace_id: String,
    pub payload: serde_json::Value,
    pub timestamp: String,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RetrievedChunk;

    fn context_request(query: &str, top_k: usize) -> Payload {
        Payload::ContextRequest(ContextRequest {
            query: query.to_string(),
            top_k,
        })
    }

    fn request(payload: Payload) -> Result<Message> {
        Message::request(
            AgentName::Coordinator,
            AgentName::Retrieval,
            TraceId::from("trace-1"),
            payload,
        )
    }

    #[test]
    fn test_valid_context_request() {
        let msg = request(context_request("what is rust?", 5)).unwrap();
        assert_eq!(msg.message_type(), MessageType::ContextRequest);
        assert_eq!(msg.trace_id().as_str(), "trace-1");
    }

    #[test]
    fn test_empty_query_is_malformed() {
        let err = request(context_request("   ", 5)).unwrap_err();
        assert!(matches!(err, RagError::MalformedMessage(_)));
    }

    #[test]
    fn test_zero_top_k_is_malformed() {
        let err = request(context_request("q", 0)).unwrap_err();
        assert!(matches!(err, RagError::MalformedMessage(_)));
    }

    #[test]
    fn test_empty_trace_id_is_malformed() {
        let err = Message::request(
            AgentName::Coordinator,
            AgentName::Retrieval,
            TraceId::from(""),
            context_request("q", 1),
        )
        .unwrap_err();
        assert!(matches!(err, RagError::MalformedMessage(_)));
    }

    #[test]
    fn test_type_payload_mismatch_is_malformed() {
        let err = Message::build(
            AgentName::Coordinator,
            AgentName::Retrieval,
            MessageType::IngestRequest,
            TraceId::from("t"),
            context_request("q", 1),
        )
        .unwrap_err();
        assert!(matches!(err, RagError::MalformedMessage(_)));
    }

    #[test]
    fn test_request_must_reach_its_handler() {
        let err = Message::request(
            AgentName::Coordinator,
            AgentName::Response,
            TraceId::from("t"),
            context_request("q", 1),
        )
        .unwrap_err();
        assert!(matches!(err, RagError::MalformedMessage(_)));
    }

    #[test]
    fn test_reply_copies_trace_and_swaps_route() {
        let req = request(context_request("q", 3)).unwrap();
        let reply = req
            .reply(
                AgentName::Retrieval,
                Payload::ContextResponse(ContextResponse {
                    results: RetrievalResult::default(),
                    no_context: true,
                }),
            )
            .unwrap();
        assert_eq!(reply.trace_id(), req.trace_id());
        assert_eq!(reply.sender(), AgentName::Retrieval);
        assert_eq!(reply.receiver(), AgentName::Coordinator);
    }

    #[test]
    fn test_no_context_flag_must_match_results() {
        let req = request(context_request("q", 3)).unwrap();
        let err = req
            .reply(
                AgentName::Retrieval,
                Payload::ContextResponse(ContextResponse {
                    results: RetrievalResult::default(),
                    no_context: false,
                }),
            )
            .unwrap_err();
        assert!(matches!(err, RagError::MalformedMessage(_)));
    }

    #[test]
    fn test_error_reply_keeps_trace() {
        let req = request(context_request("q", 3)).unwrap();
        let err = req.error_reply(
            AgentName::Retrieval,
            ErrorPayload::from_error(&RagError::EmptyIndexQuery),
        );
        assert!(err.is_error());
        assert_eq!(err.trace_id(), req.trace_id());
        assert_eq!(err.receiver(), AgentName::Coordinator);
    }

    #[test]
    fn test_error_payload_rebuilds_error() {
        let errors = vec![
            RagError::ParseFailure("bad pdf".into()),
            RagError::DimensionMismatch {
                expected: 384,
                actual: 1536,
            },
            RagError::GenerationService(ServiceError::new(
                ServiceErrorKind::RateLimited,
                "slow down",
            )),
            RagError::IndexReset("doc-9".into()),
            RagError::EmptyIndexQuery,
        ];
        for error in errors {
            let payload = ErrorPayload::from_error(&error);
            assert!(!payload.message.is_empty());
            assert_eq!(payload.into_error(), error);
        }
    }

    #[test]
    fn test_envelope_shape() {
        let msg = request(context_request("hello", 2)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(json["sender"], "CoordinatorAgent");
        assert_eq!(json["receiver"], "RetrievalAgent");
        assert_eq!(json["type"], "CONTEXT_REQUEST");
        assert_eq!(json["trace_id"], "trace-1");
        assert_eq!(json["payload"]["query"], "hello");
        assert_eq!(json["payload"]["top_k"], 2);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_decode_valid_response_with_results() {
        let req = request(context_request("q", 3)).unwrap();
        let reply = req
            .reply(
                AgentName::Retrieval,
                Payload::ContextResponse(ContextResponse {
                    results: RetrievalResult::new(vec![RetrievedChunk {
                        chunk_id: "c1".into(),
                        document_id: "d1".into(),
                        text: "text".into(),
                        score: 0.5,
                    }]),
                    no_context: false,
                }),
            )
            .unwrap();
        let decoded = Message::from_json(&reply.to_json()).unwrap();
        assert_eq!(decoded.payload(), reply.payload());
        assert_eq!(decoded.trace_id(), reply.trace_id());
    }

    #[test]
    fn test_decode_rejects_unknown_type_and_agent() {
        let base = serde_json::json!({
            "sender": "CoordinatorAgent",
            "receiver": "RetrievalAgent",
            "type": "CONTEXT_REQUEST",
            "trace_id": "t",
            "payload": { "query": "q", "top_k": 1 },
            "timestamp": "2025-01-01T00:00:00Z"
        });
        assert!(Message::from_json(&base.to_string()).is_ok());

        let mut bad_type = base.clone();
        bad_type["type"] = "RETRIEVAL_READY".into();
        assert!(matches!(
            Message::from_json(&bad_type.to_string()),
            Err(RagError::MalformedMessage(_))
        ));

        let mut bad_agent = base.clone();
        bad_agent["sender"] = "MysteryAgent".into();
        assert!(matches!(
            Message::from_json(&bad_agent.to_string()),
            Err(RagError::MalformedMessage(_))
        ));

        let mut missing_field = base;
        missing_field["payload"] = serde_json::json!({ "query": "q" });
        assert!(matches!(
            Message::from_json(&missing_field.to_string()),
            Err(RagError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_ingest_request_content_is_base64() {
        let msg = Message::request(
            AgentName::Coordinator,
            AgentName::Ingestion,
            TraceId::from("t"),
            Payload::IngestRequest(IngestRequest {
                document_id: "d".into(),
                filename: "a.txt".into(),
                format: "txt".into(),
                content: b"hi".to_vec(),
            }),
        )
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(json["payload"]["content"], "aGk=");
        let decoded = Message::from_json(&msg.to_json()).unwrap();
        assert_eq!(decoded.payload(), msg.payload());
    }

    #[test]
    fn test_trace_ids_unique() {
        assert_ne!(TraceId::generate(), TraceId::generate());
    }
}
