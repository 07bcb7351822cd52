//! Error taxonomy shared by every agent.
//!
//! [`RagError`] is the single error type returned by core operations and
//! carried (as an [`ErrorKind`] plus message) inside `ERROR` protocol
//! messages. [`ServiceError`] describes failures of the two external
//! services, the embedding function and the generative model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Why an external service call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorKind {
    /// The call did not finish within the per-call timeout.
    Timeout,
    /// The provider asked us to slow down (HTTP 429 and friends).
    RateLimited,
    /// Network failure or a 5xx response.
    Unavailable,
    /// The provider answered, but not with something we can use.
    BadResponse,
}

impl std::fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceErrorKind::Timeout => "timeout",
            ServiceErrorKind::RateLimited => "rate limited",
            ServiceErrorKind::Unavailable => "unavailable",
            ServiceErrorKind::BadResponse => "bad response",
        };
        f.write_str(s)
    }
}

/// Failure reported by an embedding or generation provider.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self::new(
            ServiceErrorKind::Timeout,
            format!("no answer within {}ms", after.as_millis()),
        )
    }
}

/// All errors produced by the retrieval pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RagError {
    /// Invalid chunking, index, or retrieval parameters. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A call-time argument was out of range (e.g. `top_k == 0`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// Embedding length does not match the index dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding service error: {0}")]
    EmbeddingService(ServiceError),

    #[error("generation service error: {0}")]
    GenerationService(ServiceError),

    /// Protocol violation. Always an integration defect.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("no documents indexed; upload documents before asking questions")]
    EmptyIndexQuery,

    /// The action conflicts with the coordinator's current state.
    #[error("busy: {0}")]
    Busy(String),

    /// The index was reset while a document was being ingested.
    #[error("index was reset during ingestion of document {0}")]
    IndexReset(String),

    /// Ingestion is halted after a fatal dimension mismatch.
    #[error("ingestion halted: {0}")]
    IngestionHalted(String),
}

impl RagError {
    /// The wire-level classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::Configuration(_) => ErrorKind::ConfigurationError,
            RagError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            RagError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            RagError::ParseFailure(_) => ErrorKind::ParseFailure,
            RagError::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            RagError::EmbeddingService(_) => ErrorKind::EmbeddingServiceError,
            RagError::GenerationService(_) => ErrorKind::GenerationServiceError,
            RagError::MalformedMessage(_) => ErrorKind::MalformedMessage,
            RagError::EmptyIndexQuery => ErrorKind::EmptyIndexQuery,
            RagError::Busy(_) => ErrorKind::Busy,
            RagError::IndexReset(_) => ErrorKind::IndexReset,
            RagError::IngestionHalted(_) => ErrorKind::IngestionHalted,
        }
    }

    /// External-service failures are the only ones worth a retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingService(_) | RagError::GenerationService(_)
        )
    }

    /// Errors that must stop all further ingestion.
    pub fn is_fatal_for_ingestion(&self) -> bool {
        matches!(
            self,
            RagError::DimensionMismatch { .. } | RagError::IngestionHalted(_)
        )
    }
}

/// Classification carried in `ERROR` message payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ConfigurationError,
    InvalidArgument,
    UnsupportedFormat,
    ParseFailure,
    DimensionMismatch,
    EmbeddingServiceError,
    GenerationServiceError,
    MalformedMessage,
    EmptyIndexQuery,
    Busy,
    IndexReset,
    IngestionHalted,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            RagError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
            .kind(),
            ErrorKind::DimensionMismatch
        );
        assert_eq!(RagError::EmptyIndexQuery.kind(), ErrorKind::EmptyIndexQuery);
    }

    #[test]
    fn test_only_service_errors_are_transient() {
        let gen = RagError::GenerationService(ServiceError::new(
            ServiceErrorKind::RateLimited,
            "slow down",
        ));
        assert!(gen.is_transient());
        assert!(!RagError::ParseFailure("bad".into()).is_transient());
        assert!(!RagError::EmptyIndexQuery.is_transient());
    }

    #[test]
    fn test_error_kind_serializes_by_name() {
        let json = serde_json::to_string(&ErrorKind::UnsupportedFormat).unwrap();
        assert_eq!(json, "\"UnsupportedFormat\"");
    }
}
