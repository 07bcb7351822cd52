//! Coordinator agent: the orchestration state machine.
//!
//! ```text
//!            upload                    ok
//!   IDLE ──────────────▶ INGESTING ───────────▶ READY ◀──┐
//!     ▲                     │ nothing indexed     │      │ answer / failure
//!     │                     ▼                     ▼      │
//!     │   acknowledge     ERROR              QUERYING ───┘
//!     └──────────────────── (back to the last stable state)
//! ```
//!
//! The coordinator is the only component that mints trace ids: one per
//! upload or query, copied into every message of that action. Uploads
//! fan out one `INGEST_REQUEST` per document, up to
//! `coordinator.ingest_concurrency` at a time. A query is a
//! `CONTEXT_REQUEST` followed by a `RESPONSE_REQUEST`. Transient service
//! failures are retried at most `coordinator.max_retries` times (0 or 1).
//!
//! Only one action runs at a time. A second query or upload while one is
//! in flight is rejected with [`RagError::Busy`].

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use agentic_rag_core::embedding::Embedder;
use agentic_rag_core::generation::Generator;
use agentic_rag_core::models::{DocumentInfo, QuerySession, RetrievedChunk, Turn};
use agentic_rag_core::parse::{format_tag, FormatParser};
use agentic_rag_core::protocol::{
    AgentName, ContextRequest, ErrorPayload, IngestRequest, Message, Payload, ResponseRequest,
    TraceId,
};
use agentic_rag_core::store::{IndexStats, VectorIndex};
use agentic_rag_core::{ErrorKind, RagError};

use crate::agents::{IngestionAgent, ResponseAgent, RetrievalAgent};
use crate::bus::{LogEntry, MessageBus};
use crate::config::Config;

/// Characters of chunk text shown per source.
const PREVIEW_CHARS: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatorState {
    Idle,
    Ingesting,
    Ready,
    Querying,
    Error,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CoordinatorState::Idle => "IDLE",
            CoordinatorState::Ingesting => "INGESTING",
            CoordinatorState::Ready => "READY",
            CoordinatorState::Querying => "QUERYING",
            CoordinatorState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Current state plus the stable state an ERROR recovers to.
struct Machine {
    state: CoordinatorState,
    recover_to: CoordinatorState,
}

/// A failed user action. `trace_id` is `None` when the action was
/// rejected before any message was sent.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error}")]
pub struct ActionError {
    pub trace_id: Option<TraceId>,
    pub error: RagError,
}

impl ActionError {
    fn rejected(error: RagError) -> Self {
        Self {
            trace_id: None,
            error,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// A file handed to [`CoordinatorAgent::upload`].
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }

    /// Read a file from disk, keeping only its file name.
    pub fn from_path(path: &std::path::Path) -> std::io::Result<Self> {
        let content = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { filename, content })
    }
}

/// Per-document result of an upload.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOutcome {
    pub filename: String,
    pub document_id: String,
    pub chunk_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl DocumentOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub trace_id: TraceId,
    /// In upload order.
    pub documents: Vec<DocumentOutcome>,
    /// State after the upload: READY, or ERROR when no document of the
    /// batch was indexed.
    pub state: CoordinatorState,
}

impl IngestReport {
    pub fn succeeded(&self) -> usize {
        self.documents.iter().filter(|d| d.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.documents.len() - self.succeeded()
    }

    pub fn chunks_indexed(&self) -> usize {
        self.documents.iter().map(|d| d.chunk_count).sum()
    }
}

/// One retrieved passage shown alongside an answer.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub filename: String,
    pub document_id: String,
    pub chunk_id: String,
    pub score: f32,
    pub preview: String,
    /// Whether the passage made it into the prompt.
    pub cited: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub trace_id: TraceId,
    pub answer: String,
    pub cited_document_ids: Vec<String>,
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub state: CoordinatorState,
    pub documents_processed: usize,
    pub total_chunks: usize,
    pub formats: BTreeMap<String, usize>,
    pub documents: Vec<DocumentInfo>,
    pub index: IndexStats,
    pub supported_formats: Vec<&'static str>,
    pub embedding_model: String,
    pub generation_model: String,
    pub history_turns: usize,
    pub ingestion_halted: bool,
    pub messages_logged: usize,
}

pub struct CoordinatorAgent {
    index: Arc<VectorIndex>,
    ingestion: Arc<IngestionAgent>,
    bus: MessageBus,
    embedding_model: String,
    generation_model: String,
    top_k: usize,
    history_turns: usize,
    max_retries: u32,
    retry_backoff: Duration,
    ingest_concurrency: usize,
    machine: Mutex<Machine>,
    session: Mutex<QuerySession>,
}

impl CoordinatorAgent {
    /// Wire up the index and the three worker agents.
    ///
    /// Fails with [`RagError::Configuration`] for invalid settings or an
    /// embedder whose dimension differs from the index.
    pub fn new(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        parser: Arc<dyn FormatParser>,
    ) -> Result<Self, RagError> {
        config.validate()?;
        if embedder.dims() != config.index.dimension {
            return Err(RagError::Configuration(format!(
                "embedder '{}' produces {} dimensions but index.dimension is {}",
                embedder.model_name(),
                embedder.dims(),
                config.index.dimension
            )));
        }

        let index = Arc::new(VectorIndex::create(
            config.index.dimension,
            config.index.metric,
        )?);
        let timeout = config.coordinator.call_timeout();

        let ingestion = Arc::new(IngestionAgent::new(
            Arc::clone(&index),
            Arc::clone(&embedder),
            parser,
            config.chunking.chunk_size,
            config.chunking.overlap,
            timeout,
        ));
        let retrieval = Arc::new(RetrievalAgent::new(
            Arc::clone(&index),
            Arc::clone(&embedder),
            timeout,
        ));
        let response = Arc::new(ResponseAgent::new(
            Arc::clone(&generator),
            config.response.clone(),
            timeout,
        ));

        let mut bus = MessageBus::default();
        bus.register(ingestion.clone());
        bus.register(retrieval);
        bus.register(response);

        Ok(Self {
            index,
            ingestion,
            bus,
            embedding_model: embedder.model_name().to_string(),
            generation_model: generator.model_name().to_string(),
            top_k: config.retrieval.top_k,
            history_turns: config.response.history_turns,
            max_retries: config.coordinator.max_retries,
            retry_backoff: config.coordinator.retry_backoff(),
            ingest_concurrency: config.coordinator.ingest_concurrency,
            machine: Mutex::new(Machine {
                state: CoordinatorState::Idle,
                recover_to: CoordinatorState::Idle,
            }),
            session: Mutex::new(QuerySession::new()),
        })
    }

    // ============ State machine ============

    fn machine(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> MutexGuard<'_, QuerySession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CoordinatorState {
        self.machine().state
    }

    fn set_state(machine: &mut Machine, to: CoordinatorState) {
        if machine.state != to {
            tracing::info!(from = %machine.state, to = %to, "coordinator state");
        }
        if matches!(to, CoordinatorState::Idle | CoordinatorState::Ready) {
            machine.recover_to = to;
        }
        machine.state = to;
    }

    fn transition(&self, to: CoordinatorState) {
        Self::set_state(&mut self.machine(), to);
    }

    fn busy(state: CoordinatorState) -> RagError {
        match state {
            CoordinatorState::Error => {
                RagError::Busy("coordinator is in ERROR state; acknowledge it first".to_string())
            }
            other => RagError::Busy(format!("coordinator is {}", other)),
        }
    }

    /// Leave ERROR for the last stable state (IDLE or READY).
    pub fn acknowledge_error(&self) -> CoordinatorState {
        let mut machine = self.machine();
        if machine.state == CoordinatorState::Error {
            let to = machine.recover_to;
            Self::set_state(&mut machine, to);
        }
        machine.state
    }

    // ============ Upload ============

    /// Ingest a batch of documents.
    ///
    /// Each document succeeds or fails on its own; the report lists both.
    /// The coordinator ends READY if at least one document of this batch
    /// was indexed, otherwise ERROR.
    pub async fn upload(&self, files: Vec<UploadedFile>) -> Result<IngestReport, ActionError> {
        if files.is_empty() {
            return Err(ActionError::rejected(RagError::InvalidArgument(
                "no files to upload".to_string(),
            )));
        }
        {
            let mut machine = self.machine();
            match machine.state {
                CoordinatorState::Idle | CoordinatorState::Ready => {
                    Self::set_state(&mut machine, CoordinatorState::Ingesting)
                }
                other => return Err(ActionError::rejected(Self::busy(other))),
            }
        }

        let trace_id = TraceId::generate();
        let span = tracing::info_span!("upload", trace_id = %trace_id, files = files.len());
        let documents = self.ingest_all(files, &trace_id).instrument(span).await;

        let state = if documents.iter().any(|d| d.succeeded()) {
            CoordinatorState::Ready
        } else {
            CoordinatorState::Error
        };
        self.transition(state);

        let report = IngestReport {
            trace_id,
            documents,
            state,
        };
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            chunks = report.chunks_indexed(),
            "upload finished"
        );
        Ok(report)
    }

    async fn ingest_all(&self, files: Vec<UploadedFile>, trace_id: &TraceId) -> Vec<DocumentOutcome> {
        let this = self;
        stream::iter(files)
            .map(|file| {
                let trace_id = trace_id.clone();
                async move {
                    let document_id = Uuid::new_v4().to_string();
                    let mut outcome = DocumentOutcome {
                        filename: file.filename.clone(),
                        document_id: document_id.clone(),
                        chunk_count: 0,
                        error: None,
                    };
                    let request = Message::request(
                        AgentName::Coordinator,
                        AgentName::Ingestion,
                        trace_id,
                        Payload::IngestRequest(IngestRequest {
                            document_id,
                            format: format_tag(&file.filename),
                            filename: file.filename,
                            content: file.content,
                        }),
                    );
                    let reply = match request {
                        Ok(message) => this.call(message).await,
                        Err(e) => Err(ErrorPayload::from_error(&e)),
                    };
                    match reply {
                        Ok(Payload::IngestResponse(resp)) => outcome.chunk_count = resp.chunk_count,
                        Ok(other) => {
                            outcome.error = Some(ErrorPayload::from_error(&unexpected(&other)))
                        }
                        Err(error) => outcome.error = Some(error),
                    }
                    outcome
                }
            })
            .buffered(self.ingest_concurrency)
            .collect()
            .await
    }

    // ============ Query ============

    /// Answer a question from the indexed documents.
    ///
    /// On success the exchange is appended to the session history. On
    /// failure the history is untouched and the coordinator passes through
    /// ERROR back to READY.
    pub async fn query(&self, question: &str) -> Result<QueryAnswer, ActionError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ActionError::rejected(RagError::InvalidArgument(
                "question must not be empty".to_string(),
            )));
        }
        if self.index.is_empty() {
            return Err(ActionError::rejected(RagError::EmptyIndexQuery));
        }
        {
            let mut machine = self.machine();
            match machine.state {
                CoordinatorState::Idle | CoordinatorState::Ready => {
                    Self::set_state(&mut machine, CoordinatorState::Querying);
                }
                other => return Err(ActionError::rejected(Self::busy(other))),
            }
        }

        let trace_id = TraceId::generate();
        let span = tracing::info_span!("query", trace_id = %trace_id);
        let result = self
            .run_query(question, &trace_id)
            .instrument(span)
            .await;

        match result {
            Ok(answer) => {
                self.session().push(Turn {
                    question: question.to_string(),
                    answer: answer.answer.clone(),
                });
                self.transition(CoordinatorState::Ready);
                Ok(answer)
            }
            Err(error) => {
                tracing::warn!(trace_id = %trace_id, error = %error, "query failed");
                self.transition(CoordinatorState::Error);
                self.acknowledge_error();
                Err(ActionError {
                    trace_id: Some(trace_id),
                    error,
                })
            }
        }
    }

    async fn run_query(&self, question: &str, trace_id: &TraceId) -> Result<QueryAnswer, RagError> {
        let request = Message::request(
            AgentName::Coordinator,
            AgentName::Retrieval,
            trace_id.clone(),
            Payload::ContextRequest(ContextRequest {
                query: question.to_string(),
                top_k: self.top_k,
            }),
        )?;
        let context = match self.call(request).await.map_err(ErrorPayload::into_error)? {
            Payload::ContextResponse(resp) => resp,
            other => return Err(unexpected(&other)),
        };
        if context.no_context {
            return Err(RagError::EmptyIndexQuery);
        }

        let history = self.session().recent(self.history_turns);
        let request = Message::request(
            AgentName::Coordinator,
            AgentName::Response,
            trace_id.clone(),
            Payload::ResponseRequest(ResponseRequest {
                query: question.to_string(),
                context: context.results.clone(),
                history,
            }),
        )?;
        let complete = match self.call(request).await.map_err(ErrorPayload::into_error)? {
            Payload::ResponseComplete(done) => done,
            other => return Err(unexpected(&other)),
        };

        let sources = self.sources(&context.results.items, &complete.cited_chunk_ids);
        Ok(QueryAnswer {
            trace_id: trace_id.clone(),
            answer: complete.answer,
            cited_document_ids: complete.cited_document_ids,
            sources,
        })
    }

    fn sources(&self, items: &[RetrievedChunk], cited_chunks: &[String]) -> Vec<Source> {
        let filenames: BTreeMap<String, String> = self
            .ingestion
            .documents()
            .into_iter()
            .map(|d| (d.id, d.filename))
            .collect();
        items
            .iter()
            .map(|item| {
                let mut preview: String = item.text.chars().take(PREVIEW_CHARS).collect();
                if item.text.chars().count() > PREVIEW_CHARS {
                    preview.push_str("...");
                }
                Source {
                    filename: filenames
                        .get(&item.document_id)
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string()),
                    document_id: item.document_id.clone(),
                    chunk_id: item.chunk_id.clone(),
                    score: item.score,
                    preview,
                    cited: cited_chunks.contains(&item.chunk_id),
                }
            })
            .collect()
    }

    /// Send one request, retrying transient service failures.
    async fn call(&self, message: Message) -> Result<Payload, ErrorPayload> {
        let mut attempt = 0u32;
        loop {
            let reply = self
                .bus
                .dispatch(message.clone())
                .await
                .map_err(|e| ErrorPayload::from_error(&e))?;
            match reply.into_payload() {
                Payload::Error(error) => {
                    let transient = matches!(
                        error.kind,
                        ErrorKind::EmbeddingServiceError | ErrorKind::GenerationServiceError
                    );
                    if transient && attempt < self.max_retries {
                        attempt += 1;
                        tracing::warn!(error = %error, attempt, "transient failure; retrying");
                        tokio::time::sleep(self.retry_backoff).await;
                        continue;
                    }
                    return Err(error);
                }
                payload => return Ok(payload),
            }
        }
    }

    // ============ Housekeeping ============

    /// Clear the index, the document catalog, the session history and the
    /// message log, returning to IDLE.
    pub fn reset(&self) -> Result<(), ActionError> {
        let mut machine = self.machine();
        if matches!(
            machine.state,
            CoordinatorState::Ingesting | CoordinatorState::Querying
        ) {
            return Err(ActionError::rejected(Self::busy(machine.state)));
        }
        let removed = self.index.reset();
        self.ingestion.reset();
        self.session().clear();
        self.bus.clear();
        Self::set_state(&mut machine, CoordinatorState::Idle);
        tracing::info!(removed, "system cleared");
        Ok(())
    }

    pub fn status(&self) -> SystemStatus {
        let documents = self.ingestion.documents();
        let mut formats: BTreeMap<String, usize> = BTreeMap::new();
        for doc in &documents {
            *formats.entry(doc.format.clone()).or_default() += 1;
        }
        SystemStatus {
            state: self.state(),
            documents_processed: documents.len(),
            total_chunks: documents.iter().map(|d| d.chunk_count).sum(),
            formats,
            documents,
            index: self.index.stats(),
            supported_formats: self.ingestion.supported_formats(),
            embedding_model: self.embedding_model.clone(),
            generation_model: self.generation_model.clone(),
            history_turns: self.session().len(),
            ingestion_halted: self.ingestion.is_halted(),
            messages_logged: self.bus.len(),
        }
    }

    /// Completed question/answer turns, oldest first.
    pub fn history(&self) -> Vec<Turn> {
        self.session().turns().to_vec()
    }

    /// Routed messages, optionally for a single trace.
    pub fn message_history(&self, trace_id: Option<&TraceId>) -> Vec<LogEntry> {
        self.bus.history(trace_id)
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }
}

fn unexpected(payload: &Payload) -> RagError {
    RagError::MalformedMessage(format!(
        "unexpected {} reply",
        payload.message_type()
    ))
}
