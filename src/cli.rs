//! Command implementations for the `arag` binary.
//!
//! | Command | Function |
//! |---------|----------|
//! | `arag ask` | [`run_ask`] |
//! | `arag chat` | [`run_chat`] |
//! | `arag formats` | [`run_formats`] |
//! | `arag config` | [`run_config`] |
//! | `arag check` | [`run_check`] |

use anyhow::{bail, Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use agentic_rag_core::protocol::TraceId;
use agentic_rag_core::RagError;

use crate::agents::{embed_with_timeout, generate_with_timeout};
use crate::config::Config;
use crate::coordinator::{ActionError, CoordinatorAgent, IngestReport, QueryAnswer, UploadedFile};
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::parser::{DocumentParser, SUPPORTED_FORMATS};

/// Build a coordinator with the providers named in `cfg`.
pub fn build_coordinator(cfg: &Config) -> Result<CoordinatorAgent> {
    let embedder = create_embedder(cfg)?;
    let generator = create_generator(cfg)?;
    let coordinator = CoordinatorAgent::new(cfg, embedder, generator, Arc::new(DocumentParser))?;
    Ok(coordinator)
}

fn read_files(paths: &[PathBuf]) -> Result<Vec<UploadedFile>> {
    paths
        .iter()
        .map(|p| {
            UploadedFile::from_path(p).with_context(|| format!("Failed to read {}", p.display()))
        })
        .collect()
}

async fn upload(coordinator: &CoordinatorAgent, paths: &[PathBuf]) -> Result<IngestReport> {
    let files = read_files(paths)?;
    let report = coordinator.upload(files).await.map_err(action_error)?;
    eprint!("{}", format_report(&report));
    Ok(report)
}

/// Convert an action failure into an `anyhow` error naming its trace id.
fn action_error(err: ActionError) -> anyhow::Error {
    match err.trace_id {
        Some(trace) => anyhow::anyhow!("{} (trace {})", err.error, trace),
        None => anyhow::Error::new(err.error),
    }
}

pub fn format_report(report: &IngestReport) -> String {
    let mut out = String::new();
    for doc in &report.documents {
        match &doc.error {
            None => {
                let _ = writeln!(out, "  ✓ {} ({} chunks)", doc.filename, doc.chunk_count);
            }
            Some(err) => {
                let _ = writeln!(out, "  ✗ {}: {}", doc.filename, err);
            }
        }
    }
    let _ = writeln!(
        out,
        "Processed {}/{} documents, {} chunks indexed.",
        report.succeeded(),
        report.documents.len(),
        report.chunks_indexed()
    );
    out
}

pub fn format_answer(answer: &QueryAnswer) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", answer.answer);
    if !answer.sources.is_empty() {
        let _ = writeln!(out, "\nSources:");
        for (i, source) in answer.sources.iter().enumerate() {
            let marker = if source.cited { "*" } else { " " };
            let _ = writeln!(
                out,
                "{}[{}] {} (score {:.3})\n     {}",
                marker,
                i + 1,
                source.filename,
                source.score,
                source.preview.replace('\n', " ")
            );
        }
    }
    out
}

// ============ ask ============

/// Upload `files`, answer one question, exit.
pub async fn run_ask(cfg: &Config, files: &[PathBuf], question: &str, json: bool) -> Result<()> {
    let coordinator = build_coordinator(cfg)?;
    let report = upload(&coordinator, files).await?;
    if report.succeeded() == 0 {
        bail!("no documents could be ingested");
    }

    let answer = coordinator.query(question).await.map_err(action_error)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        print!("{}", format_answer(&answer));
    }
    Ok(())
}

// ============ chat ============

const CHAT_HELP: &str = "\
Commands:
  /upload <path>...   add documents
  /status             show system status
  /history            show previous questions and answers
  /messages [trace]   show routed agent messages
  /reset              clear documents and history
  /help               show this help
  /quit               exit
Anything else is asked as a question.";

/// Interactive session over stdin.
pub async fn run_chat(cfg: &Config, files: &[PathBuf]) -> Result<()> {
    let coordinator = build_coordinator(cfg)?;
    if !files.is_empty() {
        upload_and_recover(&coordinator, files).await;
    }

    println!("Agentic RAG chat. Type /help for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "/quit" | "/exit" => break,
            "/help" => println!("{}", CHAT_HELP),
            "/upload" => {
                let paths: Vec<PathBuf> = rest.split_whitespace().map(PathBuf::from).collect();
                if paths.is_empty() {
                    println!("usage: /upload <path>...");
                } else {
                    upload_and_recover(&coordinator, &paths).await;
                }
            }
            "/status" => println!("{}", serde_json::to_string_pretty(&coordinator.status())?),
            "/history" => {
                let history = coordinator.history();
                if history.is_empty() {
                    println!("No questions yet.");
                }
                for (i, turn) in history.iter().enumerate() {
                    println!("{}. Q: {}\n   A: {}", i + 1, turn.question, turn.answer);
                }
            }
            "/messages" => {
                let trace = (!rest.trim().is_empty()).then(|| TraceId::from(rest.trim()));
                for entry in coordinator.message_history(trace.as_ref()) {
                    println!(
                        "{} {} {} → {} [{}] {}",
                        entry.timestamp.format("%H:%M:%S%.3f"),
                        entry.message_type,
                        entry.sender,
                        entry.receiver,
                        entry.trace_id,
                        entry.summary
                    );
                }
            }
            "/reset" => match coordinator.reset() {
                Ok(()) => println!("System cleared."),
                Err(e) => println!("Error: {}", e),
            },
            _ if command.starts_with('/') => println!("Unknown command {}. Try /help.", command),
            _ => match coordinator.query(line).await {
                Ok(answer) => print!("{}", format_answer(&answer)),
                Err(err) => print_query_error(&err),
            },
        }
    }
    Ok(())
}

async fn upload_and_recover(coordinator: &CoordinatorAgent, paths: &[PathBuf]) {
    match upload(coordinator, paths).await {
        Ok(report) if report.succeeded() == 0 => {
            let state = coordinator.acknowledge_error();
            println!("No documents were ingested (state {}).", state);
        }
        Ok(_) => {}
        Err(e) => println!("Upload failed: {:#}", e),
    }
}

fn print_query_error(err: &ActionError) {
    match &err.error {
        RagError::EmptyIndexQuery => {
            println!("Please upload and process documents first (/upload <path>).")
        }
        other => match &err.trace_id {
            Some(trace) => println!("Error [{}]: {} (trace {})", other.kind(), other, trace),
            None => println!("Error [{}]: {}", other.kind(), other),
        },
    }
}

// ============ formats / config / check ============

pub fn run_formats() {
    println!("Supported formats:");
    for format in SUPPORTED_FORMATS {
        println!("  .{}", format);
    }
}

pub fn run_config(cfg: &Config) -> Result<()> {
    print!("{}", cfg.to_toml()?);
    Ok(())
}

/// Make one embedding call and one generation call and report how each went.
pub async fn run_check(cfg: &Config) -> Result<()> {
    let timeout = cfg.coordinator.call_timeout();
    let mut failed = false;

    let embedder = create_embedder(cfg)?;
    match embed_with_timeout(embedder.as_ref(), "connection test", timeout).await {
        Ok(v) if v.len() == cfg.index.dimension => {
            println!("embedding  ok    {} ({} dims)", embedder.model_name(), v.len())
        }
        Ok(v) => {
            failed = true;
            println!(
                "embedding  FAIL  {} returned {} dims, index expects {}",
                embedder.model_name(),
                v.len(),
                cfg.index.dimension
            );
        }
        Err(e) => {
            failed = true;
            println!("embedding  FAIL  {}: {}", embedder.model_name(), e);
        }
    }

    let generator = create_generator(cfg)?;
    if !cfg.generation.is_enabled() {
        println!("generation skip  provider is disabled");
    } else {
        match generate_with_timeout(generator.as_ref(), "Reply with the word OK.", 8, timeout).await
        {
            Ok(text) => println!("generation ok    {}: {}", generator.model_name(), text.trim()),
            Err(e) => {
                failed = true;
                println!("generation FAIL  {}: {}", generator.model_name(), e);
            }
        }
    }

    if failed {
        bail!("connection check failed");
    }
    Ok(())
}

/// Resolve the config path: an explicit `--config`, else `./arag.toml` if
/// present, else built-in defaults.
pub fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => crate::config::load_config(p),
        None => {
            let local = Path::new("arag.toml");
            crate::config::load_or_default(local.exists().then_some(local))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{DocumentOutcome, Source};
    use agentic_rag_core::protocol::ErrorPayload;

    #[test]
    fn test_format_report() {
        let report = IngestReport {
            trace_id: TraceId::from("t"),
            documents: vec![
                DocumentOutcome {
                    filename: "a.txt".into(),
                    document_id: "d1".into(),
                    chunk_count: 3,
                    error: None,
                },
                DocumentOutcome {
                    filename: "b.png".into(),
                    document_id: "d2".into(),
                    chunk_count: 0,
                    error: Some(ErrorPayload::from_error(&RagError::UnsupportedFormat(
                        "png".into(),
                    ))),
                },
            ],
            state: crate::coordinator::CoordinatorState::Ready,
        };
        let text = format_report(&report);
        assert!(text.contains("✓ a.txt (3 chunks)"));
        assert!(text.contains("✗ b.png: UnsupportedFormat: png"));
        assert!(text.contains("Processed 1/2 documents, 3 chunks indexed."));
    }

    #[test]
    fn test_format_answer_marks_cited_sources() {
        let answer = QueryAnswer {
            trace_id: TraceId::from("t"),
            answer: "42".into(),
            cited_document_ids: vec!["d1".into()],
            sources: vec![Source {
                filename: "guide.md".into(),
                document_id: "d1".into(),
                chunk_id: "c1".into(),
                score: 0.8123,
                preview: "line one\nline two".into(),
                cited: true,
            }],
        };
        let text = format_answer(&answer);
        assert!(text.starts_with("42\n"));
        assert!(text.contains("*[1] guide.md (score 0.812)"));
        assert!(text.contains("line one line two"));
    }

    #[test]
    fn test_resolve_explicit_missing_config_fails() {
        assert!(resolve_config(Some(Path::new("/definitely/not/here.toml"))).is_err());
    }
}
