//! TOML configuration.
//!
//! Every section is optional; [`Config::default`] is a working offline
//! setup (hashing embedder, generation disabled). Validation failures are
//! reported as [`RagError::Configuration`] so a bad file stops the binary
//! at startup instead of failing the first upload.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use agentic_rag_core::chunk::validate_params;
use agentic_rag_core::embedding::SimilarityMetric;
use agentic_rag_core::RagError;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub response: ResponseConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkingConfig {
    /// Window size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default)]
    pub metric: SimilarityMetric,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            metric: SimilarityMetric::default(),
        }
    }
}

fn default_dimension() -> usize {
    384
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ResponseConfig {
    /// Maximum characters of retrieved text placed in the prompt.
    #[serde(default = "default_context_budget")]
    pub context_budget_chars: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Prior question/answer turns included in the prompt.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            context_budget_chars: default_context_budget(),
            max_tokens: default_max_tokens(),
            history_turns: default_history_turns(),
        }
    }
}

fn default_context_budget() -> usize {
    6000
}
fn default_max_tokens() -> usize {
    1024
}
fn default_history_turns() -> usize {
    3
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CoordinatorConfig {
    /// Timeout applied to every embedding and generation call.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Retries after a transient service failure. At most 1.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// Documents ingested in parallel during one upload.
    #[serde(default = "default_ingest_concurrency")]
    pub ingest_concurrency: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
            ingest_concurrency: default_ingest_concurrency(),
        }
    }
}

impl CoordinatorConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn default_call_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    1
}
fn default_retry_backoff() -> u64 {
    500
}
fn default_ingest_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// `hashing`, `openai`, or `ollama`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL override (OpenAI-compatible endpoint or Ollama host).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            url: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GenerationConfig {
    /// `disabled`, `openai`, or `ollama`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// Check every value the pipeline depends on.
    pub fn validate(&self) -> std::result::Result<(), RagError> {
        let bad = |msg: String| Err(RagError::Configuration(msg));

        validate_params(self.chunking.chunk_size, self.chunking.overlap)?;

        if self.index.dimension == 0 {
            return bad("index.dimension must be > 0".to_string());
        }
        if self.retrieval.top_k == 0 {
            return bad("retrieval.top_k must be >= 1".to_string());
        }
        if self.response.context_budget_chars == 0 {
            return bad("response.context_budget_chars must be > 0".to_string());
        }
        if self.response.max_tokens == 0 {
            return bad("response.max_tokens must be > 0".to_string());
        }
        if self.coordinator.call_timeout_secs == 0 {
            return bad("coordinator.call_timeout_secs must be > 0".to_string());
        }
        if self.coordinator.max_retries > 1 {
            return bad(format!(
                "coordinator.max_retries must be 0 or 1, got {}",
                self.coordinator.max_retries
            ));
        }
        if self.coordinator.ingest_concurrency == 0 {
            return bad("coordinator.ingest_concurrency must be >= 1".to_string());
        }

        match self.embedding.provider.as_str() {
            "hashing" => {}
            "openai" | "ollama" => {
                if self.embedding.model.is_none() {
                    return bad(format!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    ));
                }
            }
            other => {
                return bad(format!(
                    "unknown embedding provider '{}'. Must be hashing, openai, or ollama.",
                    other
                ))
            }
        }

        match self.generation.provider.as_str() {
            "disabled" => {}
            "openai" | "ollama" => {
                if self.generation.model.is_none() {
                    return bad(format!(
                        "generation.model must be specified when provider is '{}'",
                        self.generation.provider
                    ));
                }
            }
            other => {
                return bad(format!(
                    "unknown generation provider '{}'. Must be disabled, openai, or ollama.",
                    other
                ))
            }
        }

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

/// Load `path` if given, otherwise fall back to [`Config::default`].
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => load_config(p),
        None => Ok(Config::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    fn config_error(body: &str) -> RagError {
        let f = write_config(body);
        let err = load_config(f.path()).unwrap_err();
        err.downcast::<RagError>().unwrap()
    }

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.overlap, 50);
        assert_eq!(config.index.dimension, 384);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.coordinator.max_retries, 1);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let f = write_config("");
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.embedding.provider, "hashing");
        assert!(!config.generation.is_enabled());
    }

    #[test]
    fn test_partial_sections() {
        let f = write_config(
            r#"
[chunking]
chunk_size = 200

[index]
metric = "inner_product"
"#,
        );
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.chunking.chunk_size, 200);
        assert_eq!(config.chunking.overlap, 50);
        assert_eq!(config.index.metric, SimilarityMetric::InnerProduct);
    }

    #[test]
    fn test_overlap_too_large() {
        let err = config_error("[chunking]\nchunk_size = 10\noverlap = 10\n");
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn test_zero_dimension() {
        let err = config_error("[index]\ndimension = 0\n");
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn test_retries_capped_at_one() {
        let err = config_error("[coordinator]\nmax_retries = 3\n");
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn test_remote_provider_needs_model() {
        let err = config_error("[generation]\nprovider = \"openai\"\n");
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn test_unknown_provider() {
        let err = config_error("[embedding]\nprovider = \"magic\"\n");
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let text = Config::default().to_toml().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.response.context_budget_chars, 6000);
    }
}
