//! Concrete embedding providers.
//!
//! Implements [`Embedder`] for:
//! - **[`HashingEmbedder`]**: deterministic local feature hashing. No
//!   network, no model download; the default so the binary works offline.
//! - **[`OpenAIEmbedder`]**: `POST /v1/embeddings`.
//! - **[`OllamaEmbedder`]**: `POST /api/embed` on a local Ollama instance.
//!
//! Providers make a single attempt per call. The ingestion and retrieval
//! agents own the per-call timeout and the coordinator owns the retry.
//!
//! # Provider Selection
//!
//! ```rust
//! # use agentic_rag::config::Config;
//! # use agentic_rag::embedding::create_embedder;
//! use agentic_rag::core::embedding::Embedder;
//!
//! let config = Config::default(); // provider = "hashing"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.dims(), 384);
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use agentic_rag_core::embedding::{normalize, Embedder};
use agentic_rag_core::ServiceError;

use crate::config::Config;
use crate::http;

/// Instantiate the embedder named by `config.embedding.provider`.
///
/// The embedder always produces `config.index.dimension`-length vectors
/// (remote providers are asked for that many dimensions).
pub fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let dims = config.index.dimension;
    let emb = &config.embedding;
    match emb.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(dims))),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Hashing Embedder ============

/// Bag-of-words feature hashing into a fixed number of buckets.
///
/// Each lower-cased alphanumeric token (and each adjacent token pair) is
/// hashed with SHA-256 to a bucket and a sign. The result is L2
/// normalised, so cosine and inner product rank identically.
pub struct HashingEmbedder {
    dims: usize,
    name: String,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            name: format!("hashing-{}", dims),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        if self.dims == 0 {
            return v;
        }
        let tokens = tokenize(text);
        for token in &tokens {
            self.add_feature(&mut v, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut v, bigram.as_bytes(), 0.5);
        }
        normalize(&mut v);
        v
    }

    fn add_feature(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let digest = Sha256::digest(feature);
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign * weight;
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        Ok(self.embed_sync(text))
    }
}

// ============ OpenAI Embedder ============

/// Embedding provider using the OpenAI API (or any compatible endpoint).
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dims: usize,
}

impl OpenAIEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        let model = config
            .embedding
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base_url = config
            .embedding
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let client = http::client(config.coordinator.call_timeout())?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dims: config.index.dimension,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "dimensions": self.dims,
        });
        let request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key));
        let json = http::post_json("OpenAI", request, &body).await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[0].embedding`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>, ServiceError> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| http::bad_response("OpenAI", "missing data[0].embedding"))?;
    to_vector("OpenAI", embedding)
}

// ============ Ollama Embedder ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default
/// `http://localhost:11434`). The model must already be pulled.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        let model = config
            .embedding
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let url = config
            .embedding
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = http::client(config.coordinator.call_timeout())?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims: config.index.dimension,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });
        let request = self.client.post(format!("{}/api/embed", self.url));
        let json = http::post_json("Ollama", request, &body).await?;
        parse_ollama_response(&json)
    }
}

/// Extract `embeddings[0]`.
fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>, ServiceError> {
    let embedding = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .and_then(|e| e.as_array())
        .ok_or_else(|| http::bad_response("Ollama", "missing embeddings[0]"))?;
    to_vector("Ollama", embedding)
}

fn to_vector(provider: &str, values: &[serde_json::Value]) -> Result<Vec<f32>, ServiceError> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| http::bad_response(provider, "non-numeric embedding value"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentic_rag_core::embedding::cosine_similarity;
    use agentic_rag_core::ServiceErrorKind;

    #[test]
    fn test_hashing_is_deterministic_and_normalized() {
        let e = HashingEmbedder::new(64);
        let a = e.embed_sync("Rust ownership and borrowing");
        let b = e.embed_sync("Rust ownership and borrowing");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hashing_similar_texts_score_higher() {
        let e = HashingEmbedder::new(384);
        let query = e.embed_sync("how does borrowing work in rust");
        let close = e.embed_sync("Borrowing in Rust lets you reference data without ownership.");
        let far = e.embed_sync("The quarterly sales report shows revenue growth in Europe.");
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn test_hashing_empty_text_is_zero_vector() {
        let e = HashingEmbedder::new(8);
        assert!(e.embed_sync("  ...  ").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_create_default_embedder() {
        let embedder = create_embedder(&Config::default()).unwrap();
        assert_eq!(embedder.dims(), 384);
        assert_eq!(embedder.model_name(), "hashing-384");
    }

    #[test]
    fn test_parse_openai_response() {
        let json = serde_json::json!({
            "data": [{ "embedding": [0.1, 0.2, 0.3], "index": 0 }]
        });
        let v = parse_openai_response(&json).unwrap();
        assert_eq!(v.len(), 3);
        assert!((v[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_parse_ollama_response_missing_field() {
        let json = serde_json::json!({ "model": "nomic-embed-text" });
        let err = parse_ollama_response(&json).unwrap_err();
        assert_eq!(err.kind, ServiceErrorKind::BadResponse);
    }
}
