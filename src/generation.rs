//! Concrete generative-model providers.
//!
//! - **[`OpenAIGenerator`]**: chat completions (`POST /v1/chat/completions`).
//! - **[`OllamaGenerator`]**: `POST /api/generate` with streaming off.
//! - **[`DisabledGenerator`]**: no model; answers with the retrieved
//!   context block so the pipeline still works offline.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use agentic_rag_core::generation::Generator;
use agentic_rag_core::ServiceError;

use crate::config::Config;
use crate::http;
use crate::prompt::{CONTEXT_HEADER, QUESTION_HEADER};

/// Instantiate the generator named by `config.generation.provider`.
pub fn create_generator(config: &Config) -> Result<Arc<dyn Generator>> {
    match config.generation.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

// ============ Disabled Generator ============

/// Stand-in used when `generation.provider = "disabled"`.
///
/// Returns the context section of the prompt verbatim, prefixed with a
/// notice, instead of calling a model.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, prompt: &str, _max_tokens: usize) -> Result<String, ServiceError> {
        let context = prompt
            .split_once(CONTEXT_HEADER)
            .map(|(_, rest)| rest)
            .and_then(|rest| rest.rsplit_once(QUESTION_HEADER).map(|(ctx, _)| ctx))
            .map(str::trim)
            .unwrap_or("");
        if context.is_empty() {
            return Ok("Generation is disabled and no context was retrieved.".to_string());
        }
        Ok(format!(
            "Generation is disabled. Most relevant passages:\n\n{}",
            context
        ))
    }
}

// ============ OpenAI Generator ============

pub struct OpenAIGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAIGenerator {
    pub fn new(config: &Config) -> Result<Self> {
        let model = config
            .generation
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base_url = config
            .generation
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let client = http::client(config.coordinator.call_timeout())?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": max_tokens,
            "temperature": 0.7,
        });
        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key));
        let json = http::post_json("OpenAI", request, &body).await?;
        parse_openai_completion(&json)
    }
}

fn parse_openai_completion(json: &serde_json::Value) -> Result<String, ServiceError> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.pointer("/message/content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| http::bad_response("OpenAI", "missing choices[0].message.content"))
}

// ============ Ollama Generator ============

pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(config: &Config) -> Result<Self> {
        let model = config
            .generation
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let url = config
            .generation
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = http::client(config.coordinator.call_timeout())?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "num_predict": max_tokens },
        });
        let request = self.client.post(format!("{}/api/generate", self.url));
        let json = http::post_json("Ollama", request, &body).await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| http::bad_response("Ollama", "missing response"))
    }
}
