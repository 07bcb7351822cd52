//! Generative-model trait.
//!
//! Concrete providers live in the app crate. The core only needs the
//! narrow contract: a prompt in, text out, or a [`ServiceError`].

use async_trait::async_trait;

use crate::error::ServiceError;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;
    /// Generate a completion for `prompt`, producing at most `max_tokens`.
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, ServiceError>;
}
