//! Generative model trait.
//!
//! The tutorial pipeline only needs "prompt in, text out". Concrete
//! backends (Anthropic, OpenAI, Ollama) are built by the app crate's
//! generator factory from configuration.

use async_trait::async_trait;

use crate::error::Result;

/// A text-completion backend.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Model identifier, recorded in logs.
    fn model_name(&self) -> &str;

    /// Generate a completion for `prompt`. Transport or API failures map to
    /// [`crate::Error::Generation`].
    async fn generate(&self, prompt: &str) -> Result<String>;
}
