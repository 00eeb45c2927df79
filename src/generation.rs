//! Generative model backends for tutorial generation.
//!
//! | Config Value | Backend | Endpoint |
//! |--------------|---------|----------|
//! | `"anthropic"` | [`AnthropicGenerator`] | `POST /v1/messages` |
//! | `"openai"` | [`OpenAIGenerator`] | `POST /v1/chat/completions` |
//! | `"ollama"` | [`OllamaGenerator`] | `POST /api/generate` |
//! | `"disabled"` | [`DisabledGenerator`] | none; every call fails |
//!
//! Remote calls go through [`crate::retry::post_json`] and fail with
//! [`Error::Generation`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use knowledge_harness_core::generation::GenerativeModel;
use knowledge_harness_core::{Error, Result};

use crate::config::GenerationConfig;
use crate::retry;

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Placeholder used when `generation.provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl GenerativeModel for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(Error::generation(
            "generation is disabled; set [generation] provider in the config",
        ))
    }
}

/// Shared settings of the HTTP-backed generators.
struct Remote {
    client: reqwest::Client,
    model: String,
    max_tokens: u32,
    max_retries: u32,
}

impl Remote {
    fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            anyhow::anyhow!("generation.model required for provider '{}'", config.provider)
        })?;
        Ok(Self {
            client: retry::client(config.timeout_secs)?,
            model,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    async fn post(
        &self,
        service: &str,
        url: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<Value> {
        retry::post_json(&self.client, service, url, headers, body, self.max_retries)
            .await
            .map_err(Error::generation)
    }
}

fn api_key(var: &str) -> anyhow::Result<String> {
    std::env::var(var).map_err(|_| anyhow::anyhow!("{} environment variable not set", var))
}

// ============ Anthropic ============

pub struct AnthropicGenerator {
    remote: Remote,
    api_key: String,
}

impl AnthropicGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        Ok(Self {
            remote: Remote::new(config)?,
            api_key: api_key("ANTHROPIC_API_KEY")?,
        })
    }
}

#[async_trait]
impl GenerativeModel for AnthropicGenerator {
    fn model_name(&self) -> &str {
        &self.remote.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.remote.model,
            "max_tokens": self.remote.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });
        let headers = [
            ("x-api-key", self.api_key.clone()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ];
        let response = self
            .remote
            .post("Anthropic", ANTHROPIC_URL, &headers, &body)
            .await?;
        anthropic_text(&response)
    }
}

/// Concatenate the `text` blocks of a Messages API response.
fn anthropic_text(json: &Value) -> Result<String> {
    let blocks = json
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::generation("invalid Anthropic response: missing content"))?;
    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        return Err(Error::generation("Anthropic response contained no text"));
    }
    Ok(text)
}

// ============ OpenAI ============

pub struct OpenAIGenerator {
    remote: Remote,
    api_key: String,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        Ok(Self {
            remote: Remote::new(config)?,
            api_key: api_key("OPENAI_API_KEY")?,
        })
    }
}

#[async_trait]
impl GenerativeModel for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.remote.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.remote.model,
            "max_tokens": self.remote.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });
        let headers = [("Authorization", format!("Bearer {}", self.api_key))];
        let response = self
            .remote
            .post("OpenAI", OPENAI_CHAT_URL, &headers, &body)
            .await?;
        response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::generation("invalid OpenAI response: missing message content"))
    }
}

// ============ Ollama ============

pub struct OllamaGenerator {
    remote: Remote,
    url: String,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Ok(Self {
            remote: Remote::new(config)?,
            url,
        })
    }
}

#[async_trait]
impl GenerativeModel for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.remote.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.remote.model,
            "prompt": prompt,
            "stream": false,
            "options": {"num_predict": self.remote.max_tokens},
        });
        let url = format!("{}/api/generate", self.url.trim_end_matches('/'));
        let response = self.remote.post("Ollama", &url, &[], &body).await?;
        response
            .get("response")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::generation("invalid Ollama response: missing response"))
    }
}

/// Build the [`GenerativeModel`] named by `config.provider`.
pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn GenerativeModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "anthropic" => Ok(Arc::new(AnthropicGenerator::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}
