pub mod ollama;
pub mod openai;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
}

/// Which configured model answers a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Simple,
    Reasoned,
}

/// LLM runtime backend: Ollama's native API or any OpenAI-compatible server.
#[derive(Debug, Clone)]
pub enum Provider {
    Ollama(ollama::OllamaConfig),
    OpenAi(openai::OpenAiConfig),
}

impl Provider {
    pub fn ollama(host: impl Into<String>) -> Self {
        Provider::Ollama(ollama::OllamaConfig {
            host: host.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn openai(api_key: String, base_url: impl Into<String>) -> Self {
        Provider::OpenAi(openai::OpenAiConfig {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Ollama(_) => "ollama",
            Provider::OpenAi(_) => "openai",
        }
    }

    pub async fn chat(&self, client: &Client, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        match self {
            Provider::Ollama(config) => ollama::chat(client, config, request).await,
            Provider::OpenAi(config) => openai::chat(client, config, request).await,
        }
    }

    pub async fn embed(&self, client: &Client, model: &str, text: &str) -> Result<Vec<f32>, LlmError> {
        let embedding = match self {
            Provider::Ollama(config) => ollama::embed(client, config, model, text).await?,
            Provider::OpenAi(config) => openai::embeddings(client, config, &[text.to_string()], model)
                .await?
                .into_iter()
                .next()
                .unwrap_or_default(),
        };
        if embedding.is_empty() {
            return Err(LlmError::Parse(format!("empty embedding from model {model}")));
        }
        Ok(embedding)
    }
}

/// Attempts and linear backoff applied to generation calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Runs `operation` until it succeeds or the policy is exhausted, sleeping
/// `delay * attempt` between tries. Returns the last error.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!(attempt, max_attempts = attempts, error = %e, "LLM call failed, retrying");
                tokio::time::sleep(policy.delay * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

impl Serialize for LlmError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Reads a failed response into [`LlmError::Api`].
pub(crate) async fn api_error(resp: reqwest::Response) -> LlmError {
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    LlmError::Api { status, message }
}
