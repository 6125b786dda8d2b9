use super::{api_error, ChatMessage, ChatRequest, ChatResponse, LlmError};
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub host: String,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

impl Default for OllamaOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            num_predict: 2048,
        }
    }
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

pub async fn chat(client: &Client, config: &OllamaConfig, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
    let body = OllamaChatRequest {
        model: &request.model,
        messages: &request.messages,
        stream: false,
        options: OllamaOptions::default(),
    };

    let resp = client
        .post(format!("{}/api/chat", config.host))
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(api_error(resp).await);
    }

    let data: OllamaChatResponse = resp.json().await?;
    Ok(ChatResponse {
        content: data.message.content,
        model: request.model.clone(),
    })
}

/// Embeds `text` through `/api/embeddings`, falling back to the newer
/// `/api/embed` endpoint when the first call fails.
pub async fn embed(client: &Client, config: &OllamaConfig, model: &str, text: &str) -> Result<Vec<f32>, LlmError> {
    match embeddings_legacy(client, config, model, text).await {
        Ok(embedding) if !embedding.is_empty() => Ok(embedding),
        Ok(_) => embed_current(client, config, model, text).await,
        Err(e) => {
            tracing::warn!(error = %e, model, "embedding call failed, trying /api/embed");
            embed_current(client, config, model, text).await
        }
    }
}

async fn embeddings_legacy(client: &Client, config: &OllamaConfig, model: &str, text: &str) -> Result<Vec<f32>, LlmError> {
    let resp = client
        .post(format!("{}/api/embeddings", config.host))
        .json(&EmbeddingsRequest { model, prompt: text })
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(api_error(resp).await);
    }
    let data: EmbeddingsResponse = resp.json().await?;
    Ok(data.embedding)
}

async fn embed_current(client: &Client, config: &OllamaConfig, model: &str, text: &str) -> Result<Vec<f32>, LlmError> {
    let resp = client
        .post(format!("{}/api/embed", config.host))
        .json(&EmbedRequest { model, input: text })
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(api_error(resp).await);
    }
    let data: EmbedResponse = resp.json().await?;
    Ok(data.embeddings.into_iter().next().unwrap_or_default())
}
