use super::{api_error, ChatMessage, ChatRequest, ChatResponse, LlmError};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
}

impl OpenAiConfig {
    fn post(&self, client: &Client, path: &str) -> RequestBuilder {
        let req = client.post(format!("{}{}", self.base_url, path));
        if self.api_key.is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_key)
        }
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: ChatMessage,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub async fn chat(client: &Client, config: &OpenAiConfig, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
    let body = OpenAiRequest {
        model: &request.model,
        messages: &request.messages,
        stream: false,
    };

    let resp = config
        .post(client, "/chat/completions")
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(api_error(resp).await);
    }

    let data: OpenAiResponse = resp.json().await?;
    let content = data
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| LlmError::Parse("response has no choices".into()))?;

    Ok(ChatResponse {
        content,
        model: request.model.clone(),
    })
}

pub async fn embeddings(
    client: &Client,
    config: &OpenAiConfig,
    texts: &[String],
    model: &str,
) -> Result<Vec<Vec<f32>>, LlmError> {
    let resp = config
        .post(client, "/embeddings")
        .json(&EmbeddingRequest { model, input: texts })
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(api_error(resp).await);
    }

    let data: EmbeddingResponse = resp.json().await?;
    Ok(data.data.into_iter().map(|d| d.embedding).collect())
}
