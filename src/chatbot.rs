use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::{ModelSettings, ServerConfig};
use crate::db::models::SearchResult;
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::library::Library;
use crate::llm::{with_retry, ChatMessage, ChatRequest, ModelKind};
use crate::memory::{format_memories, Attachment, MemoryManager, DEFAULT_RECALL_LIMIT};
use crate::search::WebSearch;

pub const MAX_INPUT_CHARS: usize = 512;
const HISTORY_TURNS: usize = 20;

/// Body of `POST /chat`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatQuery {
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub reasoning: Option<bool>,
}

impl ChatQuery {
    fn model_kind(&self) -> ModelKind {
        let from_metadata = self
            .metadata
            .as_ref()
            .and_then(|m| m.get("isReasoningMode"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if self.reasoning.unwrap_or(false) || from_metadata {
            ModelKind::Reasoned
        } else {
            ModelKind::Simple
        }
    }

    fn is_web_search(&self) -> bool {
        self.kind.as_deref() == Some("web_search")
            || self
                .metadata
                .as_ref()
                .and_then(|m| m.get("isWebSearch"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }

    /// Results the caller already gathered, if any.
    fn search_results(&self) -> Vec<SearchResult> {
        if !self.is_web_search() {
            return Vec::new();
        }
        self.metadata
            .as_ref()
            .and_then(|m| m.get("searchResults"))
            .and_then(|r| serde_json::from_value(r.clone()).ok())
            .unwrap_or_default()
    }
}

/// Trimmed message, or the rejection the endpoint reports.
pub fn validate_message(message: &str) -> AppResult<&str> {
    let message = message.trim();
    if message.is_empty() {
        return Err(AppError::BadRequest("Empty input".into()));
    }
    if message.chars().count() > MAX_INPUT_CHARS {
        return Err(AppError::BadRequest("Input too long".into()));
    }
    Ok(message)
}

#[derive(Debug, Default)]
pub struct PromptParts<'a> {
    pub message: &'a str,
    pub document: Option<&'a str>,
    pub link: Option<&'a str>,
    pub context: Option<&'a str>,
    pub search_results: &'a [SearchResult],
    pub memories: Option<&'a str>,
}

/// Message first, then one titled section per non-empty source.
pub fn build_prompt(parts: &PromptParts<'_>) -> String {
    let mut prompt = parts.message.to_string();
    let mut section = |title: &str, body: &str| {
        if !body.trim().is_empty() {
            prompt.push_str(&format!("\n\n{title}:\n{}", body.trim()));
        }
    };

    section("Document Content", parts.document.unwrap_or(""));
    section("Link Content", parts.link.unwrap_or(""));
    section("Context", parts.context.unwrap_or(""));

    let results = parts
        .search_results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {} ({})\n{}", i + 1, r.title, r.url, r.snippet))
        .collect::<Vec<_>>()
        .join("\n");
    section("Web Search Results", &results);

    section("Relevant Context", parts.memories.unwrap_or(""));
    prompt
}

/// Body of a `/chat` reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatAnswer {
    pub response: String,
    #[serde(rename = "searchResults", skip_serializing_if = "Vec::is_empty")]
    pub search_results: Vec<SearchResult>,
}

pub struct Chatbot {
    db: Arc<Database>,
    library: Arc<Library>,
    memory: MemoryManager,
    search: WebSearch,
    client: Client,
    config: Arc<ServerConfig>,
    history: Mutex<HashMap<String, VecDeque<ChatMessage>>>,
}

impl Chatbot {
    pub fn new(db: Arc<Database>, library: Arc<Library>, client: Client, config: Arc<ServerConfig>) -> Self {
        Self {
            memory: MemoryManager::new(db.clone(), client.clone()),
            search: WebSearch::new(client.clone(), config.search_url.clone(), config.search_results),
            db,
            library,
            client,
            config,
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn model_settings(&self) -> ModelSettings {
        ModelSettings::resolve(&self.config, &self.db)
    }

    fn history_for(&self, conversation_id: &str) -> Vec<ChatMessage> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation_id)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn remember_turn(&self, conversation_id: &str, user: &str, assistant: &str) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let turns = history.entry(conversation_id.to_string()).or_default();
        turns.push_back(ChatMessage::user(user));
        turns.push_back(ChatMessage::assistant(assistant));
        while turns.len() > HISTORY_TURNS {
            turns.pop_front();
        }
    }

    pub async fn reply(&self, query: &ChatQuery) -> AppResult<ChatAnswer> {
        let message = validate_message(&query.message)?;
        let settings = self.model_settings();
        let kind = query.model_kind();

        let document = match query.document.as_deref().filter(|d| !d.is_empty()) {
            Some(name) => Some(
                self.library
                    .document(name)
                    .ok_or_else(|| AppError::NotFound("Document not found".into()))?,
            ),
            None => None,
        };
        let link = match query.link.as_deref().filter(|l| !l.is_empty()) {
            Some(id) => Some(
                self.library
                    .link(id)
                    .ok_or_else(|| AppError::NotFound("Link not found".into()))?,
            ),
            None => None,
        };

        let conversation_id = query.conversation_id.as_deref().filter(|c| !c.is_empty());
        let memories = match conversation_id {
            Some(conv) => match self
                .memory
                .retrieve(&settings, conv, message, DEFAULT_RECALL_LIMIT)
                .await
            {
                Ok(found) => format_memories(&found),
                Err(e) => {
                    tracing::warn!(conversation_id = conv, error = %e, "memory retrieval failed");
                    String::new()
                }
            },
            None => String::new(),
        };

        let mut search_results = query.search_results();
        if search_results.is_empty() && query.is_web_search() {
            search_results = self.search.search(message).await;
        }
        let prompt = build_prompt(&PromptParts {
            message,
            document: document.as_ref().map(|d| d.content.as_str()),
            link: link.as_ref().map(|l| l.content.as_str()),
            context: query.context.as_deref(),
            search_results: &search_results,
            memories: Some(&memories),
        });

        let mut messages = conversation_id.map(|c| self.history_for(c)).unwrap_or_default();
        messages.push(ChatMessage::user(prompt));
        let request = ChatRequest {
            messages,
            model: settings.model(kind).to_string(),
        };

        tracing::info!(
            provider = settings.provider.name(),
            model = %request.model,
            history = request.messages.len() - 1,
            "generating reply"
        );
        let provider = &settings.provider;
        let client = &self.client;
        let req = &request;
        let response = with_retry(&self.config.retry_policy(), move || provider.chat(client, req)).await?;
        let reply = response.content.trim().to_string();

        if let Some(conv) = conversation_id {
            self.remember_turn(conv, message, &reply);

            let documents: Vec<Attachment<'_>> = document
                .iter()
                .map(|d| Attachment {
                    name: &d.filename,
                    content: &d.content,
                })
                .collect();
            let links: Vec<Attachment<'_>> = link
                .iter()
                .map(|l| Attachment {
                    name: &l.id,
                    content: &l.content,
                })
                .collect();
            if let Err(e) = self
                .memory
                .store(&settings, conv, message, &reply, &documents, &links)
                .await
            {
                tracing::warn!(conversation_id = conv, error = %e, "failed to store memory");
            }
        }

        Ok(ChatAnswer {
            response: reply,
            search_results,
        })
    }
}
