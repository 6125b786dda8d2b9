use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::memory::{Attachment, MemoryPage, DEFAULT_RECALL_LIMIT};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageText {
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMemoryPayload {
    pub conversation_id: String,
    pub user_message: MessageText,
    pub bot_message: MessageText,
    #[serde(default)]
    pub documents: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveMemoryPayload {
    pub conversation_id: String,
    pub query: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ViewerQuery {
    #[serde(default = "first_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    pub conversation_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

fn first_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

pub async fn store_memory(
    State(state): State<AppState>,
    Json(payload): Json<StoreMemoryPayload>,
) -> AppResult<Json<Value>> {
    if payload.conversation_id.trim().is_empty() {
        return Err(AppError::BadRequest("conversationId is required".into()));
    }

    // Unknown names are skipped; the client may hold references the server has since dropped.
    let documents: Vec<_> = payload
        .documents
        .iter()
        .filter_map(|name| state.library.document(name))
        .collect();
    let links: Vec<_> = payload
        .links
        .iter()
        .filter_map(|id| state.library.link(id))
        .collect();
    let document_parts: Vec<Attachment<'_>> = documents
        .iter()
        .map(|d| Attachment {
            name: &d.filename,
            content: &d.content,
        })
        .collect();
    let link_parts: Vec<Attachment<'_>> = links
        .iter()
        .map(|l| Attachment {
            name: &l.id,
            content: &l.content,
        })
        .collect();

    let settings = state.chatbot.model_settings();
    let memory = state
        .chatbot
        .memory()
        .store(
            &settings,
            &payload.conversation_id,
            &payload.user_message.text,
            &payload.bot_message.text,
            &document_parts,
            &link_parts,
        )
        .await?;

    Ok(Json(json!({
        "message": "Memory stored successfully",
        "memory": memory,
    })))
}

pub async fn retrieve_memory(
    State(state): State<AppState>,
    Json(payload): Json<RetrieveMemoryPayload>,
) -> AppResult<Json<Value>> {
    let settings = state.chatbot.model_settings();
    let memories = state
        .chatbot
        .memory()
        .retrieve(
            &settings,
            &payload.conversation_id,
            &payload.query,
            payload.limit.unwrap_or(DEFAULT_RECALL_LIMIT),
        )
        .await?;
    Ok(Json(json!({ "memories": memories })))
}

pub async fn memory_viewer(
    State(state): State<AppState>,
    Query(query): Query<ViewerQuery>,
) -> AppResult<Json<MemoryPage>> {
    let page = state.chatbot.memory().page(
        query.page,
        query.page_size,
        query.conversation_id.as_deref().filter(|c| !c.is_empty()),
        query.kind.as_deref().filter(|k| !k.is_empty()),
    )?;
    Ok(Json(page))
}
