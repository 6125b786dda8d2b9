use chrono::Utc;
use futures::future::try_join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::ModelSettings;
use crate::db::models::MemoryRecord;
use crate::db::Database;
use crate::doc_processor::chunk_text;
use crate::embedding::{bytes_to_embedding, embedding_to_bytes, rank_by_similarity};
use crate::error::{AppError, AppResult};

const CHUNK_SIZE: usize = 1000;
const CHUNK_OVERLAP: usize = 100;
const PREVIEW_CHARS: usize = 200;
pub const DEFAULT_RECALL_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    UserMessage,
    BotMessage,
    Document,
    Link,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::UserMessage => "user_message",
            MemoryKind::BotMessage => "bot_message",
            MemoryKind::Document => "document",
            MemoryKind::Link => "link",
        }
    }
}

/// One exchange as it was stored, echoed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub user_message: String,
    pub bot_message: String,
    pub documents: Vec<String>,
    pub links: Vec<String>,
    pub timestamp: String,
    pub conversation_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalledMemory {
    pub text: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Named attachment content stored alongside an exchange.
pub struct Attachment<'a> {
    pub name: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryPage {
    pub entries: Vec<MemoryRecord>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

pub struct MemoryManager {
    db: Arc<Database>,
    client: Client,
}

impl MemoryManager {
    pub fn new(db: Arc<Database>, client: Client) -> Self {
        Self { db, client }
    }

    async fn embed_all(&self, settings: &ModelSettings, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let calls = texts
            .iter()
            .map(|text| settings.provider.embed(&self.client, &settings.embedding_model, text));
        try_join_all(calls).await.map_err(|e| {
            tracing::error!(error = %e, model = %settings.embedding_model, "embedding failed");
            AppError::Unavailable("Embedding service unavailable".into())
        })
    }

    /// Embed and store one exchange plus the content of any attachments,
    /// chunked. Nothing is written unless every embedding succeeds.
    pub async fn store(
        &self,
        settings: &ModelSettings,
        conversation_id: &str,
        user_message: &str,
        bot_message: &str,
        documents: &[Attachment<'_>],
        links: &[Attachment<'_>],
    ) -> AppResult<MemoryEntry> {
        let timestamp = Utc::now().to_rfc3339();

        let mut items: Vec<(MemoryKind, String)> = vec![
            (MemoryKind::UserMessage, user_message.to_string()),
            (MemoryKind::BotMessage, bot_message.to_string()),
        ];
        for doc in documents {
            for chunk in chunk_text(doc.content, CHUNK_SIZE, CHUNK_OVERLAP) {
                items.push((MemoryKind::Document, chunk));
            }
        }
        for link in links {
            for chunk in chunk_text(link.content, CHUNK_SIZE, CHUNK_OVERLAP) {
                items.push((MemoryKind::Link, chunk));
            }
        }
        items.retain(|(_, text)| !text.trim().is_empty());

        let texts: Vec<String> = items.iter().map(|(_, t)| t.clone()).collect();
        let embeddings = self.embed_all(settings, &texts).await?;

        for ((kind, text), embedding) in items.into_iter().zip(embeddings) {
            let record = MemoryRecord {
                id: uuid::Uuid::new_v4().to_string(),
                conversation_id: conversation_id.to_string(),
                kind: kind.as_str().to_string(),
                text,
                timestamp: timestamp.clone(),
            };
            self.db.insert_memory(&record, &embedding_to_bytes(&embedding))?;
        }
        tracing::debug!(conversation_id, "memory stored");

        Ok(MemoryEntry {
            user_message: user_message.to_string(),
            bot_message: bot_message.to_string(),
            documents: documents.iter().map(|d| d.name.to_string()).collect(),
            links: links.iter().map(|l| l.name.to_string()).collect(),
            timestamp,
            conversation_id: conversation_id.to_string(),
        })
    }

    /// Memories of `conversation_id` most similar to `query`, best first.
    pub async fn retrieve(
        &self,
        settings: &ModelSettings,
        conversation_id: &str,
        query: &str,
        limit: usize,
    ) -> AppResult<Vec<RecalledMemory>> {
        let rows = self.db.memories_with_embeddings(conversation_id)?;
        if rows.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embed_all(settings, &[query.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let (records, embeddings): (Vec<MemoryRecord>, Vec<Vec<f32>>) = rows
            .into_iter()
            .map(|(record, bytes)| (record, bytes_to_embedding(&bytes)))
            .unzip();

        Ok(rank_by_similarity(&query_embedding, &embeddings, limit)
            .into_iter()
            .map(|(i, _)| {
                let record = &records[i];
                RecalledMemory {
                    text: record.text.clone(),
                    timestamp: record.timestamp.clone(),
                    kind: record.kind.clone(),
                }
            })
            .collect())
    }

    /// Paginated listing for the memory viewer; text is cut to a preview.
    pub fn page(
        &self,
        page: usize,
        page_size: usize,
        conversation_id: Option<&str>,
        kind: Option<&str>,
    ) -> AppResult<MemoryPage> {
        if page < 1 {
            return Err(AppError::BadRequest("page must be at least 1".into()));
        }
        if !(1..=100).contains(&page_size) {
            return Err(AppError::BadRequest("page_size must be between 1 and 100".into()));
        }

        let all = self.db.list_memories(conversation_id, kind)?;
        let total = all.len();
        let entries = all
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .map(|mut record| {
                record.text = preview(&record.text);
                record
            })
            .collect();

        Ok(MemoryPage {
            entries,
            total,
            page,
            page_size,
        })
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let cut: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

/// Render recalled memories as a prompt section body.
pub fn format_memories(memories: &[RecalledMemory]) -> String {
    memories
        .iter()
        .map(|m| format!("Memory ({}):\n{}", m.kind, m.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}
