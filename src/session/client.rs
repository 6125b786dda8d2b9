use async_trait::async_trait;
use reqwest::{multipart, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{SessionError, SessionResult};
use crate::db::models::SearchResult;

/// What the session sends to `POST /chat`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatPayload {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub metadata: Value,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub context: String,
    pub conversation_id: String,
    pub reasoning: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatReply {
    pub response: String,
    #[serde(default, rename = "searchResults")]
    pub search_results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadMetadata {
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadedDocument {
    /// Name the backend stored the file under.
    pub filename: String,
    pub content: String,
    pub metadata: UploadMetadata,
}

/// An entry of `GET /documents`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type")]
    pub mime_type: String,
}

/// A link as `POST /link_upload` and `GET /links` return it.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessedLink {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Deserialize)]
struct LinkReply {
    link: ProcessedLink,
}

#[derive(Deserialize)]
struct DocumentList {
    documents: Vec<RemoteDocument>,
}

#[derive(Deserialize)]
struct LinkList {
    links: Vec<ProcessedLink>,
}

/// The backend endpoints the dispatch layer calls.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, payload: &ChatPayload) -> SessionResult<ChatReply>;

    async fn upload_document(&self, filename: &str, mime_type: &str, bytes: Vec<u8>) -> SessionResult<UploadedDocument>;

    async fn upload_link(&self, url: &str) -> SessionResult<ProcessedLink>;

    async fn list_documents(&self) -> SessionResult<Vec<RemoteDocument>>;

    async fn list_links(&self) -> SessionResult<Vec<ProcessedLink>>;

    async fn delete_document(&self, filename: &str) -> SessionResult<()>;

    async fn delete_link(&self, id: &str) -> SessionResult<()>;
}

pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json(&self, path: &str, body: &Value) -> SessionResult<Response> {
        let resp = self.client.post(self.url(path)).json(body).send().await?;
        check(resp).await
    }

    async fn get(&self, path: &str) -> SessionResult<Response> {
        let resp = self.client.get(self.url(path)).send().await?;
        check(resp).await
    }
}

/// Pass a successful response through; otherwise surface the backend's
/// `detail` message.
async fn check(resp: Response) -> SessionResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));
    if status == StatusCode::NOT_FOUND {
        return Err(SessionError::NotFound(detail));
    }
    Err(SessionError::Backend(detail))
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn chat(&self, payload: &ChatPayload) -> SessionResult<ChatReply> {
        let resp = self.client.post(self.url("/chat")).json(payload).send().await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn upload_document(&self, filename: &str, mime_type: &str, bytes: Vec<u8>) -> SessionResult<UploadedDocument> {
        let part = multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime_type)?;
        let form = multipart::Form::new().part("file", part);
        let resp = self
            .client
            .post(self.url("/document_upload"))
            .multipart(form)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn upload_link(&self, url: &str) -> SessionResult<ProcessedLink> {
        let reply: LinkReply = self.post_json("/link_upload", &json!({ "url": url })).await?.json().await?;
        Ok(reply.link)
    }

    async fn list_documents(&self) -> SessionResult<Vec<RemoteDocument>> {
        let list: DocumentList = self.get("/documents").await?.json().await?;
        Ok(list.documents)
    }

    async fn list_links(&self) -> SessionResult<Vec<ProcessedLink>> {
        let list: LinkList = self.get("/links").await?.json().await?;
        Ok(list.links)
    }

    async fn delete_document(&self, filename: &str) -> SessionResult<()> {
        self.post_json("/document_delete", &json!({ "filename": filename })).await?;
        Ok(())
    }

    async fn delete_link(&self, id: &str) -> SessionResult<()> {
        self.post_json("/link_delete", &json!({ "filename": id })).await?;
        Ok(())
    }
}
