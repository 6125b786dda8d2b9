use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::attachments::ReferenceKind;
use super::client::{ChatBackend, ChatPayload, ChatReply, ProcessedLink};
use super::registry::{ChatUpdate, ConversationRegistry};
use super::{load_key, save_key, Attachments, SessionError, SessionResult, SETTINGS_KEY};
use crate::db::models::{
    DocumentRef, FileMetadata, LinkMetadata, LinkRef, Message, MessageMetadata, MessageType, Role, SessionSettings,
    WebSearchMetadata,
};
use crate::db::Database;
use crate::doc_processor::{guess_mime, is_allowed_mime};

/// How a dispatched chat request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// The assistant reply, appended to the originating conversation.
    Confirmed(Message),
    /// A synthetic assistant message describing the failure, also appended.
    Failed(Message),
    /// Cancelled by a conversation switch, or the conversation is gone.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub message: Message,
    /// Set when extraction failed and the file was attached without content.
    pub warning: Option<String>,
}

/// A chat request whose user message is already in the store.
#[derive(Debug)]
pub struct PendingReply {
    conversation_id: String,
    message_id: String,
    token: CancellationToken,
    payload: ChatPayload,
}

#[derive(Debug)]
enum Outcome {
    Replied(ChatReply),
    Failed(SessionError),
    Cancelled,
}

/// A finished request, ready to be folded back into the store.
#[derive(Debug)]
pub struct SettledReply {
    conversation_id: String,
    message_id: String,
    outcome: Outcome,
}

impl PendingReply {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn payload(&self) -> &ChatPayload {
        &self.payload
    }

    /// Cancels this request only. A conversation switch cancels every
    /// request dispatched before it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run the request. Holds no borrow of the session, so the user may
    /// switch conversations while it is in flight.
    pub async fn resolve<B: ChatBackend + ?Sized>(self, backend: &B) -> SettledReply {
        let outcome = tokio::select! {
            biased;
            _ = self.token.cancelled() => Outcome::Cancelled,
            result = backend.chat(&self.payload) => match result {
                Ok(reply) => Outcome::Replied(reply),
                Err(e) => Outcome::Failed(e),
            },
        };
        SettledReply {
            conversation_id: self.conversation_id,
            message_id: self.message_id,
            outcome,
        }
    }
}

/// The dispatch layer: turns user actions into messages, calls the backend
/// and reconciles replies into the conversation they came from.
pub struct ChatSession<B> {
    backend: Arc<B>,
    db: Arc<Database>,
    registry: ConversationRegistry,
    attachments: Attachments,
    settings: SessionSettings,
    cancel_on_switch: bool,
    switch_token: CancellationToken,
}

impl<B: ChatBackend> ChatSession<B> {
    pub fn open(db: Arc<Database>, backend: B) -> SessionResult<Self> {
        Ok(Self {
            backend: Arc::new(backend),
            registry: ConversationRegistry::load(db.clone())?,
            attachments: Attachments::load(db.clone())?,
            settings: load_key(&db, SETTINGS_KEY)?,
            db,
            cancel_on_switch: true,
            switch_token: CancellationToken::new(),
        })
    }

    /// With `false`, switching conversations leaves in-flight requests
    /// running; their replies still land where they were sent from.
    pub fn with_cancel_on_switch(mut self, enabled: bool) -> Self {
        self.cancel_on_switch = enabled;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &ConversationRegistry {
        &self.registry
    }

    pub fn attachments(&self) -> &Attachments {
        &self.attachments
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    // ── Conversations ──

    fn switched(&mut self) {
        if self.cancel_on_switch {
            self.switch_token.cancel();
            self.switch_token = CancellationToken::new();
        }
    }

    pub fn create_conversation(&mut self) -> SessionResult<String> {
        let id = self.registry.create()?;
        self.switched();
        Ok(id)
    }

    pub fn select_conversation(&mut self, id: &str) -> SessionResult<()> {
        if self.registry.current_id() == Some(id) {
            return Ok(());
        }
        self.registry.select(id)?;
        self.switched();
        Ok(())
    }

    pub fn rename_conversation(&mut self, id: &str, title: &str) -> SessionResult<()> {
        self.registry.rename(id, title)
    }

    pub fn delete_conversation(&mut self, id: &str) -> SessionResult<()> {
        let was_current = self.registry.current_id() == Some(id);
        self.registry.delete(id)?;
        if was_current {
            self.switched();
        }
        Ok(())
    }

    fn ensure_current(&mut self) -> SessionResult<String> {
        match self.registry.current_id() {
            Some(id) => Ok(id.to_string()),
            None => self.create_conversation(),
        }
    }

    // ── Toggles and references ──

    pub fn set_web_search(&mut self, enabled: bool) -> SessionResult<()> {
        self.settings.is_web_search = enabled;
        save_key(&self.db, SETTINGS_KEY, &self.settings)
    }

    pub fn set_reasoning_mode(&mut self, enabled: bool) -> SessionResult<()> {
        self.settings.is_reasoning_mode = enabled;
        save_key(&self.db, SETTINGS_KEY, &self.settings)
    }

    pub fn toggle_selected(&mut self, id: &str) -> SessionResult<bool> {
        self.attachments.toggle_selected(id)
    }

    pub fn update_conversation(&mut self, id: &str, update: ChatUpdate) -> SessionResult<()> {
        self.registry.update(id, update)
    }

    /// Flip a reference in the current chat's own selection list. The first
    /// toggle seeds the list from the global `selected` flags.
    pub fn toggle_in_conversation(&mut self, reference_id: &str) -> SessionResult<bool> {
        let kind = self
            .attachments
            .kind_of(reference_id)
            .ok_or_else(|| SessionError::UnknownReference(reference_id.to_string()))?;
        let chat_id = self.ensure_current()?;
        let chat = self
            .registry
            .get(&chat_id)
            .ok_or_else(|| SessionError::UnknownConversation(chat_id.clone()))?;

        let mut ids = match kind {
            ReferenceKind::Document => chat.selected_documents.clone().unwrap_or_else(|| {
                self.attachments.documents().iter().filter(|d| d.selected).map(|d| d.id.clone()).collect()
            }),
            ReferenceKind::Link => chat.selected_links.clone().unwrap_or_else(|| {
                self.attachments.links().iter().filter(|l| l.selected).map(|l| l.id.clone()).collect()
            }),
        };
        let selected = match ids.iter().position(|id| id == reference_id) {
            Some(pos) => {
                ids.remove(pos);
                false
            }
            None => {
                ids.push(reference_id.to_string());
                true
            }
        };

        let update = match kind {
            ReferenceKind::Document => ChatUpdate {
                selected_documents: Some(Some(ids)),
                ..Default::default()
            },
            ReferenceKind::Link => ChatUpdate {
                selected_links: Some(Some(ids)),
                ..Default::default()
            },
        };
        self.registry.update(&chat_id, update)?;
        Ok(selected)
    }

    /// Drop the current chat's own selection lists so the global flags apply again.
    pub fn reset_conversation_selection(&mut self) -> SessionResult<()> {
        let Some(id) = self.registry.current_id().map(str::to_string) else {
            return Ok(());
        };
        self.registry.update(
            &id,
            ChatUpdate {
                selected_documents: Some(None),
                selected_links: Some(None),
                ..Default::default()
            },
        )
    }

    /// Delete a document or link on the backend, then locally. A reference
    /// the backend no longer knows is still removed here.
    pub async fn delete_reference(&mut self, id: &str) -> SessionResult<()> {
        let kind = self
            .attachments
            .kind_of(id)
            .ok_or_else(|| SessionError::UnknownReference(id.to_string()))?;
        let result = match kind {
            ReferenceKind::Document => self.backend.delete_document(id).await,
            ReferenceKind::Link => self.backend.delete_link(id).await,
        };
        match result {
            Ok(()) => {}
            Err(SessionError::NotFound(detail)) => {
                tracing::warn!(reference = id, detail = %detail, "reference already gone on the backend");
            }
            Err(e) => return Err(e),
        }
        self.attachments.delete(id)
    }

    /// Reload documents and links from the backend's listings.
    pub async fn refresh_references(&mut self) -> SessionResult<()> {
        let documents = self
            .backend
            .list_documents()
            .await?
            .into_iter()
            .map(|d| DocumentRef {
                id: d.id,
                name: d.filename,
                content: d.content,
                mime_type: d.mime_type,
                selected: false,
            })
            .collect();
        let links = self.backend.list_links().await?.into_iter().map(link_ref).collect();
        self.attachments.sync(documents, links)
    }

    // ── Text ──

    /// Phase one: store the user message and prepare the request.
    pub fn begin_text(&mut self, input: &str) -> SessionResult<PendingReply> {
        let text = input.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyInput);
        }

        let conversation_id = self.ensure_current()?;
        let kind = if self.settings.is_web_search {
            MessageType::WebSearch
        } else {
            MessageType::Text
        };
        let message = Message::new(Role::User, kind, text);
        let message_id = message.id.clone();
        self.registry.append(&conversation_id, message)?;

        let context = self.attachments.context(self.registry.get(&conversation_id));
        let payload = ChatPayload {
            message: text.to_string(),
            kind: kind.as_str().to_string(),
            metadata: json!({
                "isWebSearch": self.settings.is_web_search,
                "isReasoningMode": self.settings.is_reasoning_mode,
            }),
            context,
            conversation_id: conversation_id.clone(),
            reasoning: self.settings.is_reasoning_mode,
        };
        tracing::debug!(conversation_id = %conversation_id, message_id = %message_id, "dispatching message");

        Ok(PendingReply {
            conversation_id,
            message_id,
            token: self.switch_token.child_token(),
            payload,
        })
    }

    /// Phase two: fold a finished request into the conversation captured
    /// when it was dispatched.
    pub fn reconcile(&mut self, settled: SettledReply) -> SessionResult<Delivery> {
        let conversation_id = settled.conversation_id;
        let reply = match settled.outcome {
            Outcome::Cancelled => {
                tracing::info!(conversation_id = %conversation_id, message_id = %settled.message_id, "request cancelled");
                return Ok(Delivery::Cancelled);
            }
            Outcome::Replied(reply) => Delivery::Confirmed(assistant_message(reply)),
            Outcome::Failed(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "chat request failed");
                Delivery::Failed(Message::new(
                    Role::Assistant,
                    MessageType::Text,
                    format!("Sorry, I encountered an error: {e}"),
                ))
            }
        };

        if self.registry.get(&conversation_id).is_none() {
            tracing::info!(conversation_id = %conversation_id, "conversation deleted before reply arrived, dropping it");
            return Ok(Delivery::Cancelled);
        }
        let message = match &reply {
            Delivery::Confirmed(m) | Delivery::Failed(m) => m.clone(),
            Delivery::Cancelled => return Ok(Delivery::Cancelled),
        };
        self.registry.append(&conversation_id, message)?;
        Ok(reply)
    }

    /// Send a text message and wait for the reply.
    pub async fn send_text(&mut self, input: &str) -> SessionResult<Delivery> {
        let pending = self.begin_text(input)?;
        let settled = pending.resolve(self.backend.as_ref()).await;
        self.reconcile(settled)
    }

    // ── Files ──

    /// Upload a file for extraction. Unsupported types are rejected before
    /// any network call; extraction failures still attach the file, empty.
    pub async fn upload_file(&mut self, filename: &str, mime_type: &str, bytes: Vec<u8>) -> SessionResult<UploadOutcome> {
        if !is_allowed_mime(mime_type) {
            tracing::warn!(filename, mime_type, "rejected unsupported file type");
            return Err(SessionError::UnsupportedFileType(mime_type.to_string()));
        }

        let size = bytes.len() as u64;
        let (content, warning) = match self.backend.upload_document(filename, mime_type, bytes).await {
            Ok(uploaded) => {
                self.attachments.add_document(DocumentRef {
                    id: uploaded.filename.clone(),
                    name: uploaded.filename,
                    content: uploaded.content.clone(),
                    mime_type: uploaded.metadata.mime_type,
                    selected: true,
                })?;
                (uploaded.content, None)
            }
            Err(e) => {
                tracing::warn!(filename, error = %e, "document extraction failed, attaching without content");
                (String::new(), Some(format!("Could not extract text from {filename}: {e}")))
            }
        };

        let message = Message::new(Role::User, MessageType::File, filename).with_metadata(MessageMetadata::File(
            FileMetadata {
                name: filename.to_string(),
                mime_type: mime_type.to_string(),
                size,
                content,
            },
        ));
        let conversation_id = self.ensure_current()?;
        self.registry.append(&conversation_id, message.clone())?;
        Ok(UploadOutcome { message, warning })
    }

    pub async fn upload_path(&mut self, path: &Path) -> SessionResult<UploadOutcome> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SessionError::UnsupportedFileType(path.display().to_string()))?
            .to_string();
        let mime_type = guess_mime(&filename);
        if !is_allowed_mime(mime_type) {
            tracing::warn!(filename = %filename, "rejected unsupported file type");
            return Err(SessionError::UnsupportedFileType(filename));
        }
        let bytes = tokio::fs::read(path).await?;
        self.upload_file(&filename, mime_type, bytes).await
    }

    // ── Links ──

    /// Process a link. Nothing is appended unless the backend succeeds.
    pub async fn submit_link(&mut self, input: &str) -> SessionResult<Message> {
        let url = Url::parse(input.trim())
            .ok()
            .filter(|u| u.has_host())
            .ok_or(SessionError::InvalidUrl)?;

        let link = self.backend.upload_link(url.as_str()).await?;
        let metadata = LinkMetadata {
            url: link.url.clone(),
            title: link.title.clone(),
            description: link.description.clone(),
            image: link.image.clone(),
        };
        self.attachments.add_link(LinkRef {
            selected: true,
            ..link_ref(link)
        })?;

        let message = Message::new(Role::User, MessageType::Link, metadata.url.clone())
            .with_metadata(MessageMetadata::Link(metadata));
        let conversation_id = self.ensure_current()?;
        self.registry.append(&conversation_id, message.clone())?;
        Ok(message)
    }
}

/// Replies that came with search results carry them as metadata.
fn assistant_message(reply: ChatReply) -> Message {
    if reply.search_results.is_empty() {
        return Message::new(Role::Assistant, MessageType::Text, reply.response);
    }
    Message::new(Role::Assistant, MessageType::WebSearch, reply.response).with_metadata(MessageMetadata::WebSearch(
        WebSearchMetadata {
            results: reply.search_results,
        },
    ))
}

fn link_ref(link: ProcessedLink) -> LinkRef {
    LinkRef {
        id: link.id,
        url: link.url,
        title: link.title,
        description: link.description,
        image: link.image,
        content: link.content,
        selected: false,
    }
}
