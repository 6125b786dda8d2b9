use chrono::Utc;
use std::sync::Arc;

use super::{load_key, save_key, SessionError, SessionResult, CHATS_KEY};
use crate::db::models::{Chat, Message, Role, DEFAULT_CHAT_TITLE};
use crate::db::Database;

const TITLE_CHARS: usize = 30;

/// Partial update merged into a chat. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ChatUpdate {
    pub title: Option<String>,
    pub selected_documents: Option<Option<Vec<String>>>,
    pub selected_links: Option<Option<Vec<String>>>,
}

/// Title derived from a first user message.
pub fn derive_title(content: &str) -> Option<String> {
    let content = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if content.is_empty() {
        return None;
    }
    if content.chars().count() > TITLE_CHARS {
        let cut: String = content.chars().take(TITLE_CHARS).collect();
        Some(format!("{}...", cut.trim_end()))
    } else {
        Some(content)
    }
}

/// The conversation list, newest first, plus which one is current.
pub struct ConversationRegistry {
    db: Arc<Database>,
    chats: Vec<Chat>,
    current: Option<String>,
}

impl ConversationRegistry {
    /// Load persisted chats. The first one becomes current.
    pub fn load(db: Arc<Database>) -> SessionResult<Self> {
        let chats: Vec<Chat> = load_key(&db, CHATS_KEY)?;
        let current = chats.first().map(|c| c.id.clone());
        tracing::debug!(chats = chats.len(), "conversation registry loaded");
        Ok(Self { db, chats, current })
    }

    fn flush(&self) -> SessionResult<()> {
        save_key(&self.db, CHATS_KEY, &self.chats)
    }

    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn get(&self, id: &str) -> Option<&Chat> {
        self.chats.iter().find(|c| c.id == id)
    }

    fn get_mut(&mut self, id: &str) -> SessionResult<&mut Chat> {
        self.chats
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| SessionError::UnknownConversation(id.to_string()))
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current(&self) -> Option<&Chat> {
        self.current.as_deref().and_then(|id| self.get(id))
    }

    /// Prepend an empty chat and make it current.
    pub fn create(&mut self) -> SessionResult<String> {
        let chat = Chat::new();
        let id = chat.id.clone();
        self.chats.insert(0, chat);
        self.current = Some(id.clone());
        self.flush()?;
        tracing::info!(conversation_id = %id, "conversation created");
        Ok(id)
    }

    pub fn select(&mut self, id: &str) -> SessionResult<()> {
        if self.get(id).is_none() {
            return Err(SessionError::UnknownConversation(id.to_string()));
        }
        self.current = Some(id.to_string());
        Ok(())
    }

    pub fn update(&mut self, id: &str, update: ChatUpdate) -> SessionResult<()> {
        let chat = self.get_mut(id)?;
        if let Some(title) = update.title {
            chat.title = title;
        }
        if let Some(documents) = update.selected_documents {
            chat.selected_documents = documents;
        }
        if let Some(links) = update.selected_links {
            chat.selected_links = links;
        }
        chat.updated_at = Utc::now();
        self.flush()
    }

    pub fn rename(&mut self, id: &str, title: &str) -> SessionResult<()> {
        self.update(
            id,
            ChatUpdate {
                title: Some(title.trim().to_string()),
                ..Default::default()
            },
        )
    }

    /// Remove a chat. When it was current, the first remaining chat (if any)
    /// takes its place.
    pub fn delete(&mut self, id: &str) -> SessionResult<()> {
        let before = self.chats.len();
        self.chats.retain(|c| c.id != id);
        if self.chats.len() == before {
            return Err(SessionError::UnknownConversation(id.to_string()));
        }
        if self.current.as_deref() == Some(id) {
            self.current = self.chats.first().map(|c| c.id.clone());
        }
        self.flush()?;
        tracing::info!(conversation_id = id, "conversation deleted");
        Ok(())
    }

    /// Append to a chat's message log. The first user message names a chat
    /// still carrying the default title.
    pub fn append(&mut self, id: &str, message: Message) -> SessionResult<()> {
        let chat = self.get_mut(id)?;
        if chat.messages.iter().any(|m| m.id == message.id) {
            return Err(SessionError::DuplicateMessage(message.id));
        }

        let first_user = message.role == Role::User && chat.messages.iter().all(|m| m.role != Role::User);
        if first_user && chat.title == DEFAULT_CHAT_TITLE {
            let source = if message.content.trim().is_empty() {
                message_label(&message)
            } else {
                message.content.clone()
            };
            if let Some(title) = derive_title(&source) {
                chat.title = title;
            }
        }

        chat.messages.push(message);
        chat.updated_at = Utc::now();
        self.flush()
    }
}

fn message_label(message: &Message) -> String {
    use crate::db::models::MessageMetadata;
    match &message.metadata {
        Some(MessageMetadata::File(file)) => file.name.clone(),
        Some(MessageMetadata::Link(link)) => link.title.clone().unwrap_or_else(|| link.url.clone()),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::MessageType;

    fn registry() -> (Arc<Database>, ConversationRegistry) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = ConversationRegistry::load(db.clone()).unwrap();
        (db, registry)
    }

    fn user(content: &str) -> Message {
        Message::new(Role::User, MessageType::Text, content)
    }

    #[test]
    fn create_prepends_and_becomes_current() {
        let (_, mut reg) = registry();
        let first = reg.create().unwrap();
        let second = reg.create().unwrap();

        assert_eq!(reg.current_id(), Some(second.as_str()));
        assert_eq!(reg.chats()[0].id, second);
        assert_eq!(reg.chats()[1].id, first);
        assert!(reg.current().unwrap().messages.is_empty());
        assert_eq!(reg.current().unwrap().title, DEFAULT_CHAT_TITLE);
    }

    #[test]
    fn deleting_current_falls_back_to_first_remaining() {
        let (_, mut reg) = registry();
        let a = reg.create().unwrap();
        let b = reg.create().unwrap();
        let c = reg.create().unwrap();

        reg.select(&b).unwrap();
        reg.delete(&b).unwrap();
        assert_eq!(reg.current_id(), Some(c.as_str()));

        reg.delete(&a).unwrap();
        assert_eq!(reg.current_id(), Some(c.as_str()));

        reg.delete(&c).unwrap();
        assert_eq!(reg.current_id(), None);
        assert!(matches!(reg.delete(&c), Err(SessionError::UnknownConversation(_))));
    }

    #[test]
    fn first_user_message_names_chat() {
        let (_, mut reg) = registry();
        let id = reg.create().unwrap();
        reg.append(&id, user("Explain the borrow checker to me like I am five")).unwrap();
        reg.append(&id, user("second message")).unwrap();
        assert_eq!(reg.get(&id).unwrap().title, "Explain the borrow checker to...");
    }

    #[test]
    fn custom_title_is_kept() {
        let (_, mut reg) = registry();
        let id = reg.create().unwrap();
        reg.rename(&id, "Trip planning").unwrap();
        reg.append(&id, user("Hello")).unwrap();
        assert_eq!(reg.get(&id).unwrap().title, "Trip planning");
    }

    #[test]
    fn rename_bumps_updated_at_and_keeps_messages() {
        let (_, mut reg) = registry();
        let id = reg.create().unwrap();
        reg.append(&id, user("Hello")).unwrap();
        let before = reg.get(&id).unwrap().updated_at;

        reg.rename(&id, "  Greetings ").unwrap();
        let chat = reg.get(&id).unwrap();
        assert_eq!(chat.title, "Greetings");
        assert_eq!(chat.messages.len(), 1);
        assert!(chat.updated_at >= before);
    }

    #[test]
    fn duplicate_message_id_rejected() {
        let (_, mut reg) = registry();
        let id = reg.create().unwrap();
        let message = user("Hello");
        reg.append(&id, message.clone()).unwrap();
        assert!(matches!(reg.append(&id, message), Err(SessionError::DuplicateMessage(_))));
        assert_eq!(reg.get(&id).unwrap().messages.len(), 1);
    }

    #[test]
    fn persisted_list_round_trips() {
        let (db, mut reg) = registry();
        let a = reg.create().unwrap();
        reg.append(&a, user("Hello")).unwrap();
        let b = reg.create().unwrap();
        reg.append(&b, user("Bonjour")).unwrap();

        let reloaded = ConversationRegistry::load(db).unwrap();
        assert_eq!(reloaded.chats(), reg.chats());
        assert_eq!(reloaded.current_id(), Some(b.as_str()));
    }

    #[test]
    fn unknown_conversation_errors() {
        let (_, mut reg) = registry();
        assert!(matches!(reg.select("nope"), Err(SessionError::UnknownConversation(_))));
        assert!(matches!(reg.append("nope", user("x")), Err(SessionError::UnknownConversation(_))));
    }

    #[test]
    fn titles_collapse_whitespace() {
        assert_eq!(derive_title("  hi \n there "), Some("hi there".into()));
        assert_eq!(derive_title("   "), None);
    }
}
