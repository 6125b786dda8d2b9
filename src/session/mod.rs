//! Client-side chat session state.
//!
//! The registry, attachment references and toggles are each persisted under
//! one key of the `state` table and rewritten after every mutation, so the
//! store on disk always matches what the user last saw.

pub mod attachments;
pub mod client;
pub mod dispatch;
pub mod registry;

pub use attachments::{Attachments, ReferenceKind};
pub use client::{ChatBackend, ChatReply, HttpBackend};
pub use dispatch::{ChatSession, Delivery};
pub use registry::ConversationRegistry;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::db::Database;

pub const CHATS_KEY: &str = "chats";
pub const DOCUMENTS_KEY: &str = "documents";
pub const LINKS_KEY: &str = "links";
pub const SETTINGS_KEY: &str = "settings";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Message cannot be empty")]
    EmptyInput,

    #[error("Please enter a valid URL")]
    InvalidUrl,

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Conversation not found: {0}")]
    UnknownConversation(String),

    #[error("Reference not found: {0}")]
    UnknownReference(String),

    #[error("Message {0} already exists in this conversation")]
    DuplicateMessage(String),

    #[error("{0}")]
    Backend(String),

    /// The backend answered 404.
    #[error("{0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Read a persisted key. A value that no longer parses is moved aside to
/// `<key>.corrupt` and the default is returned, so one bad write cannot
/// lock the user out of the app.
pub(crate) fn load_key<T: DeserializeOwned + Default>(db: &Database, key: &str) -> SessionResult<T> {
    let Some(raw) = db.get_state(key)? else {
        return Ok(T::default());
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::warn!(key, error = %e, "persisted state is malformed, starting empty");
            db.set_state(&format!("{key}.corrupt"), &raw)?;
            db.delete_state(key)?;
            Ok(T::default())
        }
    }
}

pub(crate) fn save_key<T: Serialize + ?Sized>(db: &Database, key: &str, value: &T) -> SessionResult<()> {
    db.set_state(key, &serde_json::to_string(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_value_is_moved_aside() {
        let db = Database::open_in_memory().unwrap();
        db.set_state(CHATS_KEY, "{not json").unwrap();

        let chats: Vec<crate::db::models::Chat> = load_key(&db, CHATS_KEY).unwrap();
        assert!(chats.is_empty());
        assert_eq!(db.get_state("chats.corrupt").unwrap().as_deref(), Some("{not json"));
        assert_eq!(db.get_state(CHATS_KEY).unwrap(), None);
    }

    #[test]
    fn missing_key_is_default() {
        let db = Database::open_in_memory().unwrap();
        let links: Vec<crate::db::models::LinkRef> = load_key(&db, LINKS_KEY).unwrap();
        assert!(links.is_empty());
    }
}
