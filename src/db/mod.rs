pub mod models;

use models::MemoryRecord;
use rusqlite::{params, Connection, OptionalExtension, Result};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(dir = %parent.display(), error = %e, "failed to create database directory");
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    // A panic while holding the lock cannot leave a half-applied statement
    // behind, so a poisoned guard is still usable.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('user_message', 'bot_message', 'document', 'link')),
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_memories_conversation ON memories(conversation_id);
            ",
        )?;
        Ok(())
    }

    // ── Persisted client state (chats / documents / links / settings) ──

    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT value FROM state WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
    }

    pub fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO state (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_state(&self, key: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM state WHERE key = ?1", params![key])?;
        Ok(())
    }

    // ── Settings ──

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }

    // ── Memories ──

    pub fn insert_memory(&self, record: &MemoryRecord, embedding: &[u8]) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO memories (id, conversation_id, kind, text, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.conversation_id,
                record.kind,
                record.text,
                embedding,
                record.timestamp
            ],
        )?;
        Ok(())
    }

    /// Every memory of a conversation together with its raw embedding bytes.
    pub fn memories_with_embeddings(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<(MemoryRecord, Vec<u8>)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, kind, text, created_at, embedding FROM memories
             WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok((
                MemoryRecord {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    kind: row.get(2)?,
                    text: row.get(3)?,
                    timestamp: row.get(4)?,
                },
                row.get(5)?,
            ))
        })?;
        rows.collect()
    }

    pub fn list_memories(
        &self,
        conversation_id: Option<&str>,
        kind: Option<&str>,
    ) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, kind, text, created_at FROM memories
             WHERE (?1 IS NULL OR conversation_id = ?1) AND (?2 IS NULL OR kind = ?2)
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id, kind], |row| {
            Ok(MemoryRecord {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                kind: row.get(2)?,
                text: row.get(3)?,
                timestamp: row.get(4)?,
            })
        })?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state/jamal.db");
        let db = Database::new(&path).unwrap();
        db.set_state("chats", "[]").unwrap();
        assert!(path.exists());
    }

    fn record(id: &str, conversation_id: &str, kind: &str) -> MemoryRecord {
        MemoryRecord {
            id: id.into(),
            conversation_id: conversation_id.into(),
            kind: kind.into(),
            text: format!("text of {id}"),
            timestamp: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn state_upsert_overwrites() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_state("chats").unwrap(), None);
        db.set_state("chats", "[]").unwrap();
        db.set_state("chats", "[1]").unwrap();
        assert_eq!(db.get_state("chats").unwrap().as_deref(), Some("[1]"));
        db.delete_state("chats").unwrap();
        assert_eq!(db.get_state("chats").unwrap(), None);
    }

    #[test]
    fn settings_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        db.set_setting("simple_model", "llama3").unwrap();
        assert_eq!(
            db.get_setting("simple_model").unwrap().as_deref(),
            Some("llama3")
        );
        db.delete_setting("simple_model").unwrap();
        assert_eq!(db.get_setting("simple_model").unwrap(), None);
    }

    #[test]
    fn memories_filter_by_conversation_and_kind() {
        let db = Database::open_in_memory().unwrap();
        db.insert_memory(&record("a", "c1", "user_message"), &[0; 4])
            .unwrap();
        db.insert_memory(&record("b", "c1", "bot_message"), &[0; 4])
            .unwrap();
        db.insert_memory(&record("c", "c2", "user_message"), &[0; 4])
            .unwrap();

        assert_eq!(db.list_memories(None, None).unwrap().len(), 3);
        assert_eq!(db.list_memories(Some("c1"), None).unwrap().len(), 2);
        let users = db.list_memories(None, Some("user_message")).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(db.memories_with_embeddings("c2").unwrap().len(), 1);
    }

    #[test]
    fn memory_kind_is_constrained() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.insert_memory(&record("x", "c", "other"), &[]).is_err());
    }

    #[test]
    fn file_backed_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        {
            let db = Database::new(&path).unwrap();
            db.set_state("links", "[]").unwrap();
        }
        let db = Database::new(&path).unwrap();
        assert_eq!(db.get_state("links").unwrap().as_deref(), Some("[]"));
    }
}
