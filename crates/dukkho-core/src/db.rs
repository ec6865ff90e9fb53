// SQLite persistence layer for chats and their messages.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::protocol::{Role, Turn};

/// A chat record, scoped to one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub pinned: bool,
    /// Cumulative score across all model turns of this chat.
    pub score: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted message of a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: i64,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl From<StoredMessage> for Turn {
    fn from(msg: StoredMessage) -> Self {
        Turn {
            role: msg.role,
            text: msg.text,
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Role::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown role {s:?}").into()))
    }
}

/// SQLite-backed chat store.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS chats (
                id         TEXT PRIMARY KEY,
                user_id    TEXT NOT NULL,
                title      TEXT NOT NULL,
                pinned     INTEGER NOT NULL DEFAULT 0,
                score      INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id    TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                role       TEXT NOT NULL CHECK (role IN ('user', 'model')),
                text       TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chats_user_id ON chats(user_id);
            CREATE INDEX IF NOT EXISTS idx_messages_chat_id ON messages(chat_id);
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Create a chat with score 0, unpinned. Returns the new chat id.
    pub fn create_chat(&self, user_id: &str, title: &str) -> Result<String> {
        let conn = self.conn();
        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp();
        conn.execute(
            "INSERT INTO chats (id, user_id, title, pinned, score, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, 0, ?4, ?4)",
            params![id, user_id, title, now],
        )
        .context("failed to create chat")?;
        Ok(id)
    }

    /// Load a single chat. Returns `None` if it does not exist.
    pub fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, user_id, title, pinned, score, created_at, updated_at
             FROM chats WHERE id = ?1",
            params![chat_id],
            chat_from_row,
        )
        .optional()
        .context("failed to load chat")
    }

    /// All chats of a user: pinned first, then newest first.
    pub fn user_chats(&self, user_id: &str) -> Result<Vec<Chat>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, title, pinned, score, created_at, updated_at
                 FROM chats WHERE user_id = ?1
                 ORDER BY pinned DESC, created_at DESC, rowid DESC",
            )
            .context("failed to prepare user_chats query")?;

        let chats = stmt
            .query_map(params![user_id], chat_from_row)
            .context("failed to query chats")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map chat rows")?;

        Ok(chats)
    }

    /// Append a message to a chat. Fails if the chat does not exist.
    pub fn add_message(&self, chat_id: &str, role: Role, text: &str) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO messages (chat_id, role, text, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, role, text, timestamp()],
        )
        .with_context(|| format!("failed to add message to chat {chat_id}"))?;
        Ok(conn.last_insert_rowid())
    }

    /// Messages of a chat in creation order.
    pub fn chat_messages(&self, chat_id: &str) -> Result<Vec<StoredMessage>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, role, text, created_at FROM messages
                 WHERE chat_id = ?1 ORDER BY created_at ASC, id ASC",
            )
            .context("failed to prepare chat_messages query")?;

        let messages = stmt
            .query_map(params![chat_id], |row| {
                Ok(StoredMessage {
                    id: row.get(0)?,
                    role: row.get(1)?,
                    text: row.get(2)?,
                    created_at: timestamp_column(row, 3)?,
                })
            })
            .context("failed to query messages")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map message rows")?;

        Ok(messages)
    }

    /// Overwrite a chat's cumulative score.
    pub fn update_chat_score(&self, chat_id: &str, score: u64) -> Result<()> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE chats SET score = ?2, updated_at = ?3 WHERE id = ?1",
                params![chat_id, score_to_sql(score), timestamp()],
            )
            .context("failed to update chat score")?;
        ensure_found(changed, chat_id)
    }

    pub fn update_chat_title(&self, chat_id: &str, title: &str) -> Result<()> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE chats SET title = ?2, updated_at = ?3 WHERE id = ?1",
                params![chat_id, title, timestamp()],
            )
            .context("failed to update chat title")?;
        ensure_found(changed, chat_id)
    }

    /// Flip a chat's pinned flag and return the new value.
    pub fn toggle_chat_pin(&self, chat_id: &str) -> Result<bool> {
        let conn = self.conn();
        let pinned: Option<bool> = conn
            .query_row(
                "UPDATE chats SET pinned = NOT pinned, updated_at = ?2 WHERE id = ?1
                 RETURNING pinned",
                params![chat_id, timestamp()],
                |row| row.get(0),
            )
            .optional()
            .context("failed to toggle chat pin")?;
        match pinned {
            Some(p) => Ok(p),
            None => bail!("chat {chat_id} not found"),
        }
    }

    /// Delete a chat and its messages. Returns `false` if it did not exist.
    pub fn delete_chat(&self, chat_id: &str) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute("DELETE FROM chats WHERE id = ?1", params![chat_id])
            .context("failed to delete chat")?;
        Ok(changed > 0)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<Chat> {
    let score: i64 = row.get(4)?;
    Ok(Chat {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        pinned: row.get(3)?,
        score: u64::try_from(score).unwrap_or(0),
        created_at: timestamp_column(row, 5)?,
        updated_at: timestamp_column(row, 6)?,
    })
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// SQLite integers are signed; scores above `i64::MAX` are stored clamped.
fn score_to_sql(score: u64) -> i64 {
    i64::try_from(score).unwrap_or(i64::MAX)
}

fn ensure_found(changed: usize, chat_id: &str) -> Result<()> {
    if changed == 0 {
        bail!("chat {chat_id} not found");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: create a fresh in-memory database for each test.
    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let conn = db.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(tables, vec!["chats", "messages"]);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = std::env::temp_dir().join("dukkho_db_nested");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("a/b/chats.db");
        Database::open(&path).expect("should open nested path");
        assert!(path.exists());
    }

    #[test]
    fn new_chat_starts_unpinned_with_zero_score() {
        let db = test_db();
        let id = db.create_chat("user-1", "প্রথম কথা").unwrap();
        let chat = db.get_chat(&id).unwrap().expect("chat exists");
        assert_eq!(chat.user_id, "user-1");
        assert_eq!(chat.title, "প্রথম কথা");
        assert!(!chat.pinned);
        assert_eq!(chat.score, 0);
        assert_eq!(chat.created_at, chat.updated_at);
    }

    #[test]
    fn get_missing_chat_is_none() {
        let db = test_db();
        assert!(db.get_chat("nope").unwrap().is_none());
    }

    #[test]
    fn messages_come_back_in_insertion_order() {
        let db = test_db();
        let id = db.create_chat("u", "t").unwrap();
        db.add_message(&id, Role::User, "one").unwrap();
        db.add_message(&id, Role::Model, "two").unwrap();
        db.add_message(&id, Role::User, "three").unwrap();

        let msgs = db.chat_messages(&id).unwrap();
        let turns: Vec<Turn> = msgs.into_iter().map(Turn::from).collect();
        assert_eq!(
            turns,
            vec![Turn::user("one"), Turn::model("two"), Turn::user("three")]
        );
    }

    #[test]
    fn messages_are_scoped_to_their_chat() {
        let db = test_db();
        let a = db.create_chat("u", "a").unwrap();
        let b = db.create_chat("u", "b").unwrap();
        db.add_message(&a, Role::User, "for a").unwrap();
        assert!(db.chat_messages(&b).unwrap().is_empty());
    }

    #[test]
    fn add_message_to_missing_chat_fails() {
        let db = test_db();
        assert!(db.add_message("ghost", Role::User, "hi").is_err());
    }

    #[test]
    fn score_update_persists() {
        let db = test_db();
        let id = db.create_chat("u", "t").unwrap();
        db.update_chat_score(&id, 13).unwrap();
        assert_eq!(db.get_chat(&id).unwrap().unwrap().score, 13);
    }

    #[test]
    fn huge_score_is_clamped_not_wrapped() {
        let db = test_db();
        let id = db.create_chat("u", "t").unwrap();
        db.update_chat_score(&id, u64::MAX).unwrap();
        assert_eq!(db.get_chat(&id).unwrap().unwrap().score, i64::MAX as u64);
    }

    #[test]
    fn updates_on_missing_chat_fail() {
        let db = test_db();
        assert!(db.update_chat_score("ghost", 1).is_err());
        assert!(db.update_chat_title("ghost", "x").is_err());
        assert!(db.toggle_chat_pin("ghost").is_err());
    }

    #[test]
    fn rename_chat() {
        let db = test_db();
        let id = db.create_chat("u", "old").unwrap();
        db.update_chat_title(&id, "new").unwrap();
        assert_eq!(db.get_chat(&id).unwrap().unwrap().title, "new");
    }

    #[test]
    fn toggle_pin_flips_and_returns_new_state() {
        let db = test_db();
        let id = db.create_chat("u", "t").unwrap();
        assert!(db.toggle_chat_pin(&id).unwrap());
        assert!(db.get_chat(&id).unwrap().unwrap().pinned);
        assert!(!db.toggle_chat_pin(&id).unwrap());
    }

    #[test]
    fn user_chats_pinned_first_then_newest() {
        let db = test_db();
        let first = db.create_chat("u", "first").unwrap();
        let second = db.create_chat("u", "second").unwrap();
        let third = db.create_chat("u", "third").unwrap();
        db.create_chat("someone-else", "hidden").unwrap();
        db.toggle_chat_pin(&first).unwrap();

        let ids: Vec<String> = db
            .user_chats("u")
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![first, third, second]);
    }

    #[test]
    fn delete_chat_removes_messages() {
        let db = test_db();
        let id = db.create_chat("u", "t").unwrap();
        db.add_message(&id, Role::User, "bye").unwrap();

        assert!(db.delete_chat(&id).unwrap());
        assert!(db.get_chat(&id).unwrap().is_none());
        assert!(db.chat_messages(&id).unwrap().is_empty());
        assert!(!db.delete_chat(&id).unwrap());
    }

    #[test]
    fn unknown_role_in_table_is_a_read_error() {
        let db = test_db();
        let id = db.create_chat("u", "t").unwrap();
        {
            let conn = db.conn();
            conn.execute_batch("PRAGMA ignore_check_constraints = ON;").unwrap();
            conn.execute(
                "INSERT INTO messages (chat_id, role, text, created_at) VALUES (?1, 'system', 'x', ?2)",
                params![id, timestamp()],
            )
            .unwrap();
        }
        assert!(db.chat_messages(&id).is_err());
    }
}
