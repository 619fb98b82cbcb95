//! Database module for toolchat
//!
//! Persists session titles and the per-session message checkpoints.

mod schema;

pub use schema::*;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Database connection lock poisoned")]
    LockPoisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Text stored for tool calls cut off by a restart
pub const INTERRUPTED_TOOL_MESSAGE: &str = "tool execution interrupted by restart";

/// Thread-safe database handle
///
/// Cloning shares the connection; every operation takes the lock for its own
/// duration only.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Session Metadata ====================

    /// Create a session with the placeholder title. Existing sessions are
    /// returned unchanged.
    pub fn create_session(&self, id: &str) -> DbResult<Session> {
        {
            let conn = self.lock()?;
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT OR IGNORE INTO sessions (id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![id, DEFAULT_TITLE, now],
            )?;
        }
        self.get_session(id)
    }

    /// Get a session by ID
    pub fn get_session(&self, id: &str) -> DbResult<Session> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.title, s.created_at, s.updated_at,
                    (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id) AS message_count
             FROM sessions s WHERE s.id = ?1",
        )?;

        stmt.query_row(params![id], parse_session_row)
            .optional()?
            .ok_or_else(|| DbError::SessionNotFound(id.to_string()))
    }

    /// List all sessions, most recently active first
    pub fn list_sessions(&self) -> DbResult<Vec<Session>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.title, s.created_at, s.updated_at,
                    (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id) AS message_count
             FROM sessions s
             ORDER BY s.updated_at DESC, s.created_at DESC",
        )?;

        let rows = stmt.query_map([], parse_session_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Overwrite a session's title, creating the session if needed
    pub fn set_title(&self, id: &str, title: &str) -> DbResult<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO sessions (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET title = excluded.title",
            params![id, title, now],
        )?;
        Ok(())
    }

    /// Set the title only while the session still carries the placeholder.
    ///
    /// Returns whether the title was written. Check and write happen in one
    /// statement so two racing generators cannot both win. A session that
    /// does not exist (or was cleared) is left absent.
    pub fn set_title_if_default(&self, id: &str, title: &str) -> DbResult<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE sessions SET title = ?1 WHERE id = ?2 AND title = ?3",
            params![title, id, DEFAULT_TITLE],
        )?;
        Ok(updated > 0)
    }

    /// Delete every session title record
    pub fn clear_sessions(&self) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM sessions", [])?;
        Ok(())
    }

    // ==================== Checkpoints ====================

    /// Load the full message sequence of a session (empty for unknown ids)
    pub fn load_messages(&self, session_id: &str) -> DbResult<Vec<StoredMessage>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT message_id, session_id, sequence_id, content, created_at
             FROM messages WHERE session_id = ?1 ORDER BY sequence_id ASC",
        )?;

        let rows = stmt.query_map(params![session_id], parse_message_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Get messages after a sequence ID
    pub fn load_messages_after(
        &self,
        session_id: &str,
        after_sequence: i64,
    ) -> DbResult<Vec<StoredMessage>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT message_id, session_id, sequence_id, content, created_at
             FROM messages WHERE session_id = ?1 AND sequence_id > ?2 ORDER BY sequence_id ASC",
        )?;

        let rows = stmt.query_map(params![session_id, after_sequence], parse_message_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Append messages to a session in a single transaction.
    ///
    /// Readers see either none or all of the batch. The session's metadata
    /// row is created with the placeholder title if it does not exist yet.
    pub fn append_messages(
        &self,
        session_id: &str,
        messages: &[Message],
    ) -> DbResult<Vec<StoredMessage>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        let mut sequence_id: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        let mut stored = Vec::with_capacity(messages.len());
        for message in messages {
            sequence_id += 1;
            let message_id = uuid::Uuid::new_v4().to_string();
            let content = serde_json::to_string(message)?;
            tx.execute(
                "INSERT INTO messages (message_id, session_id, sequence_id, message_type, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message_id,
                    session_id,
                    sequence_id,
                    message.message_type().to_string(),
                    content,
                    now_str,
                ],
            )?;
            stored.push(StoredMessage {
                message_id,
                session_id: session_id.to_string(),
                sequence_id,
                message: message.clone(),
                created_at: now,
            });
        }

        tx.execute(
            "INSERT INTO sessions (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at",
            params![session_id, DEFAULT_TITLE, now_str],
        )?;

        tx.commit()?;
        Ok(stored)
    }

    /// Session ids that have at least one checkpointed message
    pub fn list_session_ids(&self) -> DbResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT session_id FROM messages ORDER BY session_id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Get the last sequence ID for a session
    pub fn last_sequence_id(&self, session_id: &str) -> DbResult<i64> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )
        .map_err(DbError::from)
    }

    /// Delete every checkpointed message of every session
    pub fn clear_checkpoints(&self) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM messages", [])?;
        Ok(())
    }

    /// Inject a failure result for every tool call left unanswered by a crash.
    ///
    /// Returns the number of synthetic results written.
    pub fn repair_orphaned_tool_calls(&self) -> DbResult<usize> {
        let session_ids = self.list_session_ids()?;
        let mut repaired = 0;

        for session_id in session_ids {
            let history: Vec<Message> = self
                .load_messages(&session_id)?
                .into_iter()
                .map(|m| m.message)
                .collect();

            let orphans = orphaned_tool_calls(&history);
            if orphans.is_empty() {
                continue;
            }

            let synthetic: Vec<Message> = orphans
                .iter()
                .map(|call| {
                    Message::tool_result(call, ToolOutcome::failure(INTERRUPTED_TOOL_MESSAGE))
                })
                .collect();
            self.append_messages(&session_id, &synthetic)?;

            tracing::info!(
                session_id = %session_id,
                count = synthetic.len(),
                "Injected synthetic results for orphaned tool calls"
            );
            repaired += synthetic.len();
        }

        Ok(repaired)
    }
}

fn parse_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: parse_datetime(&row.get::<_, String>(2)?),
        updated_at: parse_datetime(&row.get::<_, String>(3)?),
        message_count: row.get(4)?,
    })
}

/// Parse a message row from the database
fn parse_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let content: String = row.get(3)?;
    let message: Message = serde_json::from_str(&content).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(StoredMessage {
        message_id: row.get(0)?,
        session_id: row.get(1)?,
        sequence_id: row.get(2)?,
        message,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
