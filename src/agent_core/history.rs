//! Conversation history collaborator.
//!
//! The orchestrator only appends messages and reads a session back.
//! `SqliteHistory` uses `rusqlite` in synchronous mode behind a mutex; WAL
//! mode is enabled so readers are not blocked by a writer in another process.

use std::sync::Mutex;

use rusqlite::{params, Connection};

use super::errors::AgentError;
use super::types::{SessionInfo, StoredMessage};
use crate::inference::types::Role;

/// Append-and-read access to conversation history.
pub trait HistoryStore: Send + Sync {
    /// Append a message and return its id.
    fn append(&self, session_id: &str, role: Role, content: &str) -> Result<i64, AgentError>;

    /// All messages of a session, oldest first.
    fn read(&self, session_id: &str) -> Result<Vec<StoredMessage>, AgentError>;
}

// ─── SqliteHistory ──────────────────────────────────────────────────────────

/// SQLite-backed history.
pub struct SqliteHistory {
    conn: Mutex<Connection>,
}

impl SqliteHistory {
    /// Open (or create) the history database at the given path.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, AgentError> {
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                last_activity TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL DEFAULT (datetime('now')),
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_session
                ON messages(session_id, id);
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// All sessions, most recent activity first.
    pub fn list_sessions(&self) -> Result<Vec<SessionInfo>, AgentError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.created_at, s.last_activity,
                    (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id)
             FROM sessions s
             ORDER BY s.last_activity DESC, s.id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(SessionInfo {
                id: row.get(0)?,
                created_at: row.get(1)?,
                last_activity: row.get(2)?,
                message_count: row.get::<_, i64>(3)? as usize,
            })
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl HistoryStore for SqliteHistory {
    fn append(&self, session_id: &str, role: Role, content: &str) -> Result<i64, AgentError> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO sessions (id) VALUES (?1)",
            params![session_id],
        )?;
        conn.execute(
            "INSERT INTO messages (session_id, role, content) VALUES (?1, ?2, ?3)",
            params![session_id, role.as_str(), content],
        )?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE sessions SET last_activity = datetime('now') WHERE id = ?1",
            params![session_id],
        )?;
        Ok(id)
    }

    fn read(&self, session_id: &str) -> Result<Vec<StoredMessage>, AgentError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, timestamp, role, content
             FROM messages
             WHERE session_id = ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![session_id], |row| {
            let role: String = row.get(3)?;
            Ok(StoredMessage {
                id: row.get(0)?,
                session_id: row.get(1)?,
                timestamp: row.get(2)?,
                role: Role::parse(&role).unwrap_or(Role::User),
                content: row.get(4)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
