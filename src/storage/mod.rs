//! Local history mirror
//!
//! Sessions are mirrored into a SQLite file so the REPL can resume them and
//! `charla history` can list them. Retention is applied to this copy with
//! the same per-plan windows the hosted backend uses for its own.

use crate::error::{CharlaError, Result};
use crate::session::{ChatSession, Message};
use anyhow::Context;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

pub mod types;
pub use types::StoredSession;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// SQLite-backed session history
pub struct HistoryStore {
    db_path: PathBuf,
}

/// Shortest id prefix accepted in place of a full session id
pub const MIN_ID_PREFIX: usize = 8;

/// Escapes `LIKE` wildcards so a prefix only matches literally
fn escape_like(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Resolves a full id or an unambiguous prefix to the stored id
fn resolve_id(conn: &Connection, id: &str) -> Result<Option<String>> {
    let exact = conn
        .query_row("SELECT id FROM sessions WHERE id = ?", params![id], |row| {
            row.get::<_, String>(0)
        })
        .optional()
        .context("Failed to query session")
        .map_err(|e| CharlaError::Storage(e.to_string()))?;
    if exact.is_some() {
        return Ok(exact);
    }

    if id.chars().count() < MIN_ID_PREFIX {
        return Err(CharlaError::InvalidSessionId(format!(
            "'{}' is shorter than {} characters",
            id, MIN_ID_PREFIX
        ))
        .into());
    }

    let mut stmt = conn
        .prepare("SELECT id FROM sessions WHERE id LIKE ? ESCAPE '\\' LIMIT 2")
        .context("Failed to prepare query")
        .map_err(|e| CharlaError::Storage(e.to_string()))?;
    let matches = stmt
        .query_map(params![format!("{}%", escape_like(id))], |row| {
            row.get::<_, String>(0)
        })
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<String>>>())
        .context("Failed to query session")
        .map_err(|e| CharlaError::Storage(e.to_string()))?;

    if matches.len() > 1 {
        return Err(CharlaError::InvalidSessionId(format!(
            "'{}' matches more than one conversation",
            id
        ))
        .into());
    }
    Ok(matches.into_iter().next())
}

impl HistoryStore {
    /// Opens the history database in the user's data directory
    ///
    /// Honors `CHARLA_HISTORY_DB` as an override.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("CHARLA_HISTORY_DB") {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("com", "charla", "charla")
            .ok_or_else(|| CharlaError::Storage("Could not determine data directory".into()))?;

        Self::new_with_path(proj_dirs.data_dir().join("history.db"))
    }

    /// Opens (and initializes) the database at a specific path
    ///
    /// # Examples
    ///
    /// ```
    /// use charla::storage::HistoryStore;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let history = HistoryStore::new_with_path(dir.path().join("history.db")).unwrap();
    /// assert!(history.load_sessions().unwrap().is_empty());
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| CharlaError::Storage(e.to_string()))?;
        }

        let storage = Self { db_path };
        storage.init()?;
        Ok(storage)
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection> {
        Ok(Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(|e| CharlaError::Storage(e.to_string()))?)
    }

    fn init(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                model TEXT NOT NULL,
                messages JSON NOT NULL
            )",
            [],
        )
        .context("Failed to create tables")
        .map_err(|e| CharlaError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Inserts or replaces a session, keeping its own timestamps
    pub fn save_session(&self, session: &ChatSession) -> Result<()> {
        let mut conn = self.open()?;
        let messages_json = serde_json::to_string(&session.messages)
            .context("Failed to serialize messages")
            .map_err(|e| CharlaError::Storage(e.to_string()))?;

        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(|e| CharlaError::Storage(e.to_string()))?;

        tx.execute(
            "INSERT INTO sessions (id, title, created_at, updated_at, model, messages)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                updated_at = excluded.updated_at,
                model = excluded.model,
                messages = excluded.messages",
            params![
                session.id,
                session.title,
                session.created_at,
                session.updated_at,
                session.model,
                messages_json
            ],
        )
        .context("Failed to save session")
        .map_err(|e| CharlaError::Storage(e.to_string()))?;

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(|e| CharlaError::Storage(e.to_string()))?;

        tracing::debug!(
            "Saved session {} ({} messages)",
            session.short_id(),
            session.messages.len()
        );
        Ok(())
    }

    /// All sessions, most recently updated first
    ///
    /// Rows whose messages cannot be decoded are skipped with a warning.
    pub fn load_sessions(&self) -> Result<Vec<ChatSession>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, title, created_at, updated_at, model, messages
                FROM sessions
                ORDER BY updated_at DESC",
            )
            .context("Failed to prepare statement")
            .map_err(|e| CharlaError::Storage(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .context("Failed to query sessions")
            .map_err(|e| CharlaError::Storage(e.to_string()))?;

        let mut sessions = Vec::new();
        for (id, title, created_at, updated_at, model, messages_json) in rows.flatten() {
            match serde_json::from_str::<Vec<Message>>(&messages_json) {
                Ok(messages) => sessions.push(ChatSession {
                    id,
                    title,
                    messages,
                    model,
                    created_at,
                    updated_at,
                }),
                Err(e) => tracing::warn!("Skipping unreadable session {}: {}", id, e),
            }
        }
        Ok(sessions)
    }

    /// Listing rows, most recently updated first
    pub fn list_sessions(&self) -> Result<Vec<StoredSession>> {
        Ok(self
            .load_sessions()?
            .into_iter()
            .map(|s| StoredSession {
                message_count: s.messages.len(),
                created_at: types::from_millis(s.created_at),
                updated_at: types::from_millis(s.updated_at),
                id: s.id,
                title: s.title,
                model: s.model,
            })
            .collect())
    }

    /// Loads one session by full id or unambiguous prefix
    ///
    /// # Errors
    ///
    /// Returns `CharlaError::InvalidSessionId` for a prefix shorter than
    /// [`MIN_ID_PREFIX`] or one that matches several sessions
    pub fn load_session(&self, id: &str) -> Result<Option<ChatSession>> {
        let conn = self.open()?;
        let Some(id) = resolve_id(&conn, id)? else {
            return Ok(None);
        };
        let query = "SELECT id, title, created_at, updated_at, model, messages FROM sessions
            WHERE id = ?";

        let row = conn
            .query_row(query, params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .optional()
            .context("Failed to query session")
            .map_err(|e| CharlaError::Storage(e.to_string()))?;

        match row {
            Some((id, title, created_at, updated_at, model, messages_json)) => {
                let messages = serde_json::from_str(&messages_json)
                    .context("Failed to deserialize messages")
                    .map_err(|e| CharlaError::Storage(e.to_string()))?;
                Ok(Some(ChatSession {
                    id,
                    title,
                    messages,
                    model,
                    created_at,
                    updated_at,
                }))
            }
            None => Ok(None),
        }
    }

    /// Deletes by full id or unambiguous prefix; returns the rows removed
    ///
    /// # Errors
    ///
    /// Same id rules as [`HistoryStore::load_session`]
    pub fn delete_session(&self, id: &str) -> Result<usize> {
        let conn = self.open()?;
        let Some(id) = resolve_id(&conn, id)? else {
            return Ok(0);
        };
        let removed = conn
            .execute("DELETE FROM sessions WHERE id = ?", params![id])
            .context("Failed to delete session")
            .map_err(|e| CharlaError::Storage(e.to_string()))?;
        Ok(removed)
    }

    /// Retitles by full id or unambiguous prefix; returns the rows changed
    ///
    /// # Errors
    ///
    /// Same id rules as [`HistoryStore::load_session`]
    pub fn rename_session(&self, id: &str, title: &str, now_ms: i64) -> Result<usize> {
        let conn = self.open()?;
        let Some(id) = resolve_id(&conn, id)? else {
            return Ok(0);
        };
        let changed = conn
            .execute(
                "UPDATE sessions SET title = ?1, updated_at = MAX(updated_at + 1, ?2) WHERE id = ?3",
                params![title, now_ms, id],
            )
            .context("Failed to rename session")
            .map_err(|e| CharlaError::Storage(e.to_string()))?;
        Ok(changed)
    }

    /// Removes sessions not updated within `retention_days` of `now_ms`
    pub fn purge_expired(&self, retention_days: u32, now_ms: i64) -> Result<usize> {
        let cutoff = now_ms - i64::from(retention_days) * MILLIS_PER_DAY;
        let conn = self.open()?;
        let removed = conn
            .execute("DELETE FROM sessions WHERE updated_at < ?", params![cutoff])
            .context("Failed to purge sessions")
            .map_err(|e| CharlaError::Storage(e.to_string()))?;
        if removed > 0 {
            tracing::info!(
                "Purged {} sessions older than {} days",
                removed,
                retention_days
            );
        }
        Ok(removed)
    }
}
