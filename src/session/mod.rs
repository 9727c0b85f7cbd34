//! In-memory session store
//!
//! Sessions and their messages live in an explicitly owned [`SessionStore`];
//! every mutation goes through `&mut self`. The history database mirrors the
//! store to disk (see [`crate::storage`]).

pub mod types;

pub use types::{
    derive_title, short_id, ChatSession, Message, Role, DEFAULT_TITLE, TITLE_MAX_CHARS,
};

use crate::error::{CharlaError, Result};
use chrono::Utc;
use uuid::Uuid;

/// Millisecond clock
pub type ClockFn = Box<dyn Fn() -> i64 + Send + Sync>;

/// Owner of all sessions in this process
pub struct SessionStore {
    sessions: Vec<ChatSession>,
    active: Option<String>,
    clock: ClockFn,
    last_stamp: i64,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.sessions.len())
            .field("active", &self.active)
            .field("last_stamp", &self.last_stamp)
            .finish_non_exhaustive()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Creates an empty store on the system clock
    pub fn new() -> Self {
        Self::with_clock(Box::new(|| Utc::now().timestamp_millis()))
    }

    /// Creates an empty store with an injected clock
    pub fn with_clock(clock: ClockFn) -> Self {
        Self {
            sessions: Vec::new(),
            active: None,
            clock,
            last_stamp: 0,
        }
    }

    /// Restores previously persisted sessions
    ///
    /// The most recently updated session becomes active.
    pub fn from_sessions(sessions: Vec<ChatSession>) -> Self {
        let mut store = Self::new();
        store.last_stamp = sessions.iter().map(|s| s.updated_at).max().unwrap_or(0);
        store.sessions = sessions;
        store.active = store.most_recent_id();
        store
    }

    // Stamps are strictly increasing so recency order never ties.
    fn next_stamp(&mut self) -> i64 {
        let stamp = (self.clock)().max(self.last_stamp + 1);
        self.last_stamp = stamp;
        stamp
    }

    fn most_recent_id(&self) -> Option<String> {
        self.sessions
            .iter()
            .max_by_key(|s| s.updated_at)
            .map(|s| s.id.clone())
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut ChatSession> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| CharlaError::SessionNotFound(id.to_string()).into())
    }

    /// Creates an empty session and makes it active
    pub fn create_session(&mut self, model: impl Into<String>) -> String {
        let stamp = self.next_stamp();
        let session = ChatSession {
            id: Uuid::new_v4().to_string(),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            model: model.into(),
            created_at: stamp,
            updated_at: stamp,
        };
        let id = session.id.clone();
        tracing::info!("Created session {}", session.short_id());
        self.sessions.push(session);
        self.active = Some(id.clone());
        id
    }

    /// Appends a message, stamping its creation time
    ///
    /// The first user message of an empty session sets the title.
    ///
    /// # Errors
    ///
    /// Returns `CharlaError::SessionNotFound` for an unknown id
    pub fn append_message(&mut self, session_id: &str, mut message: Message) -> Result<()> {
        let stamp = self.next_stamp();
        let session = self.get_mut(session_id)?;

        if session.messages.is_empty() && message.role == Role::User {
            session.title = derive_title(&message.content);
        }

        message.created_at = stamp;
        session.messages.push(message);
        session.updated_at = stamp;
        Ok(())
    }

    /// Removes a session
    ///
    /// Deleting the active session activates the most recently updated one
    /// left, if any.
    ///
    /// # Errors
    ///
    /// Returns `CharlaError::SessionNotFound` for an unknown id
    pub fn delete_session(&mut self, session_id: &str) -> Result<()> {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != session_id);
        if self.sessions.len() == before {
            return Err(CharlaError::SessionNotFound(session_id.to_string()).into());
        }

        if self.active.as_deref() == Some(session_id) {
            self.active = self.most_recent_id();
        }
        tracing::info!("Deleted session {}", session_id);
        Ok(())
    }

    /// Replaces a session title
    ///
    /// # Errors
    ///
    /// Returns `CharlaError::SessionNotFound` for an unknown id and
    /// `CharlaError::Config` for a blank title
    pub fn rename_session(&mut self, session_id: &str, title: &str) -> Result<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(CharlaError::Config("Session title must not be empty".to_string()).into());
        }
        let stamp = self.next_stamp();
        let session = self.get_mut(session_id)?;
        session.title = title.to_string();
        session.updated_at = stamp;
        Ok(())
    }

    /// Sessions ordered by most recent update first
    pub fn list(&self) -> Vec<&ChatSession> {
        let mut sessions: Vec<&ChatSession> = self.sessions.iter().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    /// Looks up a session
    pub fn get(&self, session_id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    /// Currently active session
    pub fn active(&self) -> Option<&ChatSession> {
        self.active.as_deref().and_then(|id| self.get(id))
    }

    /// Makes a session active
    ///
    /// # Errors
    ///
    /// Returns `CharlaError::SessionNotFound` for an unknown id
    pub fn set_active(&mut self, session_id: &str) -> Result<()> {
        if self.get(session_id).is_none() {
            return Err(CharlaError::SessionNotFound(session_id.to_string()).into());
        }
        self.active = Some(session_id.to_string());
        Ok(())
    }

    /// Number of sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store holds no sessions
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn frozen_store(at: i64) -> SessionStore {
        SessionStore::with_clock(Box::new(move || at))
    }

    #[test]
    fn test_short_id_never_splits_or_overruns() {
        assert_eq!(short_id("0123abcd-0000-4000-8000-000000000000"), "0123abcd");
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id(""), "");
        assert_eq!(short_id("ññññññññññ"), "ññññññññ");
    }

    #[test]
    fn test_debug_skips_clock() {
        let mut store = SessionStore::with_clock(Box::new(|| 1_000));
        let id = store.create_session("m");
        let shown = format!("{:?}", store);
        assert!(shown.starts_with("SessionStore {"));
        assert!(shown.contains("sessions: 1"));
        assert!(shown.contains(&id));
    }

    #[test]
    fn test_create_session_is_active_and_empty() {
        let mut store = SessionStore::new();
        let id = store.create_session("venice-uncensored");
        let active = store.active().unwrap();
        assert_eq!(active.id, id);
        assert_eq!(active.title, DEFAULT_TITLE);
        assert!(active.messages.is_empty());
        assert_eq!(active.created_at, active.updated_at);
    }

    #[test]
    fn test_title_derived_once_from_first_user_message() {
        let mut store = SessionStore::new();
        let id = store.create_session("m");
        let first = "Explain quantum computing in simple terms for beginners please";
        assert_eq!(first.chars().count(), 62);

        store.append_message(&id, Message::user(first)).unwrap();
        let expected = format!("{}...", &first[..40]);
        assert_eq!(store.get(&id).unwrap().title, expected);

        store.append_message(&id, Message::assistant("Sure")).unwrap();
        store.append_message(&id, Message::user("Another question")).unwrap();
        assert_eq!(store.get(&id).unwrap().title, expected);
    }

    #[test]
    fn test_short_first_message_not_ellipsized() {
        let mut store = SessionStore::new();
        let id = store.create_session("m");
        store.append_message(&id, Message::user("  Hola  ")).unwrap();
        assert_eq!(store.get(&id).unwrap().title, "Hola");
    }

    #[test]
    fn test_assistant_first_does_not_set_title() {
        let mut store = SessionStore::new();
        let id = store.create_session("m");
        store.append_message(&id, Message::assistant("Welcome")).unwrap();
        store.append_message(&id, Message::user("Hi")).unwrap();
        assert_eq!(store.get(&id).unwrap().title, DEFAULT_TITLE);
    }

    #[test]
    fn test_stamps_strictly_increase_on_frozen_clock() {
        let mut store = frozen_store(1_000);
        let id = store.create_session("m");
        store.append_message(&id, Message::user("a")).unwrap();
        store.append_message(&id, Message::assistant("b")).unwrap();

        let session = store.get(&id).unwrap();
        assert!(session.updated_at >= session.created_at);
        assert!(session.messages[0].created_at < session.messages[1].created_at);
        assert_eq!(session.updated_at, session.messages[1].created_at);
    }

    #[test]
    fn test_list_orders_by_recent_update() {
        let now = Arc::new(AtomicI64::new(10));
        let clock = Arc::clone(&now);
        let mut store = SessionStore::with_clock(Box::new(move || clock.load(Ordering::SeqCst)));

        let a = store.create_session("m");
        now.store(20, Ordering::SeqCst);
        let b = store.create_session("m");
        now.store(30, Ordering::SeqCst);
        store.append_message(&a, Message::user("bump")).unwrap();

        let order: Vec<&str> = store.list().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec![a.as_str(), b.as_str()]);
    }

    #[test]
    fn test_delete_active_selects_most_recent_remaining() {
        let mut store = SessionStore::new();
        let a = store.create_session("m");
        let b = store.create_session("m");
        let c = store.create_session("m");
        store.append_message(&a, Message::user("newest")).unwrap();
        store.set_active(&c).unwrap();

        store.delete_session(&c).unwrap();
        assert_eq!(store.active().unwrap().id, a);

        store.delete_session(&a).unwrap();
        assert_eq!(store.active().unwrap().id, b);

        store.delete_session(&b).unwrap();
        assert!(store.active().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_inactive_keeps_active() {
        let mut store = SessionStore::new();
        let a = store.create_session("m");
        let b = store.create_session("m");
        store.delete_session(&a).unwrap();
        assert_eq!(store.active().unwrap().id, b);
    }

    #[test]
    fn test_unknown_session_errors() {
        let mut store = SessionStore::new();
        let err = store.append_message("nope", Message::user("x")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CharlaError>(),
            Some(CharlaError::SessionNotFound(_))
        ));
        assert!(store.delete_session("nope").is_err());
        assert!(store.set_active("nope").is_err());
        assert!(store.rename_session("nope", "t").is_err());
    }

    #[test]
    fn test_rename_updates_title_and_stamp() {
        let mut store = frozen_store(5);
        let id = store.create_session("m");
        let before = store.get(&id).unwrap().updated_at;
        store.rename_session(&id, "  Recetas  ").unwrap();
        let session = store.get(&id).unwrap();
        assert_eq!(session.title, "Recetas");
        assert!(session.updated_at > before);
        assert!(store.rename_session(&id, "   ").is_err());
    }

    #[test]
    fn test_from_sessions_restores_recency_and_stamps() {
        let older = ChatSession {
            id: "older".to_string(),
            title: "Old".to_string(),
            messages: vec![],
            model: "m".to_string(),
            created_at: 1,
            updated_at: 100,
        };
        let newer = ChatSession {
            id: "newer".to_string(),
            updated_at: 200,
            ..older.clone()
        };

        let mut store = SessionStore::from_sessions(vec![older, newer]);
        assert_eq!(store.active().unwrap().id, "newer");

        store.append_message("older", Message::user("hi")).unwrap();
        assert!(store.get("older").unwrap().updated_at > 200);
        assert_eq!(store.list()[0].id, "older");
    }
}
