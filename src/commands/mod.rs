//! Command handlers for the CLI
//!
//! Each subcommand lives in its own module. The helpers here assemble the
//! pieces every handler needs from the loaded configuration: the local
//! key-value store, the history database, credentials and the chat backend.

use crate::auth::{AuthClient, RefreshingTokenSource, StaticTokenSource, TokenSource};
use crate::chat::{ChatService, ChatSettings, GenerationEvent, GenerationState};
use crate::config::Config;
use crate::error::{CharlaError, Result};
use crate::ledger::UsageLedger;
use crate::local_state::{FileStore, KeyValueStore, LocalPrefs, MemoryStore};
use crate::providers::HttpChatBackend;
use crate::session::SessionStore;
use crate::storage::HistoryStore;
use colored::Colorize;
use std::io::Write;
use std::sync::Arc;

pub mod account;
pub mod chat;
pub mod extract;
pub mod history;
pub mod send;
pub mod usage;

/// Environment variable holding a fixed API token
pub const TOKEN_ENV: &str = "CHARLA_TOKEN";

/// Opens the key-value store for local state
///
/// `ephemeral` keeps everything in memory for the lifetime of the process.
pub fn open_state(config: &Config, ephemeral: bool) -> Result<Arc<dyn KeyValueStore>> {
    if ephemeral {
        tracing::debug!("Using in-memory local state");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = match &config.storage.state_path {
        Some(path) => FileStore::with_path(path),
        None => FileStore::new()?,
    };
    tracing::debug!("Local state at {}", store.path().display());
    Ok(Arc::new(store))
}

/// Opens the history database, or `None` for ephemeral runs
pub fn open_history(config: &Config, ephemeral: bool) -> Result<Option<HistoryStore>> {
    if ephemeral {
        return Ok(None);
    }

    let history = match &config.storage.history_db {
        Some(path) => HistoryStore::new_with_path(path)?,
        None => HistoryStore::new()?,
    };
    Ok(Some(history))
}

/// Picks the credential source
///
/// A token in `CHARLA_TOKEN` wins. Otherwise stored login tokens are used
/// and refreshed through the auth backend. Without an auth backend the
/// source always reports that a login is required.
pub fn token_source(config: &Config, state: Arc<dyn KeyValueStore>) -> Box<dyn TokenSource> {
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        tracing::debug!("Using token from {}", TOKEN_ENV);
        return Box::new(StaticTokenSource::new(token));
    }

    match AuthClient::new(&config.auth) {
        Ok(client) => Box::new(RefreshingTokenSource::new(state, Box::new(client))),
        Err(e) => {
            tracing::debug!("Auth backend unavailable: {}", e);
            Box::new(StaticTokenSource::new(""))
        }
    }
}

/// Settings for this run; a language stored on the device wins over the
/// configured default unless the user passed `--language`
pub fn chat_settings(config: &Config, state: &dyn KeyValueStore, cli_language: bool) -> ChatSettings {
    let mut settings = ChatSettings::from_config(config);
    if !cli_language {
        if let Some(language) = LocalPrefs::new(state).language() {
            settings.language = language;
        }
    }
    settings
}

/// Builds a chat service over the given sessions
pub fn build_service(
    config: &Config,
    state: Arc<dyn KeyValueStore>,
    sessions: SessionStore,
    settings: ChatSettings,
) -> Result<ChatService> {
    let backend = HttpChatBackend::new(&config.api)?;
    tracing::debug!("Chat endpoint {}", backend.endpoint());
    let tokens = token_source(config, state.clone());
    let ledger = UsageLedger::new(state);
    Ok(ChatService::new(
        settings,
        sessions,
        ledger,
        tokens,
        Box::new(backend),
    ))
}

/// Loads a stored session by id or prefix
pub fn resume_session(history: Option<&HistoryStore>, id: &str) -> Result<SessionStore> {
    let history = history.ok_or_else(|| {
        CharlaError::Config("history is not available in ephemeral mode".to_string())
    })?;
    let session = history
        .load_session(id)?
        .ok_or_else(|| CharlaError::SessionNotFound(id.to_string()))?;
    tracing::info!("Resuming session {} ({})", session.short_id(), session.title);
    Ok(SessionStore::from_sessions(vec![session]))
}

/// Mirrors one session to the history database
///
/// A failed write is logged; the conversation continues in memory.
pub fn persist_session(history: Option<&HistoryStore>, service: &ChatService, session_id: &str) {
    let (Some(history), Some(session)) = (history, service.sessions().get(session_id)) else {
        return;
    };
    if let Err(e) = history.save_session(session) {
        tracing::warn!("Failed to save session {}: {}", session.short_id(), e);
    }
}

/// Terminal renderer for generation events
///
/// Deltas go to stdout as they arrive; state changes are logged.
#[derive(Debug, Default)]
pub struct EventPrinter {
    printed: bool,
}

impl EventPrinter {
    /// Whether any streamed text reached the terminal
    pub fn printed(&self) -> bool {
        self.printed
    }

    /// Handles one event
    pub fn handle(&mut self, event: GenerationEvent) {
        match event {
            GenerationEvent::Delta(text) => {
                print!("{}", text);
                let _ = std::io::stdout().flush();
                self.printed = true;
            }
            GenerationEvent::FallbackStarted => {
                if self.printed {
                    println!();
                    self.printed = false;
                }
                eprintln!("{}", "Stream interrupted, retrying without streaming...".yellow());
            }
            GenerationEvent::StateChanged(GenerationState::Requesting) => {
                tracing::debug!("Waiting for reply");
            }
            GenerationEvent::StateChanged(state) => {
                tracing::debug!("Generation {:?}", state);
            }
        }
    }
}

/// One-line explanation for errors a user can act on
pub fn describe_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<CharlaError>() {
        Some(CharlaError::QuotaExceeded { limit, .. }) => format!(
            "You have used all {} free messages for today. Run `charla upgrade --plan <plan>` for unlimited messages.",
            limit
        ),
        Some(CharlaError::LoginRequired(_)) => {
            "You need to sign in first: run `charla login --email <email>`.".to_string()
        }
        _ => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::Language;
    use crate::session::{ChatSession, Message};
    use crate::test_utils::test_config;
    use tempfile::tempdir;

    #[test]
    fn test_open_state_ephemeral_is_memory() {
        let state = open_state(&test_config(), true).unwrap();
        state.set("k", "v").unwrap();
        assert_eq!(state.get("k").unwrap(), Some("v".to_string()));
        assert!(open_history(&test_config(), true).unwrap().is_none());
    }

    #[test]
    fn test_open_state_uses_configured_path() {
        let dir = tempdir().unwrap();
        let mut config = test_config();
        config.storage.state_path = Some(dir.path().join("state.json"));
        let state = open_state(&config, false).unwrap();
        state.set("k", "v").unwrap();
        assert!(dir.path().join("state.json").exists());
    }

    #[test]
    fn test_stored_language_applies_without_flag() {
        let state = MemoryStore::new();
        LocalPrefs::new(&state).set_language(Language::En).unwrap();
        let mut config = test_config();
        config.chat.language = Language::Es;

        assert_eq!(chat_settings(&config, &state, false).language, Language::En);
        assert_eq!(chat_settings(&config, &state, true).language, Language::Es);
    }

    #[test]
    fn test_resume_session_by_prefix() {
        let dir = tempdir().unwrap();
        let history = HistoryStore::new_with_path(dir.path().join("h.db")).unwrap();
        let mut store = SessionStore::new();
        let id = store.create_session("venice-uncensored");
        store.append_message(&id, Message::user("Hola")).unwrap();
        let session: &ChatSession = store.get(&id).unwrap();
        history.save_session(session).unwrap();

        let resumed = resume_session(Some(&history), &id[..8]).unwrap();
        assert_eq!(resumed.active().unwrap().id, id);

        let err = resume_session(Some(&history), "ffffffff").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CharlaError>(),
            Some(CharlaError::SessionNotFound(_))
        ));
        assert!(resume_session(None, &id).is_err());
    }

    #[test]
    fn test_describe_quota_error() {
        let err: anyhow::Error = CharlaError::QuotaExceeded { used: 10, limit: 10 }.into();
        assert!(describe_error(&err).contains("10 free messages"));
        let err: anyhow::Error = CharlaError::LoginRequired("x".into()).into();
        assert!(describe_error(&err).contains("charla login"));
    }
}
