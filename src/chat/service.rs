//! The send pipeline
//!
//! [`ChatService`] owns every piece of mutable chat state: the session
//! store, the usage ledger, credentials and the backend. A send validates
//! the text, gates on the entitlement, generates a reply and only then
//! records the turn.

use crate::attachment::Attachment;
use crate::auth::TokenSource;
use crate::chat::generator::{GenerationEvent, GenerationOutcome, Generator};
use crate::config::Config;
use crate::entitlement::{Entitlement, Plan};
use crate::error::{CharlaError, Result};
use crate::ledger::UsageLedger;
use crate::locale::Language;
use crate::providers::{ChatBackend, ChatRequest, WireMessage};
use crate::session::{Message, Role, SessionStore};
use tokio_util::sync::CancellationToken;

/// Settings the pipeline reads on every send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSettings {
    /// Model identifier
    pub model: String,
    /// Character (persona) identifier
    pub character: Option<String>,
    /// Try streaming before the buffered request
    pub stream: bool,
    /// Longest accepted message, in characters
    pub max_message_chars: usize,
    /// Free-plan daily limit before bonuses
    pub free_daily_limit: u32,
    /// Subscription plan
    pub plan: Plan,
    /// Language of texts written into the conversation
    pub language: Language,
}

impl ChatSettings {
    /// Extracts the chat settings from a loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.chat.model.clone(),
            character: config.chat.character.clone(),
            stream: config.chat.stream,
            max_message_chars: config.chat.max_message_chars,
            free_daily_limit: config.quota.free_daily_limit,
            plan: config.account.plan,
            language: config.chat.language,
        }
    }
}

/// Result of a send that passed validation and gating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The reply was appended and counted
    Replied {
        /// Assistant text
        text: String,
        /// Whether it arrived through the stream
        streamed: bool,
    },
    /// Stopped by the caller; the user message is kept, no reply
    Cancelled,
    /// Generation failed; a localized notice was appended as the reply
    Failed {
        /// Underlying reason, for logs and diagnostics
        reason: String,
        /// Text appended to the session
        notice: String,
    },
}

/// Converts a stored message into its wire form
///
/// Images travel as a text part followed by an image part; PDF text is
/// appended to the message body, or a placeholder when extraction found
/// nothing.
pub fn to_wire(message: &Message, language: Language) -> WireMessage {
    let role = message.role.as_str();
    match &message.attachment {
        None => WireMessage::text(role, message.content.clone()),
        Some(attachment @ Attachment::Image { .. }) => match attachment.data_uri() {
            Some(uri) => WireMessage::with_image(role, message.content.clone(), uri),
            None => WireMessage::text(role, message.content.clone()),
        },
        Some(Attachment::Pdf {
            text, file_name, ..
        }) => {
            let document = if text.trim().is_empty() {
                language.scanned_pdf_placeholder(file_name)
            } else {
                format!("[PDF: {}]\n{}", file_name, text)
            };
            WireMessage::text(role, format!("{}\n\n{}", message.content, document))
        }
    }
}

/// Explicitly owned chat state
pub struct ChatService {
    sessions: SessionStore,
    ledger: UsageLedger,
    tokens: Box<dyn TokenSource>,
    backend: Box<dyn ChatBackend>,
    settings: ChatSettings,
}

impl ChatService {
    /// Assembles a service from its parts
    pub fn new(
        settings: ChatSettings,
        sessions: SessionStore,
        ledger: UsageLedger,
        tokens: Box<dyn TokenSource>,
        backend: Box<dyn ChatBackend>,
    ) -> Self {
        Self {
            sessions,
            ledger,
            tokens,
            backend,
            settings,
        }
    }

    /// Session store
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Mutable session store, for lifecycle commands
    pub fn sessions_mut(&mut self) -> &mut SessionStore {
        &mut self.sessions
    }

    /// Usage ledger
    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Active settings
    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Switches the language of notices written from now on
    pub fn set_language(&mut self, language: Language) {
        self.settings.language = language;
    }

    /// Free limit including any claimed bonus allowance
    pub fn effective_free_limit(&self) -> u32 {
        self.settings
            .free_daily_limit
            .saturating_add(self.ledger.bonus_messages())
    }

    /// Current entitlement
    pub fn entitlement(&self) -> Entitlement {
        Entitlement::resolve(
            self.settings.plan,
            self.ledger.used_today(),
            self.effective_free_limit(),
        )
    }

    /// Messages left today (999 for unlimited plans)
    pub fn remaining(&self) -> u32 {
        self.entitlement().remaining
    }

    /// Returns the active session id, creating a session if none exists
    pub fn ensure_active_session(&mut self) -> String {
        match self.sessions.active() {
            Some(session) => session.id.clone(),
            None => self.sessions.create_session(self.settings.model.clone()),
        }
    }

    fn build_request(&self, session_id: &str, pending: &Message) -> Result<ChatRequest> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| CharlaError::SessionNotFound(session_id.to_string()))?;

        let language = self.settings.language;
        let messages = session
            .messages
            .iter()
            .chain(std::iter::once(pending))
            .map(|m| to_wire(m, language))
            .collect();

        Ok(ChatRequest {
            messages,
            model: self.settings.model.clone(),
            character: self.settings.character.clone(),
            stream: self.settings.stream,
        })
    }

    /// Sends a user message and records the outcome
    ///
    /// Nothing is appended when validation, the entitlement gate or login
    /// fails. Otherwise the user message is appended, followed by the reply
    /// (counted against the ledger) or, on failure, exactly one localized
    /// notice. A cancelled generation appends no reply.
    ///
    /// # Errors
    ///
    /// Returns `EmptyMessage`, `MessageTooLong`, `QuotaExceeded`,
    /// `SessionNotFound` or `LoginRequired`
    pub async fn send(
        &mut self,
        session_id: &str,
        text: &str,
        attachment: Option<Attachment>,
        cancel: &CancellationToken,
        on_event: &mut dyn FnMut(GenerationEvent),
    ) -> Result<SendOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CharlaError::EmptyMessage.into());
        }
        let len = text.chars().count();
        if len > self.settings.max_message_chars {
            return Err(CharlaError::MessageTooLong {
                len,
                limit: self.settings.max_message_chars,
            }
            .into());
        }

        let used = self.ledger.used_today();
        let limit = self.effective_free_limit();
        let gate = Entitlement::resolve(self.settings.plan, used, limit);
        if !gate.can_send {
            tracing::info!(used, limit, "Send blocked by daily limit");
            return Err(CharlaError::QuotaExceeded { used, limit }.into());
        }

        let user_message = Message::user(text)
            .with_model(self.settings.model.clone())
            .with_character(self.settings.character.clone())
            .with_attachment(attachment);
        let request = self.build_request(session_id, &user_message)?;

        let generator = Generator::new(
            self.backend.as_ref(),
            self.tokens.as_ref(),
            self.settings.stream,
        );
        let outcome = generator.run(&request, cancel, on_event).await?;

        self.sessions.append_message(session_id, user_message)?;

        match outcome {
            GenerationOutcome::Completed { text, streamed, .. } => {
                let reply = Message::new(Role::Assistant, text.clone())
                    .with_model(self.settings.model.clone())
                    .with_character(self.settings.character.clone());
                self.sessions.append_message(session_id, reply)?;
                self.ledger.increment_used();
                Ok(SendOutcome::Replied { text, streamed })
            }
            GenerationOutcome::Cancelled => Ok(SendOutcome::Cancelled),
            GenerationOutcome::Failed(reason) => {
                let notice = self.settings.language.generic_error().to_string();
                self.sessions
                    .append_message(session_id, Message::assistant(notice.clone()))?;
                Ok(SendOutcome::Failed { reason, notice })
            }
        }
    }
}
