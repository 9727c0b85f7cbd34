//! One-shot send
//!
//! Sends a single message (optionally with an attachment) into a new or
//! stored session, prints the reply and records the turn.

use super::chat::report_outcome;
use super::{
    build_service, chat_settings, open_history, open_state, persist_session, resume_session,
    EventPrinter,
};
use crate::attachment::{accept, IncomingFile};
use crate::chat::SendOutcome;
use crate::config::Config;
use crate::error::{CharlaError, Result};
use crate::session::{short_id, SessionStore};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Options for a one-shot send
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Message text
    pub message: String,
    /// File to attach
    pub attach: Option<PathBuf>,
    /// Skip streaming and use one buffered request
    pub no_stream: bool,
    /// Stored session to continue
    pub session: Option<String>,
    /// Keep local state and history in memory only
    pub ephemeral: bool,
    /// Whether `--language` was given on the command line
    pub cli_language: bool,
}

/// Sends one message and prints the reply
///
/// # Errors
///
/// Returns the pipeline's validation, quota and login errors, and an
/// error when the generation failed after the fallback
pub async fn run_send(config: Config, options: SendOptions) -> Result<()> {
    // Attachments are validated before anything else touches state.
    let attachment = match &options.attach {
        Some(path) => Some(accept(&IncomingFile::from_path(path)?)?),
        None => None,
    };

    let state = open_state(&config, options.ephemeral)?;
    let history = open_history(&config, options.ephemeral)?;
    let sessions = match &options.session {
        Some(id) => resume_session(history.as_ref(), id)?,
        None => SessionStore::new(),
    };

    let mut settings = chat_settings(&config, state.as_ref(), options.cli_language);
    if options.no_stream {
        settings.stream = false;
    }
    let mut service = build_service(&config, state, sessions, settings)?;
    let session_id = service.ensure_active_session();

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let mut printer = EventPrinter::default();
    let result = service
        .send(
            &session_id,
            &options.message,
            attachment,
            &cancel,
            &mut |event| printer.handle(event),
        )
        .await;
    watcher.abort();
    let outcome = result?;

    report_outcome(&printer, &outcome);
    persist_session(history.as_ref(), &service, &session_id);
    tracing::info!(
        session = short_id(&session_id),
        remaining = service.remaining(),
        "Send finished"
    );

    match outcome {
        SendOutcome::Failed { reason, .. } => Err(CharlaError::Provider(reason).into()),
        SendOutcome::Replied { .. } | SendOutcome::Cancelled => Ok(()),
    }
}
