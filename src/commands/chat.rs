//! Interactive chat mode
//!
//! A readline loop over a [`ChatService`]. Lines starting with `/` are
//! local commands; everything else is sent as a message. Ctrl-C while a
//! reply is being generated cancels that reply and returns to the prompt.

use super::{
    build_service, chat_settings, describe_error, open_history, open_state, persist_session,
    resume_session, EventPrinter,
};
use crate::attachment::{accept, Attachment, IncomingFile};
use crate::chat::{ChatService, SendOutcome};
use crate::config::Config;
use crate::error::Result;
use crate::local_state::{KeyValueStore, LocalPrefs};
use crate::locale::Language;
use crate::session::{short_id, SessionStore};
use crate::storage::HistoryStore;
use chrono::Utc;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio_util::sync::CancellationToken;

/// Flag recorded once the welcome allowance has been granted
const WELCOME_BONUS_FLAG: &str = "welcome";

/// Local commands understood by the REPL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// Show the command list
    Help,
    /// Start a new session
    New,
    /// List sessions of this run
    Sessions,
    /// Switch to a session by id prefix
    Switch(String),
    /// Rename the active session
    Rename(String),
    /// Delete the active session
    Delete,
    /// Attach a file to the next message
    Attach(String),
    /// Show today's usage
    Usage,
    /// Change the conversation language
    Lang(Language),
    /// Leave the REPL
    Quit,
    /// Anything else starting with `/`
    Unknown(String),
}

/// Parses a `/command`; `None` means the line is a message
pub fn parse_repl_command(line: &str) -> Option<ReplCommand> {
    let line = line.trim();
    let rest = line.strip_prefix('/')?;
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match (name.to_ascii_lowercase().as_str(), arg) {
        ("help" | "?", _) => ReplCommand::Help,
        ("new", _) => ReplCommand::New,
        ("sessions" | "list", _) => ReplCommand::Sessions,
        ("switch", id) if !id.is_empty() => ReplCommand::Switch(id.to_string()),
        ("rename", title) if !title.is_empty() => ReplCommand::Rename(title.to_string()),
        ("delete", _) => ReplCommand::Delete,
        ("attach", path) if !path.is_empty() => ReplCommand::Attach(path.to_string()),
        ("usage", _) => ReplCommand::Usage,
        ("lang", code) => match code.parse() {
            Ok(language) => ReplCommand::Lang(language),
            Err(_) => ReplCommand::Unknown(line.to_string()),
        },
        ("quit" | "exit" | "q", _) => ReplCommand::Quit,
        _ => ReplCommand::Unknown(line.to_string()),
    };
    Some(command)
}

fn print_help() {
    println!("{}", "Commands:".bold());
    println!("  /new               start a new conversation");
    println!("  /sessions          list conversations of this run");
    println!("  /switch <id>       switch to a conversation (id prefix)");
    println!("  /rename <title>    rename the current conversation");
    println!("  /delete            delete the current conversation");
    println!("  /attach <file>     attach an image or PDF to the next message");
    println!("  /usage             show today's usage");
    println!("  /lang <es|en>      change the conversation language");
    println!("  /quit              leave");
    println!("Press Ctrl-C while a reply is streaming to stop it.");
}

/// Asks for age confirmation once per device
///
/// Returns `false` when the user declines. The first confirmation grants
/// the welcome allowance.
fn age_gate(
    rl: &mut DefaultEditor,
    state: &dyn KeyValueStore,
    service: &ChatService,
    welcome_bonus: u32,
) -> Result<bool> {
    let prefs = LocalPrefs::new(state);
    if prefs.age_verified() {
        return Ok(true);
    }

    let answer = match rl.readline("This chat is for adults only. Are you 18 or older? [y/N] ") {
        Ok(answer) => answer,
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if !matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes" | "s" | "si" | "sí") {
        return Ok(false);
    }

    if let Err(e) = prefs.set_age_verified() {
        tracing::warn!("Failed to store age confirmation: {}", e);
    }
    if welcome_bonus > 0 && service.ledger().claim_bonus(WELCOME_BONUS_FLAG, welcome_bonus) {
        println!(
            "{}",
            format!("Welcome! {} bonus messages added to your allowance.", welcome_bonus).green()
        );
    }
    Ok(true)
}

fn print_usage(service: &ChatService) {
    let entitlement = service.entitlement();
    if entitlement.is_unlimited() {
        println!("Plan {}: unlimited messages", service.settings().plan.to_string().cyan());
    } else {
        println!(
            "Plan {}: {} of {} messages left today",
            service.settings().plan.to_string().cyan(),
            entitlement.remaining.to_string().bold(),
            service.effective_free_limit()
        );
    }
}

/// Prints the end of a reply
pub(crate) fn report_outcome(printer: &EventPrinter, outcome: &SendOutcome) {
    match outcome {
        SendOutcome::Replied { text, .. } => {
            if !printer.printed() {
                print!("{}", text);
            }
            println!();
        }
        SendOutcome::Cancelled => {
            if printer.printed() {
                println!();
            }
            println!("{}", "(stopped)".dimmed());
        }
        SendOutcome::Failed { reason, notice } => {
            tracing::warn!("Generation failed: {}", reason);
            if printer.printed() {
                println!();
            }
            println!("{}", notice.red());
        }
    }
}

/// Sends one message, cancelling on Ctrl-C
///
/// The pending attachment is only consumed once the message was accepted;
/// a rejected send leaves it staged for the next line.
async fn send_interactive(
    service: &mut ChatService,
    session_id: &str,
    text: &str,
    pending: &mut Option<Attachment>,
) -> Result<(EventPrinter, SendOutcome)> {
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
        .send(session_id, text, pending.clone(), &cancel, &mut |event| {
            printer.handle(event)
        })
        .await;
    watcher.abort();

    let outcome = result?;
    *pending = None;
    Ok((printer, outcome))
}

fn handle_command(
    command: ReplCommand,
    service: &mut ChatService,
    history: Option<&HistoryStore>,
    state: &dyn KeyValueStore,
    pending: &mut Option<Attachment>,
) -> Result<bool> {
    match command {
        ReplCommand::Help => print_help(),
        ReplCommand::New => {
            let model = service.settings().model.clone();
            let id = service.sessions_mut().create_session(model);
            println!("Started conversation {}", short_id(&id).cyan());
        }
        ReplCommand::Sessions => {
            let active = service.sessions().active().map(|s| s.id.clone());
            for session in service.sessions().list() {
                let marker = if Some(&session.id) == active.as_ref() { "*" } else { " " };
                println!(
                    "{} {}  {}  ({} messages)",
                    marker,
                    session.short_id().cyan(),
                    session.title,
                    session.messages.len()
                );
            }
        }
        ReplCommand::Switch(prefix) => {
            let found = service
                .sessions()
                .list()
                .into_iter()
                .find(|s| s.id.starts_with(&prefix))
                .map(|s| s.id.clone());
            match found {
                Some(id) => {
                    service.sessions_mut().set_active(&id)?;
                    println!("Switched to {}", short_id(&id).cyan());
                }
                None => println!("{}", format!("No conversation matches {}", prefix).yellow()),
            }
        }
        ReplCommand::Rename(title) => {
            let id = service.ensure_active_session();
            service.sessions_mut().rename_session(&id, &title)?;
            persist_session(history, service, &id);
            println!("{}", "Renamed.".green());
        }
        ReplCommand::Delete => {
            if let Some(id) = service.sessions().active().map(|s| s.id.clone()) {
                service.sessions_mut().delete_session(&id)?;
                if let Some(history) = history {
                    history.delete_session(&id)?;
                }
                println!("{}", format!("Deleted conversation {}", short_id(&id)).green());
            }
        }
        ReplCommand::Attach(path) => match IncomingFile::from_path(&path).and_then(|f| accept(&f)) {
            Ok(attachment) => {
                println!("Attached {}", attachment.file_name().cyan());
                *pending = Some(attachment);
            }
            Err(e) => println!("{}", describe_error(&e).red()),
        },
        ReplCommand::Usage => print_usage(service),
        ReplCommand::Lang(language) => {
            service.set_language(language);
            if let Err(e) = LocalPrefs::new(state).set_language(language) {
                tracing::warn!("Failed to store language: {}", e);
            }
            println!("Language set to {}", language.code());
        }
        ReplCommand::Quit => return Ok(false),
        ReplCommand::Unknown(line) => {
            println!("{}", format!("Unknown command: {} (try /help)", line).yellow());
        }
    }
    Ok(true)
}

/// Start interactive chat mode
///
/// # Arguments
///
/// * `config` - Global configuration
/// * `ephemeral` - Keep local state and history in memory only
/// * `cli_language` - Whether `--language` was given on the command line
/// * `resume` - Stored session to continue (full id or prefix)
pub async fn run_chat(
    config: Config,
    ephemeral: bool,
    cli_language: bool,
    resume: Option<String>,
) -> Result<()> {
    let state = open_state(&config, ephemeral)?;
    let history = open_history(&config, ephemeral)?;

    if let Some(history) = &history {
        let days = config.account.plan.retention_days();
        match history.purge_expired(days, Utc::now().timestamp_millis()) {
            Ok(0) => {}
            Ok(n) => tracing::info!("Removed {} conversations older than {} days", n, days),
            Err(e) => tracing::warn!("Failed to purge old conversations: {}", e),
        }
    }

    let sessions = match &resume {
        Some(id) => resume_session(history.as_ref(), id)?,
        None => SessionStore::new(),
    };
    let settings = chat_settings(&config, state.as_ref(), cli_language);
    let mut service = build_service(&config, state.clone(), sessions, settings)?;

    let mut rl = DefaultEditor::new()?;
    if !age_gate(&mut rl, state.as_ref(), &service, config.quota.welcome_bonus)? {
        println!("Charla is only available to adults.");
        return Ok(());
    }

    println!(
        "{} {} ({})",
        "Charla".bold(),
        service.settings().model.cyan(),
        "/help for commands".dimmed()
    );
    print_usage(&service);

    let mut pending: Option<Attachment> = None;
    loop {
        let prompt = if pending.is_some() {
            format!("{} ", "you [+file]>".green())
        } else {
            format!("{} ", "you>".green())
        };

        match rl.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);

                if let Some(command) = parse_repl_command(trimmed) {
                    match handle_command(
                        command,
                        &mut service,
                        history.as_ref(),
                        state.as_ref(),
                        &mut pending,
                    ) {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(e) => {
                            eprintln!("{}", describe_error(&e).red());
                            continue;
                        }
                    }
                }

                let session_id = service.ensure_active_session();
                match send_interactive(&mut service, &session_id, trimmed, &mut pending).await {
                    Ok((printer, outcome)) => {
                        report_outcome(&printer, &outcome);
                        persist_session(history.as_ref(), &service, &session_id);
                    }
                    Err(e) => eprintln!("{}", describe_error(&e).red()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                tracing::error!("Readline error: {:?}", err);
                break;
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenSource;
    use crate::chat::ChatSettings;
    use crate::ledger::UsageLedger;
    use crate::local_state::MemoryStore;
    use crate::test_utils::{sse_body, test_config, ScriptedBackend, StreamScript};
    use std::sync::Arc;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(parse_repl_command("hola"), None);
        assert_eq!(parse_repl_command("  hola /new"), None);
    }

    #[test]
    fn test_parse_commands_with_arguments() {
        assert_eq!(
            parse_repl_command("/rename  Recetas de cocina "),
            Some(ReplCommand::Rename("Recetas de cocina".to_string()))
        );
        assert_eq!(
            parse_repl_command("/attach foto.png"),
            Some(ReplCommand::Attach("foto.png".to_string()))
        );
        assert_eq!(
            parse_repl_command("/switch ab12"),
            Some(ReplCommand::Switch("ab12".to_string()))
        );
        assert_eq!(parse_repl_command("/lang EN"), Some(ReplCommand::Lang(Language::En)));
    }

    #[test]
    fn test_missing_argument_is_unknown() {
        assert!(matches!(parse_repl_command("/rename"), Some(ReplCommand::Unknown(_))));
        assert!(matches!(parse_repl_command("/lang fr"), Some(ReplCommand::Unknown(_))));
        assert!(matches!(parse_repl_command("/frobnicate"), Some(ReplCommand::Unknown(_))));
    }

    fn photo() -> Attachment {
        Attachment::Image {
            data: "aGVsbG8=".to_string(),
            mime_type: "image/png".to_string(),
            file_name: "foto.png".to_string(),
            preview: None,
        }
    }

    fn service_with(token: &str) -> ChatService {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        ChatService::new(
            ChatSettings::from_config(&test_config()),
            SessionStore::new(),
            UsageLedger::new(store),
            Box::new(StaticTokenSource::new(token)),
            Box::new(ScriptedBackend::new(
                StreamScript::Body(sse_body(&["Bonita"])),
                None,
            )),
        )
    }

    #[tokio::test]
    async fn test_rejected_send_keeps_pending_attachment() {
        let mut service = service_with("");
        let id = service.ensure_active_session();
        let mut pending = Some(photo());

        assert!(send_interactive(&mut service, &id, "Mira", &mut pending)
            .await
            .is_err());
        assert_eq!(pending, Some(photo()));
        assert!(service.sessions().get(&id).unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn test_accepted_send_consumes_pending_attachment() {
        let mut service = service_with("tok");
        let id = service.ensure_active_session();
        let mut pending = Some(photo());

        let (_, outcome) = send_interactive(&mut service, &id, "Mira", &mut pending)
            .await
            .unwrap();
        assert!(matches!(outcome, SendOutcome::Replied { .. }));
        assert_eq!(pending, None);
        let session = service.sessions().get(&id).unwrap();
        assert_eq!(session.messages[0].attachment, Some(photo()));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_repl_command("/quit"), Some(ReplCommand::Quit));
        assert_eq!(parse_repl_command("/EXIT"), Some(ReplCommand::Quit));
        assert_eq!(parse_repl_command("/new"), Some(ReplCommand::New));
        assert_eq!(parse_repl_command("/usage"), Some(ReplCommand::Usage));
        assert_eq!(parse_repl_command("/help"), Some(ReplCommand::Help));
    }
}
