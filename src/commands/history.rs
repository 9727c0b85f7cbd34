use crate::cli::HistoryCommand;
use crate::config::Config;
use crate::error::{CharlaError, Result};
use crate::session::TITLE_MAX_CHARS;
use crate::storage::HistoryStore;
use chrono::Utc;
use colored::Colorize;
use prettytable::{format, Table};

fn open(config: &Config) -> Result<HistoryStore> {
    match &config.storage.history_db {
        Some(path) => HistoryStore::new_with_path(path),
        None => HistoryStore::new(),
    }
}

fn shorten(title: &str) -> String {
    if title.chars().count() > TITLE_MAX_CHARS {
        let head: String = title.chars().take(TITLE_MAX_CHARS - 3).collect();
        format!("{}...", head)
    } else {
        title.to_string()
    }
}

/// Handle history commands
pub fn handle_history(config: &Config, command: HistoryCommand) -> Result<()> {
    let storage = open(config)?;

    match command {
        HistoryCommand::List => {
            let sessions = storage.list_sessions()?;

            if sessions.is_empty() {
                println!("{}", "No conversation history found.".yellow());
                return Ok(());
            }

            let mut table = Table::new();
            table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

            table.add_row(prettytable::row![
                "ID".bold(),
                "Title".bold(),
                "Model".bold(),
                "Messages".bold(),
                "Last Updated".bold()
            ]);

            for session in sessions {
                let id_short: String = session.id.chars().take(8).collect();
                let updated = session
                    .updated_at
                    .with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M")
                    .to_string();

                table.add_row(prettytable::row![
                    id_short.cyan(),
                    shorten(&session.title),
                    session.model,
                    session.message_count,
                    updated
                ]);
            }

            println!("\nConversation History:");
            table.printstd();
            println!();
            println!(
                "Use {} to resume a session.",
                "charla chat --resume <ID>".cyan()
            );
            println!();
        }
        HistoryCommand::Delete { id } => {
            let removed = storage.delete_session(&id)?;
            if removed == 0 {
                return Err(CharlaError::SessionNotFound(id).into());
            }
            println!("{}", format!("Deleted {} conversation(s) matching {}", removed, id).green());
        }
        HistoryCommand::Rename { id, title } => {
            let title = title.trim();
            if title.is_empty() {
                return Err(CharlaError::Config("title cannot be empty".to_string()).into());
            }
            let renamed = storage.rename_session(&id, title, Utc::now().timestamp_millis())?;
            if renamed == 0 {
                return Err(CharlaError::SessionNotFound(id).into());
            }
            println!("{}", format!("Renamed {} to \"{}\"", id, title).green());
        }
        HistoryCommand::Purge => {
            let days = config.account.plan.retention_days();
            let removed = storage.purge_expired(days, Utc::now().timestamp_millis())?;
            println!(
                "{}",
                format!(
                    "Removed {} conversation(s) older than {} days ({} plan)",
                    removed, days, config.account.plan
                )
                .green()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Message, SessionStore};
    use crate::test_utils::test_config;
    use tempfile::tempdir;

    #[test]
    fn test_shorten_counts_characters() {
        assert_eq!(shorten("corto"), "corto");
        let long = "ñ".repeat(50);
        let short = shorten(&long);
        assert!(short.ends_with("..."));
        assert_eq!(short.chars().count(), TITLE_MAX_CHARS);
    }

    #[test]
    fn test_rename_and_delete_through_config_path() {
        let dir = tempdir().unwrap();
        let mut config = test_config();
        config.storage.history_db = Some(dir.path().join("history.db"));

        let mut sessions = SessionStore::new();
        let id = sessions.create_session("venice-uncensored");
        sessions.append_message(&id, Message::user("Hola")).unwrap();
        open(&config)
            .unwrap()
            .save_session(sessions.get(&id).unwrap())
            .unwrap();

        handle_history(
            &config,
            HistoryCommand::Rename {
                id: id[..8].to_string(),
                title: "Saludos".to_string(),
            },
        )
        .unwrap();
        let stored = open(&config).unwrap().load_session(&id).unwrap().unwrap();
        assert_eq!(stored.title, "Saludos");

        handle_history(&config, HistoryCommand::Delete { id: id.clone() }).unwrap();
        let err = handle_history(&config, HistoryCommand::Delete { id }).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CharlaError>(),
            Some(CharlaError::SessionNotFound(_))
        ));
    }
}
