//! Charla - terminal chat client
//!
#![doc = "Main entry point for the Charla chat client."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use charla::cli::{Cli, Commands};
use charla::commands;
use charla::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    let cli_language = cli.language.is_some();

    // Execute command
    match cli.command {
        Commands::Chat { resume } => {
            if let Some(r) = &resume {
                tracing::debug!("Resuming conversation: {}", r);
            }
            commands::chat::run_chat(config, cli.ephemeral, cli_language, resume).await?;
            Ok(())
        }
        Commands::Send {
            message,
            attach,
            no_stream,
            session,
        } => {
            let options = commands::send::SendOptions {
                message,
                attach,
                no_stream,
                session,
                ephemeral: cli.ephemeral,
                cli_language,
            };
            if let Err(e) = commands::send::run_send(config, options).await {
                eprintln!("{}", commands::describe_error(&e));
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Usage => commands::usage::show_usage(&config, cli.ephemeral),
        Commands::History { command } => commands::history::handle_history(&config, command),
        Commands::Upgrade { plan } => commands::account::upgrade(&config, plan).await,
        Commands::Login { email } => commands::account::login(&config, &email).await,
        Commands::Logout => commands::account::logout(&config),
        Commands::Fingerprint => commands::account::fingerprint(&config, cli.ephemeral),
        Commands::Extract { file } => {
            commands::extract::run_extract(&file, config.chat.language)
        }
    }
}

/// Initialize tracing/logging
///
/// Logs go to stderr so streamed replies on stdout stay clean. `RUST_LOG`
/// overrides the default filter.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "charla=debug" } else { "charla=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
