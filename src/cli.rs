//! Command-line interface definition for Charla
//!
//! This module defines the CLI structure using clap's derive API.

use crate::entitlement::Plan;
use crate::locale::Language;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Charla - terminal chat client
///
/// Chat with a hosted model through the Charla proxy, with a local daily
/// message allowance on the free plan.
#[derive(Parser, Debug, Clone)]
#[command(name = "charla")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Override the model
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Override the character (persona)
    #[arg(long, global = true)]
    pub character: Option<String>,

    /// Override the plan (free, basic_monthly, pro_monthly, basic_yearly, pro_yearly)
    #[arg(long, global = true)]
    pub plan: Option<Plan>,

    /// Override the conversation language (es, en)
    #[arg(long, global = true)]
    pub language: Option<Language>,

    /// Keep local state in memory only
    #[arg(long, global = true)]
    pub ephemeral: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Available commands for Charla
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive chat
    Chat {
        /// Resume a stored session (full id or 8-char prefix)
        #[arg(short, long)]
        resume: Option<String>,
    },

    /// Send one message and print the reply
    Send {
        /// Message text
        message: String,

        /// Attach an image or PDF
        #[arg(short, long)]
        attach: Option<PathBuf>,

        /// Use a single buffered request instead of streaming
        #[arg(long)]
        no_stream: bool,

        /// Continue a stored session (full id or 8-char prefix)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Show today's usage and remaining messages
    Usage,

    /// Manage stored conversations
    History {
        /// History subcommand
        #[command(subcommand)]
        command: HistoryCommand,
    },

    /// Print a checkout URL for a paid plan
    Upgrade {
        /// Plan to purchase
        #[arg(short, long)]
        plan: Plan,
    },

    /// Sign in to the hosted account
    Login {
        /// Account email
        #[arg(short, long)]
        email: String,
    },

    /// Forget stored credentials
    Logout,

    /// Print this device's fingerprint
    Fingerprint,

    /// Show what would be sent for an attachment
    Extract {
        /// Image or PDF file
        file: PathBuf,
    },
}

/// History subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum HistoryCommand {
    /// List stored sessions
    List,

    /// Delete a session
    Delete {
        /// Session id (full or 8-char prefix)
        id: String,
    },

    /// Rename a session
    Rename {
        /// Session id (full or 8-char prefix)
        id: String,
        /// New title
        title: String,
    },

    /// Remove sessions older than the plan's retention window
    Purge,
}
