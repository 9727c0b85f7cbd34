//! Charla - terminal chat client library
//!
//! This library provides the pieces behind the `charla` binary: a local
//! quota gate, a streamed chat pipeline with a buffered fallback, an
//! attachment preprocessor and an in-memory session store mirrored to a
//! local history database.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `local_state`: key-value persistence for device-local state
//! - `ledger`: per-day message counter and device fingerprint
//! - `entitlement`: plans and the send gate
//! - `auth`: access tokens with proactive refresh
//! - `providers`: chat completion wire types, HTTP backend and SSE decoding
//! - `attachment`: image and PDF preprocessing
//! - `session`: in-memory session store
//! - `storage`: SQLite history mirror
//! - `chat`: generation state machine and the send pipeline
//! - `checkout`: hosted checkout creation
//! - `config`, `cli`, `commands`, `error`, `locale`: the application shell
//!
//! # Example
//!
//! ```no_run
//! use charla::Config;
//!
//! fn main() -> anyhow::Result<()> {
//!     let cli = <charla::cli::Cli as clap::Parser>::parse_from(["charla", "usage"]);
//!     let config = Config::load("config.yaml", &cli)?;
//!     config.validate()?;
//!     Ok(())
//! }
//! ```

pub mod attachment;
pub mod auth;
pub mod chat;
pub mod checkout;
pub mod cli;
pub mod commands;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod ledger;
pub mod local_state;
pub mod locale;
pub mod providers;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use chat::{ChatService, ChatSettings, SendOutcome};
pub use config::Config;
pub use entitlement::{Entitlement, Plan};
pub use error::{CharlaError, Result};
pub use session::{ChatSession, Message, Role, SessionStore};

#[cfg(test)]
pub mod test_utils;
