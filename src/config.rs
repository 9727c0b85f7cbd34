//! Configuration management for Charla
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::entitlement::Plan;
use crate::error::{CharlaError, Result};
use crate::locale::Language;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for Charla
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Chat proxy endpoints
    #[serde(default)]
    pub api: ApiConfig,
    /// Hosted auth backend
    #[serde(default)]
    pub auth: AuthConfig,
    /// Conversation settings
    #[serde(default)]
    pub chat: ChatConfig,
    /// Free-tier quota
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Account identity and plan
    #[serde(default)]
    pub account: AccountConfig,
    /// Local file locations
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Chat proxy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the proxy
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Path of the chat-completion handler
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    /// Path of the checkout handler
    #[serde(default = "default_checkout_path")]
    pub checkout_path: String,
    /// Request timeout in seconds
    ///
    /// Bounds a whole buffered request. A streamed reply may run longer: the
    /// limit applies to the connect, to the response headers and to each gap
    /// between body chunks.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_chat_path() -> String {
    "/api/chat".to_string()
}

fn default_checkout_path() -> String {
    "/api/create-checkout".to_string()
}

fn default_timeout() -> u64 {
    120
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            chat_path: default_chat_path(),
            checkout_path: default_checkout_path(),
            timeout_seconds: default_timeout(),
        }
    }
}

/// Auth backend configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the auth backend
    #[serde(default)]
    pub url: Option<String>,
    /// Public (anon) API key sent as `apikey`
    #[serde(default)]
    pub anon_key: Option<String>,
}

/// Conversation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,
    /// Character (persona) identifier
    #[serde(default)]
    pub character: Option<String>,
    /// Stream replies (with buffered fallback)
    #[serde(default = "default_stream")]
    pub stream: bool,
    /// Longest accepted message in characters
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    /// Language for texts written into conversations
    #[serde(default)]
    pub language: Language,
}

fn default_model() -> String {
    "venice-uncensored".to_string()
}

fn default_stream() -> bool {
    true
}

fn default_max_message_chars() -> usize {
    4000
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            character: None,
            stream: default_stream(),
            max_message_chars: default_max_message_chars(),
            language: Language::default(),
        }
    }
}

/// Free-tier quota configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Messages per local day on the free plan
    #[serde(default = "default_free_daily_limit")]
    pub free_daily_limit: u32,
    /// One-time allowance granted when the age gate is first confirmed
    #[serde(default = "default_welcome_bonus")]
    pub welcome_bonus: u32,
}

fn default_free_daily_limit() -> u32 {
    10
}

fn default_welcome_bonus() -> u32 {
    3
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_daily_limit: default_free_daily_limit(),
            welcome_bonus: default_welcome_bonus(),
        }
    }
}

/// Account configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Subscription plan
    #[serde(default)]
    pub plan: Plan,
    /// Account email, used for checkout
    #[serde(default)]
    pub email: Option<String>,
    /// Account id, used for checkout
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Local storage locations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Key-value state file; platform data dir when unset
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    /// History database; platform data dir when unset
    #[serde(default)]
    pub history_db: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file, environment, and CLI overrides
    ///
    /// A missing file falls back to defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be parsed, or if `CHARLA_PLAN` or
    /// `CHARLA_LANGUAGE` hold an unknown value
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars()?;
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CharlaError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| CharlaError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) -> Result<()> {
        if let Ok(base_url) = std::env::var("CHARLA_API_BASE_URL") {
            self.api.base_url = base_url;
        }

        if let Ok(model) = std::env::var("CHARLA_MODEL") {
            self.chat.model = model;
        }

        if let Ok(character) = std::env::var("CHARLA_CHARACTER") {
            self.chat.character = Some(character).filter(|c| !c.is_empty());
        }

        if let Ok(limit) = std::env::var("CHARLA_FREE_DAILY_LIMIT") {
            if let Ok(value) = limit.parse() {
                self.quota.free_daily_limit = value;
            } else {
                tracing::warn!("Invalid CHARLA_FREE_DAILY_LIMIT: {}", limit);
            }
        }

        // Plans are a closed set: an unknown value is an error, never "free".
        if let Ok(plan) = std::env::var("CHARLA_PLAN") {
            self.account.plan = plan.parse()?;
            tracing::debug!(plan = %self.account.plan, "Env override: CHARLA_PLAN");
        }

        if let Ok(language) = std::env::var("CHARLA_LANGUAGE") {
            self.chat.language = language.parse()?;
        }

        if let Ok(auth_url) = std::env::var("CHARLA_AUTH_URL") {
            self.auth.url = Some(auth_url);
        }

        if let Ok(auth_key) = std::env::var("CHARLA_AUTH_KEY") {
            self.auth.anon_key = Some(auth_key);
        }

        if let Ok(state_path) = std::env::var("CHARLA_STATE_PATH") {
            self.storage.state_path = Some(PathBuf::from(state_path));
        }

        if let Ok(history_db) = std::env::var("CHARLA_HISTORY_DB") {
            self.storage.history_db = Some(PathBuf::from(history_db));
        }

        Ok(())
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(model) = &cli.model {
            self.chat.model = model.clone();
        }
        if let Some(character) = &cli.character {
            self.chat.character = Some(character.clone());
        }
        if let Some(plan) = cli.plan {
            self.account.plan = plan;
        }
        if let Some(language) = cli.language {
            self.chat.language = language;
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(CharlaError::Config("api.base_url cannot be empty".to_string()).into());
        }

        if url::Url::parse(&self.api.base_url).is_err() {
            return Err(CharlaError::Config(format!(
                "api.base_url is not a valid URL: {}",
                self.api.base_url
            ))
            .into());
        }

        if !self.api.chat_path.starts_with('/') || !self.api.checkout_path.starts_with('/') {
            return Err(
                CharlaError::Config("api paths must start with '/'".to_string()).into(),
            );
        }

        if self.api.timeout_seconds == 0 {
            return Err(
                CharlaError::Config("api.timeout_seconds must be greater than 0".to_string())
                    .into(),
            );
        }

        if self.chat.model.trim().is_empty() {
            return Err(CharlaError::Config("chat.model cannot be empty".to_string()).into());
        }

        if self.chat.max_message_chars == 0 {
            return Err(CharlaError::Config(
                "chat.max_message_chars must be greater than 0".to_string(),
            )
            .into());
        }

        if let Some(url) = &self.auth.url {
            if url::Url::parse(url).is_err() {
                return Err(
                    CharlaError::Config(format!("auth.url is not a valid URL: {}", url)).into(),
                );
            }
        }

        Ok(())
    }
}
