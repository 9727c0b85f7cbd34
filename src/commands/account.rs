//! Account commands: login, logout, upgrade and fingerprint

use super::open_state;
use crate::auth::{clear_tokens, load_tokens, save_tokens, AuthClient};
use crate::checkout::CheckoutClient;
use crate::config::Config;
use crate::entitlement::Plan;
use crate::error::{CharlaError, Result};
use crate::ledger::{device_fingerprint, FingerprintSignals};
use colored::Colorize;
use rustyline::DefaultEditor;

/// Environment variable read instead of prompting for a password
pub const PASSWORD_ENV: &str = "CHARLA_PASSWORD";

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    let mut rl = DefaultEditor::new()?;
    Ok(rl.readline("Password: ")?)
}

/// Signs in and stores the token pair locally
pub async fn login(config: &Config, email: &str) -> Result<()> {
    let client = AuthClient::new(&config.auth)?;
    let password = read_password()?;
    if password.is_empty() {
        return Err(CharlaError::LoginRequired("empty password".to_string()).into());
    }

    let tokens = client.sign_in(email, &password).await?;
    let state = open_state(config, false)?;
    save_tokens(state.as_ref(), &tokens)?;

    println!("{}", format!("Signed in as {}", email).green());
    tracing::debug!("Access token valid until {}", tokens.expires_at);
    Ok(())
}

/// Forgets stored credentials
pub fn logout(config: &Config) -> Result<()> {
    let state = open_state(config, false)?;
    if load_tokens(state.as_ref()).is_none() {
        println!("{}", "Not signed in.".yellow());
        return Ok(());
    }
    clear_tokens(state.as_ref())?;
    println!("{}", "Signed out.".green());
    Ok(())
}

/// Creates a checkout for a paid plan and prints its URL
///
/// # Errors
///
/// Returns `CharlaError::Config` when `account.email` or `account.user_id`
/// is missing, and `CharlaError::Checkout` when the checkout fails
pub async fn upgrade(config: &Config, plan: Plan) -> Result<()> {
    let email = config
        .account
        .email
        .as_deref()
        .filter(|e| !e.is_empty())
        .ok_or_else(|| CharlaError::Config("account.email is required to upgrade".to_string()))?;
    let user_id = config
        .account
        .user_id
        .as_deref()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| CharlaError::Config("account.user_id is required to upgrade".to_string()))?;

    let client = CheckoutClient::new(&config.api)?;
    let url = client.create_checkout(plan, email, user_id).await?;

    println!("Complete your {} purchase here:", plan.to_string().cyan());
    println!("  {}", url.bold());
    println!("Your plan is activated once the payment is confirmed.");
    Ok(())
}

/// Prints the cached device fingerprint
pub fn fingerprint(config: &Config, ephemeral: bool) -> Result<()> {
    let state = open_state(config, ephemeral)?;
    let id = device_fingerprint(state.as_ref(), &FingerprintSignals::collect());
    println!("{}", id);
    Ok(())
}
