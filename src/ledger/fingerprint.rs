//! Device fingerprint
//!
//! A stable-ish opaque identifier derived from environment signals with a
//! simple rolling hash. It deters casual quota resets; it is not an identity
//! guarantee and not cryptographically secure.

use crate::local_state::{KeyValueStore, KEY_FINGERPRINT};
use chrono::{Local, Offset};

/// Longest user-agent prefix that feeds the hash
const USER_AGENT_MAX_CHARS: usize = 50;

/// Environment signals hashed into the fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintSignals {
    /// Rendering signature (terminal identity in a CLI)
    pub render_signature: String,
    /// Locale identifier
    pub locale: String,
    /// Screen geometry as `WIDTHxHEIGHT`
    pub screen: String,
    /// Minutes to add to local time to reach UTC, positive west of
    /// Greenwich (UTC-3 is `180`), as browsers report it
    pub timezone_offset_minutes: i32,
    /// Client user agent
    pub user_agent: String,
}

impl FingerprintSignals {
    /// Collects signals from the current process environment
    pub fn collect() -> Self {
        let env = |key: &str| std::env::var(key).unwrap_or_default();

        let render_signature = format!("{}/{}", env("TERM"), env("COLORTERM"));
        let locale = std::env::var("LC_ALL")
            .or_else(|_| std::env::var("LANG"))
            .unwrap_or_default();
        let screen = format!(
            "{}x{}",
            std::env::var("COLUMNS").unwrap_or_else(|_| "0".to_string()),
            std::env::var("LINES").unwrap_or_else(|_| "0".to_string())
        );
        let timezone_offset_minutes =
            timezone_offset_minutes(Local::now().offset().fix().local_minus_utc());
        let user_agent = format!(
            "charla/{} ({}; {})",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH
        );

        Self {
            render_signature,
            locale,
            screen,
            timezone_offset_minutes,
            user_agent,
        }
    }

    /// Joined hash input
    pub fn canonical(&self) -> String {
        let user_agent: String = self.user_agent.chars().take(USER_AGENT_MAX_CHARS).collect();
        [
            self.render_signature.clone(),
            self.locale.clone(),
            self.screen.clone(),
            self.timezone_offset_minutes.to_string(),
            user_agent,
        ]
        .join("|")
    }
}

/// Converts chrono's east-positive offset in seconds to west-positive minutes
fn timezone_offset_minutes(local_minus_utc_secs: i32) -> i32 {
    -local_minus_utc_secs / 60
}

/// Rolling 31-multiplier hash over UTF-16 code units, base36 encoded
///
/// `hash = (hash << 5) - hash + unit` with 32-bit wraparound; the absolute
/// value is rendered in base36.
///
/// # Examples
///
/// ```
/// use charla::ledger::fingerprint_hash;
///
/// assert_eq!(fingerprint_hash(""), "0");
/// assert_eq!(fingerprint_hash("a"), "2p");
/// ```
pub fn fingerprint_hash(input: &str) -> String {
    let hash = input.encode_utf16().fold(0i32, |hash, unit| {
        (hash << 5).wrapping_sub(hash).wrapping_add(i32::from(unit))
    });
    to_base36(hash.unsigned_abs())
}

fn to_base36(mut value: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Returns the cached device fingerprint, computing it on first use
///
/// A store failure still yields a fingerprint; it just is not cached.
pub fn device_fingerprint(store: &dyn KeyValueStore, signals: &FingerprintSignals) -> String {
    if let Ok(Some(cached)) = store.get(KEY_FINGERPRINT) {
        if !cached.is_empty() {
            return cached;
        }
    }

    let fingerprint = fingerprint_hash(&signals.canonical());
    if let Err(e) = store.set(KEY_FINGERPRINT, &fingerprint) {
        tracing::warn!("Failed to cache device fingerprint: {}", e);
    }
    fingerprint
}
