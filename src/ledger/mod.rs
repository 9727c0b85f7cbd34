//! Local usage ledger
//!
//! This module tracks how many messages this device sent today. The counter
//! lives in the local key-value store next to the calendar day it belongs
//! to; the first access on a new local day resets it to zero.
//!
//! The ledger is advisory. When the store is unavailable every call degrades
//! to "nothing used" instead of blocking the user, and concurrent writers may
//! lose increments.

pub mod fingerprint;

pub use fingerprint::{device_fingerprint, fingerprint_hash, FingerprintSignals};

use crate::error::Result;
use crate::local_state::{
    KeyValueStore, KEY_BONUS_FLAG_PREFIX, KEY_BONUS_MESSAGES, KEY_USED_COUNT, KEY_USED_DATE,
};
use chrono::{Local, NaiveDate};
use std::sync::Arc;

/// Source of the current local calendar date
pub type TodayFn = Box<dyn Fn() -> NaiveDate + Send + Sync>;

/// Formats a date the way the counter's day stamp is stored
///
/// Matches the browser `Date.toDateString()` layout so state written by
/// either client stays compatible.
///
/// # Examples
///
/// ```
/// use charla::ledger::day_stamp;
/// use chrono::NaiveDate;
///
/// let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
/// assert_eq!(day_stamp(date), "Fri Jan 05 2024");
/// ```
pub fn day_stamp(date: NaiveDate) -> String {
    date.format("%a %b %d %Y").to_string()
}

/// Per-device daily message counter
pub struct UsageLedger {
    store: Arc<dyn KeyValueStore>,
    today: TodayFn,
}

impl UsageLedger {
    /// Creates a ledger keyed by the local calendar date
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(store, Box::new(|| Local::now().date_naive()))
    }

    /// Creates a ledger with an explicit date source
    pub fn with_clock(store: Arc<dyn KeyValueStore>, today: TodayFn) -> Self {
        Self { store, today }
    }

    /// Messages used today
    ///
    /// Resets and persists the counter when the stored day stamp is not
    /// today's. Never fails: storage errors are logged and read as zero.
    pub fn used_today(&self) -> u32 {
        match self.current_count() {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("Usage ledger unavailable, treating as unused: {}", e);
                0
            }
        }
    }

    /// Records one sent message
    ///
    /// Applies the same day rollover as [`UsageLedger::used_today`] first.
    /// Storage errors are logged and the increment is dropped.
    pub fn increment_used(&self) {
        let result = self.current_count().and_then(|count| {
            let next = count.saturating_add(1);
            tracing::debug!(used = next, "Usage ledger incremented");
            self.store.set(KEY_USED_COUNT, &next.to_string())
        });

        if let Err(e) = result {
            tracing::warn!("Failed to record message usage: {}", e);
        }
    }

    /// Extra free messages granted through one-time bonuses
    pub fn bonus_messages(&self) -> u32 {
        match self.store.get(KEY_BONUS_MESSAGES) {
            Ok(value) => value.and_then(|v| v.parse().ok()).unwrap_or(0),
            Err(e) => {
                tracing::warn!("Failed to read bonus allowance: {}", e);
                0
            }
        }
    }

    /// Grants a one-time bonus allowance
    ///
    /// Returns `true` when the bonus was granted now and `false` when the
    /// flag was already set (or the store is unavailable). The daily counter
    /// is left untouched; the allowance raises the effective free limit.
    pub fn claim_bonus(&self, flag: &str, messages: u32) -> bool {
        let key = format!("{}{}", KEY_BONUS_FLAG_PREFIX, flag);
        let result: Result<bool> = (|| {
            if self.store.get(&key)?.is_some() {
                return Ok(false);
            }
            let total = self.bonus_messages().saturating_add(messages);
            self.store.set(KEY_BONUS_MESSAGES, &total.to_string())?;
            self.store.set(&key, "true")?;
            Ok(true)
        })();

        match result {
            Ok(granted) => {
                if granted {
                    tracing::info!(flag, messages, "Bonus messages granted");
                }
                granted
            }
            Err(e) => {
                tracing::warn!("Failed to claim bonus {}: {}", flag, e);
                false
            }
        }
    }

    fn current_count(&self) -> Result<u32> {
        let stamp = day_stamp((self.today)());
        let stored = self.store.get(KEY_USED_DATE)?;

        if stored.as_deref() != Some(stamp.as_str()) {
            tracing::debug!(day = %stamp, "New day, resetting usage counter");
            // Counter before stamp: a failed write leaves the old stamp and a
            // later call resets again.
            self.store.set(KEY_USED_COUNT, "0")?;
            self.store.set(KEY_USED_DATE, &stamp)?;
            return Ok(0);
        }

        Ok(self
            .store
            .get(KEY_USED_COUNT)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }
}
