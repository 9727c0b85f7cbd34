//! Plans and the entitlement gate
//!
//! This module decides whether a new message may be sent and how many remain
//! for today. The check is advisory: it keeps a well-behaved client from
//! sending, while the chat proxy enforces the authoritative quota with its
//! own accounting.

use crate::error::CharlaError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Remaining-count reported for plans without a daily cap
pub const UNLIMITED: u32 = 999;

/// Subscription tier
///
/// A closed set: parsing an unknown plan name fails instead of falling back
/// to free-tier behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// Free tier with a daily message cap
    #[default]
    Free,
    /// Basic tier billed monthly
    BasicMonthly,
    /// Pro tier billed monthly
    ProMonthly,
    /// Basic tier billed yearly
    BasicYearly,
    /// Pro tier billed yearly
    ProYearly,
}

impl Plan {
    /// Every known plan, free first
    pub const ALL: [Plan; 5] = [
        Plan::Free,
        Plan::BasicMonthly,
        Plan::ProMonthly,
        Plan::BasicYearly,
        Plan::ProYearly,
    ];

    /// Wire name of the plan
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::BasicMonthly => "basic_monthly",
            Self::ProMonthly => "pro_monthly",
            Self::BasicYearly => "basic_yearly",
            Self::ProYearly => "pro_yearly",
        }
    }

    /// Whether the plan has no daily message cap
    ///
    /// # Examples
    ///
    /// ```
    /// use charla::entitlement::Plan;
    ///
    /// assert!(!Plan::Free.is_unlimited());
    /// assert!(Plan::BasicMonthly.is_unlimited());
    /// ```
    pub fn is_unlimited(self) -> bool {
        !matches!(self, Self::Free)
    }

    /// Days a conversation is kept after its last update
    pub fn retention_days(self) -> u32 {
        match self {
            Self::Free => 7,
            Self::BasicMonthly | Self::BasicYearly => 30,
            Self::ProMonthly | Self::ProYearly => 90,
        }
    }
}

impl FromStr for Plan {
    type Err = CharlaError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let name = s.trim();
        Plan::ALL
            .into_iter()
            .find(|plan| plan.as_str() == name)
            .ok_or_else(|| {
                let known: Vec<&str> = Plan::ALL.iter().map(|p| p.as_str()).collect();
                CharlaError::Config(format!(
                    "Unknown plan: {}. Must be one of: {}",
                    name,
                    known.join(", ")
                ))
            })
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a message may be sent
///
/// # Examples
///
/// ```
/// use charla::entitlement::{can_send, Plan};
///
/// assert!(can_send(Plan::Free, 9, 10));
/// assert!(!can_send(Plan::Free, 10, 10));
/// assert!(can_send(Plan::ProMonthly, 10_000, 10));
/// ```
pub fn can_send(plan: Plan, used_today: u32, free_limit: u32) -> bool {
    plan.is_unlimited() || used_today < free_limit
}

/// Messages left today, [`UNLIMITED`] for uncapped plans
pub fn remaining(plan: Plan, used_today: u32, free_limit: u32) -> u32 {
    if plan.is_unlimited() {
        UNLIMITED
    } else {
        free_limit.saturating_sub(used_today)
    }
}

/// Snapshot of the gate for one plan and usage count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entitlement {
    /// Plan the snapshot was computed for
    pub plan: Plan,
    /// Whether a new message may be sent
    pub can_send: bool,
    /// Messages left today
    pub remaining: u32,
}

impl Entitlement {
    /// Resolves the gate for a plan and today's usage
    ///
    /// # Examples
    ///
    /// ```
    /// use charla::entitlement::{Entitlement, Plan};
    ///
    /// let gate = Entitlement::resolve(Plan::Free, 7, 10);
    /// assert!(gate.can_send);
    /// assert_eq!(gate.remaining, 3);
    /// ```
    pub fn resolve(plan: Plan, used_today: u32, free_limit: u32) -> Self {
        Self {
            plan,
            can_send: can_send(plan, used_today, free_limit),
            remaining: remaining(plan, used_today, free_limit),
        }
    }

    /// Whether the snapshot reports an uncapped plan
    pub fn is_unlimited(&self) -> bool {
        self.plan.is_unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_parse_known() {
        for plan in Plan::ALL {
            assert_eq!(plan.as_str().parse::<Plan>().unwrap(), plan);
        }
    }

    #[test]
    fn test_plan_parse_unknown_is_error() {
        let err = "platinum_weekly".parse::<Plan>().unwrap_err();
        assert!(err.to_string().contains("platinum_weekly"));
    }

    #[test]
    fn test_plan_serde_names() {
        let yaml = serde_yaml::to_string(&Plan::BasicMonthly).unwrap();
        assert!(yaml.contains("basic_monthly"));
        let plan: Plan = serde_yaml::from_str("pro_yearly").unwrap();
        assert_eq!(plan, Plan::ProYearly);
    }

    #[test]
    fn test_retention_windows() {
        assert_eq!(Plan::Free.retention_days(), 7);
        assert_eq!(Plan::BasicMonthly.retention_days(), 30);
        assert_eq!(Plan::ProYearly.retention_days(), 90);
    }

    #[test]
    fn test_free_remaining_is_non_increasing() {
        let limit = 10;
        let mut previous = remaining(Plan::Free, 0, limit);
        for used in 1..=25 {
            let current = remaining(Plan::Free, used, limit);
            assert!(current <= previous, "remaining grew at used={}", used);
            previous = current;
        }
    }

    #[test]
    fn test_free_exhausted_cannot_send() {
        let limit = 10;
        for used in limit..limit + 20 {
            assert_eq!(remaining(Plan::Free, used, limit), 0);
            assert!(!can_send(Plan::Free, used, limit));
        }
    }

    #[test]
    fn test_non_free_plans_always_sendable() {
        for plan in Plan::ALL.into_iter().filter(|p| *p != Plan::Free) {
            for used in [0, 10, 999, u32::MAX] {
                assert!(can_send(plan, used, 10));
                assert_eq!(remaining(plan, used, 10), UNLIMITED);
            }
        }
    }

    #[test]
    fn test_zero_free_limit_blocks() {
        let gate = Entitlement::resolve(Plan::Free, 0, 0);
        assert!(!gate.can_send);
        assert_eq!(gate.remaining, 0);
    }
}
