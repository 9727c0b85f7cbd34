//! `charla usage`

use super::open_state;
use crate::config::Config;
use crate::entitlement::{Entitlement, Plan};
use crate::error::Result;
use crate::ledger::UsageLedger;
use colored::Colorize;
use prettytable::{format, Table};

/// Usage figures for today
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageReport {
    /// Plan in effect
    pub plan: Plan,
    /// Messages sent today
    pub used: u32,
    /// Free limit including bonus allowance
    pub limit: u32,
    /// Gate snapshot
    pub entitlement: Entitlement,
}

impl UsageReport {
    /// Reads today's figures from the ledger
    pub fn collect(ledger: &UsageLedger, plan: Plan, free_daily_limit: u32) -> Self {
        let used = ledger.used_today();
        let limit = free_daily_limit.saturating_add(ledger.bonus_messages());
        Self {
            plan,
            used,
            limit,
            entitlement: Entitlement::resolve(plan, used, limit),
        }
    }
}

/// Prints plan, messages used today and messages left
pub fn show_usage(config: &Config, ephemeral: bool) -> Result<()> {
    let state = open_state(config, ephemeral)?;
    let ledger = UsageLedger::new(state);
    let report = UsageReport::collect(&ledger, config.account.plan, config.quota.free_daily_limit);

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_CLEAN);
    table.add_row(prettytable::row!["Plan".bold(), report.plan.to_string().cyan()]);
    table.add_row(prettytable::row!["Used today".bold(), report.used]);
    if report.entitlement.is_unlimited() {
        table.add_row(prettytable::row!["Remaining".bold(), "unlimited".green()]);
    } else {
        table.add_row(prettytable::row!["Daily limit".bold(), report.limit]);
        let remaining = report.entitlement.remaining.to_string();
        let remaining = if report.entitlement.can_send {
            remaining.green()
        } else {
            remaining.red()
        };
        table.add_row(prettytable::row!["Remaining".bold(), remaining]);
    }
    table.printstd();

    if !report.entitlement.can_send {
        println!(
            "{}",
            "Daily limit reached. Run `charla upgrade --plan <plan>` for unlimited messages.".yellow()
        );
    }
    Ok(())
}
