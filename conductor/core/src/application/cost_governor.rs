// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cost Governor
//!
//! Read-side budget checks over the external spend ledger. The governor is
//! consulted, not enforcing: the adaptive coordinator treats a disallowed
//! budget as a hard stop, while spend accrual itself happens in the
//! accounting collaborator.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::domain::budget::{BudgetStatus, UsageSummary};
use crate::domain::config::BudgetDefaults;
use crate::domain::repository::{BudgetLedger, RepositoryError};

/// Days in the rolling window treated as "monthly" spend.
const MONTHLY_WINDOW_DAYS: i64 = 30;

pub struct CostGovernor {
    ledger: Arc<dyn BudgetLedger>,
    defaults: BudgetDefaults,
}

impl CostGovernor {
    pub fn new(ledger: Arc<dyn BudgetLedger>, defaults: BudgetDefaults) -> Self {
        Self { ledger, defaults }
    }

    /// Current budget reading for one billing identity.
    pub async fn check_budget(&self, identity: &str) -> Result<BudgetStatus, RepositoryError> {
        let since = Utc::now() - Duration::days(MONTHLY_WINDOW_DAYS);
        let spend = self.ledger.spend_since(identity, since).await?;
        let limit = self
            .ledger
            .monthly_limit(identity)
            .await?
            .unwrap_or(self.defaults.monthly_limit_usd);

        let utilization = if limit > 0.0 {
            (spend / limit) * 100.0
        } else {
            100.0
        };
        let status = BudgetStatus {
            identity: identity.to_string(),
            allowed: limit > 0.0 && spend < limit,
            monthly_spend_usd: spend,
            monthly_limit_usd: limit,
            utilization_percent: utilization,
        };
        debug!(
            identity,
            spend = status.monthly_spend_usd,
            limit = status.monthly_limit_usd,
            allowed = status.allowed,
            "budget checked"
        );
        Ok(status)
    }

    /// Rolling spend summary over the last `days` days.
    pub async fn get_usage_summary(&self, identity: &str, days: u32) -> Result<UsageSummary, RepositoryError> {
        let window = days.max(1);
        let since = Utc::now() - Duration::days(window as i64);
        let total = self.ledger.spend_since(identity, since).await?;
        Ok(UsageSummary {
            identity: identity.to_string(),
            window_days: window,
            total_spend_usd: total,
            daily_average_usd: total / window as f64,
        })
    }
}
