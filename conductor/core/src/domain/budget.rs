// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};

/// Point-in-time budget reading for one billing identity.
///
/// Spend accrual happens in an external accounting collaborator; the
/// conductor only reads. Callers consult rather than enforce: the adaptive
/// coordinator treats `allowed == false` as a hard stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub identity: String,
    pub allowed: bool,
    pub monthly_spend_usd: f64,
    pub monthly_limit_usd: f64,
    pub utilization_percent: f64,
}

/// Rolling spend summary for recent-activity views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub identity: String,
    pub window_days: u32,
    pub total_spend_usd: f64,
    pub daily_average_usd: f64,
}
