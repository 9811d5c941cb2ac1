// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Repository Implementations
//!
//! Concrete storage backends for the domain repository traits. In-memory
//! implementations serve development and testing; the PostgreSQL
//! implementations in [`postgres`] serve production. Selection happens at
//! the composition root.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::goal::GoalId;
use crate::domain::repository::{BudgetLedger, RepositoryError, TraceRepository};
use crate::domain::trace::{DelegationTrace, TraceId};

/// Append-only trace store over a shared map. Concurrent goal runs append
/// and close rows; a row is only ever written by the run that opened it.
#[derive(Clone, Default)]
pub struct InMemoryTraceRepository {
    rows: Arc<RwLock<HashMap<TraceId, DelegationTrace>>>,
}

impl InMemoryTraceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TraceRepository for InMemoryTraceRepository {
    async fn insert(&self, trace: &DelegationTrace) -> Result<(), RepositoryError> {
        let mut rows = self.rows.write();
        if rows.contains_key(&trace.trace_id) {
            return Err(RepositoryError::Conflict(format!(
                "trace {} already exists",
                trace.trace_id
            )));
        }
        rows.insert(trace.trace_id, trace.clone());
        Ok(())
    }

    async fn update(&self, trace: &DelegationTrace) -> Result<(), RepositoryError> {
        let mut rows = self.rows.write();
        if !rows.contains_key(&trace.trace_id) {
            return Err(RepositoryError::NotFound(trace.trace_id.to_string()));
        }
        rows.insert(trace.trace_id, trace.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: TraceId) -> Result<Option<DelegationTrace>, RepositoryError> {
        Ok(self.rows.read().get(&id).cloned())
    }

    async fn find_by_goal(&self, goal_id: GoalId) -> Result<Vec<DelegationTrace>, RepositoryError> {
        let mut traces: Vec<DelegationTrace> = self
            .rows
            .read()
            .values()
            .filter(|t| t.goal_id == goal_id)
            .cloned()
            .collect();
        traces.sort_by_key(|t| t.started_at);
        Ok(traces)
    }

    async fn find_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<DelegationTrace>, RepositoryError> {
        let mut traces: Vec<DelegationTrace> = self
            .rows
            .read()
            .values()
            .filter(|t| t.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        traces.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        traces.truncate(limit);
        Ok(traces)
    }
}

#[derive(Debug, Clone)]
struct SpendEntry {
    amount_usd: f64,
    recorded_at: DateTime<Utc>,
}

/// In-memory spend ledger. The conductor only reads budgets; the recording
/// methods exist for tests and development seeding.
#[derive(Clone, Default)]
pub struct InMemoryBudgetLedger {
    entries: Arc<RwLock<HashMap<String, Vec<SpendEntry>>>>,
    limits: Arc<RwLock<HashMap<String, f64>>>,
}

impl InMemoryBudgetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one accounted spend entry.
    pub fn record_spend(&self, identity: &str, amount_usd: f64) {
        self.entries
            .write()
            .entry(identity.to_string())
            .or_default()
            .push(SpendEntry {
                amount_usd,
                recorded_at: Utc::now(),
            });
    }

    /// Configure a per-identity monthly limit.
    pub fn set_limit(&self, identity: &str, monthly_limit_usd: f64) {
        self.limits.write().insert(identity.to_string(), monthly_limit_usd);
    }
}

#[async_trait]
impl BudgetLedger for InMemoryBudgetLedger {
    async fn spend_since(&self, identity: &str, since: DateTime<Utc>) -> Result<f64, RepositoryError> {
        Ok(self
            .entries
            .read()
            .get(identity)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.recorded_at >= since)
                    .map(|e| e.amount_usd)
                    .sum()
            })
            .unwrap_or(0.0))
    }

    async fn monthly_limit(&self, identity: &str) -> Result<Option<f64>, RepositoryError> {
        Ok(self.limits.read().get(identity).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trace::TraceStatus;

    #[tokio::test]
    async fn test_trace_rows_query_by_goal_in_start_order() {
        let repo = InMemoryTraceRepository::new();
        let goal = GoalId::new();

        let mut first = DelegationTrace::open(goal, "conductor", "scout", "a", None);
        first.started_at = Utc::now() - chrono::Duration::seconds(5);
        let second = DelegationTrace::open(goal, "conductor", "analyst", "b", None);
        repo.insert(&second).await.unwrap();
        repo.insert(&first).await.unwrap();

        let rows = repo.find_by_goal(goal).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].delegatee, "scout");
        assert_eq!(rows[1].delegatee, "analyst");
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let repo = InMemoryTraceRepository::new();
        let trace = DelegationTrace::open(GoalId::new(), "conductor", "scout", "a", None);

        repo.insert(&trace).await.unwrap();
        let result = repo.insert(&trace).await;

        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_user_query_is_newest_first_and_bounded() {
        let repo = InMemoryTraceRepository::new();
        for i in 0..5 {
            let mut t = DelegationTrace::open(GoalId::new(), "conductor", "scout", "x", Some("user-1".into()));
            t.started_at = Utc::now() - chrono::Duration::seconds(10 - i);
            t.status = TraceStatus::Completed;
            repo.insert(&t).await.unwrap();
        }

        let rows = repo.find_by_user("user-1", 3).await.unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows[0].started_at >= rows[1].started_at);
    }

    #[tokio::test]
    async fn test_ledger_sums_only_entries_in_window() {
        let ledger = InMemoryBudgetLedger::new();
        ledger.record_spend("acct", 1.5);
        ledger.record_spend("acct", 2.0);

        let recent = ledger
            .spend_since("acct", Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        let future_window = ledger
            .spend_since("acct", Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(recent, 3.5);
        assert_eq!(future_window, 0.0);
    }
}
