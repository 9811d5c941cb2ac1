// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the two stores shared across concurrent goal
//! runs, following the repository pattern: interface defined in the domain
//! layer, implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `TraceRepository` | `DelegationTrace` | `InMemoryTraceRepository`, `PostgresTraceRepository` |
//! | `BudgetLedger` | spend ledger (read-only) | `InMemoryBudgetLedger`, `PostgresBudgetLedger` |
//!
//! Trace rows are append-only and keyed by trace id; the ledger is read-only
//! from this crate's perspective (accrual is the accounting collaborator's
//! job). In-memory implementations serve development and testing; PostgreSQL
//! implementations serve production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::goal::GoalId;
use crate::domain::trace::{DelegationTrace, TraceId};

/// Repository interface for the delegation audit trail.
#[async_trait]
pub trait TraceRepository: Send + Sync {
    /// Append a newly opened trace row.
    async fn insert(&self, trace: &DelegationTrace) -> Result<(), RepositoryError>;

    /// Persist the closing update of a row. Rows are never updated again
    /// once closed.
    async fn update(&self, trace: &DelegationTrace) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: TraceId) -> Result<Option<DelegationTrace>, RepositoryError>;

    /// All rows of one goal, ordered by `started_at`.
    async fn find_by_goal(&self, goal_id: GoalId) -> Result<Vec<DelegationTrace>, RepositoryError>;

    /// Most recent rows for one billing identity, newest first.
    async fn find_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<DelegationTrace>, RepositoryError>;
}

/// Read contract over the external spend ledger.
#[async_trait]
pub trait BudgetLedger: Send + Sync {
    /// Cumulative spend for `identity` since `since`.
    async fn spend_since(&self, identity: &str, since: DateTime<Utc>) -> Result<f64, RepositoryError>;

    /// Per-identity monthly limit, when one is configured.
    async fn monthly_limit(&self, identity: &str) -> Result<Option<f64>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}
