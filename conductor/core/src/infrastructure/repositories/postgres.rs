// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Repositories
//!
//! Production persistence for the delegation audit trail and the spend
//! ledger read contract. Schema (migrations live with the deployment):
//!
//! ```sql
//! CREATE TABLE delegation_traces (
//!     trace_id            UUID PRIMARY KEY,
//!     goal_id             UUID NOT NULL,
//!     delegator           TEXT NOT NULL,
//!     delegatee           TEXT NOT NULL,
//!     user_id             TEXT,
//!     input_summary       TEXT NOT NULL,
//!     output_summary      TEXT,
//!     cost_usd            DOUBLE PRECISION NOT NULL DEFAULT 0,
//!     duration_ms         BIGINT NOT NULL DEFAULT 0,
//!     verification_result JSONB,
//!     status              TEXT NOT NULL,
//!     started_at          TIMESTAMPTZ NOT NULL,
//!     completed_at        TIMESTAMPTZ
//! );
//!
//! CREATE TABLE spend_ledger (
//!     identity     TEXT NOT NULL,
//!     amount_usd   DOUBLE PRECISION NOT NULL,
//!     recorded_at  TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE budget_limits (
//!     identity          TEXT PRIMARY KEY,
//!     monthly_limit_usd DOUBLE PRECISION NOT NULL
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::domain::goal::GoalId;
use crate::domain::repository::{BudgetLedger, RepositoryError, TraceRepository};
use crate::domain::trace::{DelegationTrace, TraceId, TraceStatus, VerificationResult};

pub struct PostgresTraceRepository {
    pool: PgPool,
}

impl PostgresTraceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_trace_row(row: &PgRow) -> Result<DelegationTrace, RepositoryError> {
    let status_raw: String = row.try_get("status").map_err(RepositoryError::from)?;
    let status: TraceStatus = status_raw.parse().map_err(RepositoryError::Serialization)?;

    let verification_raw: Option<serde_json::Value> = row
        .try_get("verification_result")
        .map_err(RepositoryError::from)?;
    let verification_result: Option<VerificationResult> = match verification_raw {
        Some(value) => Some(
            serde_json::from_value(value).map_err(|e| RepositoryError::Serialization(e.to_string()))?,
        ),
        None => None,
    };

    Ok(DelegationTrace {
        trace_id: TraceId(row.try_get("trace_id").map_err(RepositoryError::from)?),
        goal_id: GoalId(row.try_get("goal_id").map_err(RepositoryError::from)?),
        delegator: row.try_get("delegator").map_err(RepositoryError::from)?,
        delegatee: row.try_get("delegatee").map_err(RepositoryError::from)?,
        user_id: row.try_get("user_id").map_err(RepositoryError::from)?,
        input_summary: row.try_get("input_summary").map_err(RepositoryError::from)?,
        output_summary: row.try_get("output_summary").map_err(RepositoryError::from)?,
        cost_usd: row.try_get("cost_usd").map_err(RepositoryError::from)?,
        duration_ms: row.try_get::<i64, _>("duration_ms").map_err(RepositoryError::from)? as u64,
        verification_result,
        status,
        started_at: row.try_get("started_at").map_err(RepositoryError::from)?,
        completed_at: row.try_get("completed_at").map_err(RepositoryError::from)?,
    })
}

fn verification_json(trace: &DelegationTrace) -> Result<Option<serde_json::Value>, RepositoryError> {
    trace
        .verification_result
        .as_ref()
        .map(|v| serde_json::to_value(v).map_err(|e| RepositoryError::Serialization(e.to_string())))
        .transpose()
}

#[async_trait]
impl TraceRepository for PostgresTraceRepository {
    async fn insert(&self, trace: &DelegationTrace) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO delegation_traces
                (trace_id, goal_id, delegator, delegatee, user_id, input_summary,
                 output_summary, cost_usd, duration_ms, verification_result, status,
                 started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(trace.trace_id.0)
        .bind(trace.goal_id.0)
        .bind(&trace.delegator)
        .bind(&trace.delegatee)
        .bind(&trace.user_id)
        .bind(&trace.input_summary)
        .bind(&trace.output_summary)
        .bind(trace.cost_usd)
        .bind(trace.duration_ms as i64)
        .bind(verification_json(trace)?)
        .bind(trace.status.as_str())
        .bind(trace.started_at)
        .bind(trace.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, trace: &DelegationTrace) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE delegation_traces
            SET output_summary = $2,
                cost_usd = $3,
                duration_ms = $4,
                verification_result = $5,
                status = $6,
                completed_at = $7
            WHERE trace_id = $1
            "#,
        )
        .bind(trace.trace_id.0)
        .bind(&trace.output_summary)
        .bind(trace.cost_usd)
        .bind(trace.duration_ms as i64)
        .bind(verification_json(trace)?)
        .bind(trace.status.as_str())
        .bind(trace.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(trace.trace_id.to_string()));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: TraceId) -> Result<Option<DelegationTrace>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM delegation_traces WHERE trace_id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_trace_row).transpose()
    }

    async fn find_by_goal(&self, goal_id: GoalId) -> Result<Vec<DelegationTrace>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM delegation_traces WHERE goal_id = $1 ORDER BY started_at ASC")
            .bind(goal_id.0)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_trace_row).collect()
    }

    async fn find_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<DelegationTrace>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM delegation_traces WHERE user_id = $1 ORDER BY started_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_trace_row).collect()
    }
}

/// Read-only view over the accounting collaborator's ledger tables.
pub struct PostgresBudgetLedger {
    pool: PgPool,
}

impl PostgresBudgetLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BudgetLedger for PostgresBudgetLedger {
    async fn spend_since(&self, identity: &str, since: DateTime<Utc>) -> Result<f64, RepositoryError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount_usd), 0) AS total FROM spend_ledger WHERE identity = $1 AND recorded_at >= $2",
        )
        .bind(identity)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        row.try_get("total").map_err(RepositoryError::from)
    }

    async fn monthly_limit(&self, identity: &str) -> Result<Option<f64>, RepositoryError> {
        let row = sqlx::query("SELECT monthly_limit_usd FROM budget_limits WHERE identity = $1")
            .bind(identity)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("monthly_limit_usd").map_err(RepositoryError::from))
            .transpose()
    }
}
