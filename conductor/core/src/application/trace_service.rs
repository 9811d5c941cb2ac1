// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Delegation Trace Service
//!
//! Application service over the delegation audit trail. Opens a trace at
//! dispatch, closes it exactly once on completion or failure, and serves the
//! read queries the surrounding product consumes (trace trees, per-user
//! recent activity, goal summaries).
//!
//! Closed rows are immutable: a second close attempt is a `Conflict`.

use std::sync::Arc;
use tracing::debug;

use crate::domain::goal::GoalId;
use crate::domain::repository::{RepositoryError, TraceRepository};
use crate::domain::trace::{
    DelegationTrace, TraceId, TraceStatus, TraceSummary, TraceTree, VerificationResult,
};

pub struct DelegationTraceService {
    repo: Arc<dyn TraceRepository>,
}

impl DelegationTraceService {
    pub fn new(repo: Arc<dyn TraceRepository>) -> Self {
        Self { repo }
    }

    /// Open a trace row for one delegation step.
    pub async fn start_trace(
        &self,
        goal_id: GoalId,
        delegator: &str,
        delegatee: &str,
        input_summary: &str,
        user_id: Option<&str>,
    ) -> Result<TraceId, RepositoryError> {
        let trace = DelegationTrace::open(
            goal_id,
            delegator,
            delegatee,
            input_summary,
            user_id.map(|u| u.to_string()),
        );
        let trace_id = trace.trace_id;
        self.repo.insert(&trace).await?;
        metrics::counter!("conductor_traces_opened_total").increment(1);
        debug!(%trace_id, delegator, delegatee, "delegation trace opened");
        Ok(trace_id)
    }

    /// Close a trace row. `status` defaults to `Completed`; pass
    /// `ReDelegated` when a successor row continues the logical step.
    pub async fn complete_trace(
        &self,
        trace_id: TraceId,
        output_summary: &str,
        cost_usd: f64,
        duration_ms: u64,
        verification_result: Option<VerificationResult>,
        status: Option<TraceStatus>,
    ) -> Result<(), RepositoryError> {
        let mut trace = self.load_open(trace_id).await?;
        trace.output_summary = Some(output_summary.to_string());
        trace.cost_usd = cost_usd;
        trace.duration_ms = duration_ms;
        trace.verification_result = verification_result;
        trace.status = status.unwrap_or(TraceStatus::Completed);
        trace.completed_at = Some(chrono::Utc::now());
        self.repo.update(&trace).await
    }

    /// Close a trace row as failed, recording the error.
    pub async fn fail_trace(&self, trace_id: TraceId, error_message: &str) -> Result<(), RepositoryError> {
        let mut trace = self.load_open(trace_id).await?;
        trace.output_summary = Some(error_message.to_string());
        trace.status = TraceStatus::Failed;
        trace.completed_at = Some(chrono::Utc::now());
        metrics::counter!("conductor_traces_failed_total").increment(1);
        self.repo.update(&trace).await
    }

    /// All rows of one goal, ordered by start time.
    pub async fn goal_traces(&self, goal_id: GoalId) -> Result<Vec<DelegationTrace>, RepositoryError> {
        self.repo.find_by_goal(goal_id).await
    }

    /// Reconstruct the delegation tree of one goal.
    pub async fn get_trace_tree(&self, goal_id: GoalId) -> Result<TraceTree, RepositoryError> {
        let traces = self.repo.find_by_goal(goal_id).await?;
        Ok(TraceTree::build(goal_id, traces))
    }

    /// Most recent delegation rows for one billing identity.
    pub async fn get_user_traces(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<DelegationTrace>, RepositoryError> {
        self.repo.find_by_user(user_id, limit).await
    }

    pub async fn summarize_goal(&self, goal_id: GoalId) -> Result<TraceSummary, RepositoryError> {
        let traces = self.repo.find_by_goal(goal_id).await?;
        Ok(TraceSummary::from_traces(&traces))
    }

    async fn load_open(&self, trace_id: TraceId) -> Result<DelegationTrace, RepositoryError> {
        let trace = self
            .repo
            .find_by_id(trace_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(trace_id.to_string()))?;
        if trace.is_closed() {
            return Err(RepositoryError::Conflict(format!(
                "trace {trace_id} is already closed ({})",
                trace.status.as_str()
            )));
        }
        Ok(trace)
    }
}
