// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Delegation Trace Aggregate
//!
//! One `DelegationTrace` row is the audit record of a single delegation step:
//! who delegated what to whom, what it cost, how long it ran, and whether the
//! output verified. Rows are opened at dispatch, closed exactly once on
//! completion or failure, and immutable after that. Rows with status
//! [`TraceStatus::ReDelegated`] link one logical step across delegatees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::goal::GoalId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(pub Uuid);

impl TraceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    InProgress,
    Completed,
    Failed,
    /// The step was handed to a different delegatee; a successor row carries
    /// the continuation.
    ReDelegated,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::InProgress => "in_progress",
            TraceStatus::Completed => "completed",
            TraceStatus::Failed => "failed",
            TraceStatus::ReDelegated => "re_delegated",
        }
    }
}

impl std::str::FromStr for TraceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(TraceStatus::InProgress),
            "completed" => Ok(TraceStatus::Completed),
            "failed" => Ok(TraceStatus::Failed),
            "re_delegated" => Ok(TraceStatus::ReDelegated),
            other => Err(format!("unknown trace status: {other}")),
        }
    }
}

/// Outcome of an independent quality check on a delegation's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub score: Option<f64>,
    pub notes: Option<String>,
    /// True when the output shape itself is invalid and no retry of the same
    /// task can fix it.
    #[serde(default)]
    pub structural: bool,
}

/// Audit record of one delegation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationTrace {
    pub trace_id: TraceId,
    pub goal_id: GoalId,
    pub delegator: String,
    pub delegatee: String,
    /// Billing identity behind the goal, when known. Serves user-scoped
    /// recent-activity queries.
    pub user_id: Option<String>,
    pub input_summary: String,
    pub output_summary: Option<String>,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub verification_result: Option<VerificationResult>,
    pub status: TraceStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DelegationTrace {
    pub fn open(
        goal_id: GoalId,
        delegator: impl Into<String>,
        delegatee: impl Into<String>,
        input_summary: impl Into<String>,
        user_id: Option<String>,
    ) -> Self {
        Self {
            trace_id: TraceId::new(),
            goal_id,
            delegator: delegator.into(),
            delegatee: delegatee.into(),
            user_id,
            input_summary: input_summary.into(),
            output_summary: None,
            cost_usd: 0.0,
            duration_ms: 0,
            verification_result: None,
            status: TraceStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status != TraceStatus::InProgress
    }
}

/// Pure aggregate over a list of traces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    /// Distinct delegatees across the set.
    pub agent_count: usize,
    /// Sum of per-trace cost, rounded to 4 decimals.
    pub total_cost_usd: f64,
    pub total_duration_ms: u64,
    pub verification_passes: usize,
    pub verification_failures: usize,
    /// Count of rows with status `re_delegated`.
    pub retries: usize,
}

impl TraceSummary {
    pub fn from_traces(traces: &[DelegationTrace]) -> Self {
        let mut delegatees: Vec<&str> = traces.iter().map(|t| t.delegatee.as_str()).collect();
        delegatees.sort_unstable();
        delegatees.dedup();

        let total_cost: f64 = traces.iter().map(|t| t.cost_usd).sum();
        let (mut passes, mut failures) = (0usize, 0usize);
        for trace in traces {
            match &trace.verification_result {
                Some(v) if v.passed => passes += 1,
                Some(_) => failures += 1,
                None => {}
            }
        }

        Self {
            agent_count: delegatees.len(),
            total_cost_usd: round4(total_cost),
            total_duration_ms: traces.iter().map(|t| t.duration_ms).sum(),
            verification_passes: passes,
            verification_failures: failures,
            retries: traces
                .iter()
                .filter(|t| t.status == TraceStatus::ReDelegated)
                .count(),
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// A delegation tree reconstructed from the flat trace rows of one goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceTree {
    pub goal_id: GoalId,
    pub roots: Vec<TraceNode>,
    pub summary: TraceSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceNode {
    pub trace: DelegationTrace,
    pub children: Vec<TraceNode>,
}

impl TraceTree {
    /// Rebuild the tree from rows ordered by `started_at`. A row is a child
    /// of the most recent earlier row whose delegatee matches its delegator;
    /// everything else is a root.
    pub fn build(goal_id: GoalId, mut traces: Vec<DelegationTrace>) -> Self {
        traces.sort_by_key(|t| t.started_at);
        let summary = TraceSummary::from_traces(&traces);

        // Parents always start earlier than their children, so each row's
        // parent is the latest preceding row whose delegatee matches.
        let parent_of: Vec<Option<usize>> = traces
            .iter()
            .enumerate()
            .map(|(i, trace)| {
                traces[..i]
                    .iter()
                    .rposition(|candidate| candidate.delegatee == trace.delegator)
            })
            .collect();

        let mut slots: Vec<Option<TraceNode>> = traces
            .into_iter()
            .map(|trace| {
                Some(TraceNode {
                    trace,
                    children: Vec::new(),
                })
            })
            .collect();

        // Attach bottom-up: children carry a higher index than their parent,
        // so walking indices in reverse moves each finished subtree exactly
        // once.
        for i in (0..slots.len()).rev() {
            if let Some(parent_idx) = parent_of[i] {
                if let Some(child) = slots[i].take() {
                    if let Some(parent) = slots[parent_idx].as_mut() {
                        parent.children.insert(0, child);
                    }
                }
            }
        }

        Self {
            goal_id,
            roots: slots.into_iter().flatten().collect(),
            summary,
        }
    }
}
