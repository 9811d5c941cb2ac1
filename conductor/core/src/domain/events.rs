// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::adaptive::{DecisionKind, FailureTrigger};
use crate::domain::goal::GoalId;
use crate::domain::trace::TraceId;

/// Domain events emitted by a goal run.
///
/// Of these, only `EscalationRaised` is a user-facing "needs your input"
/// signal; the rest feed dashboards and the audit pipeline. Every other
/// recovery decision stays invisible except through eventual progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GoalEvent {
    DelegationDispatched {
        goal_id: GoalId,
        delegatee: String,
        trace_id: Option<TraceId>,
        at: DateTime<Utc>,
    },
    RecoveryDecided {
        goal_id: GoalId,
        delegatee: String,
        decision: DecisionKind,
        trigger: Option<FailureTrigger>,
        at: DateTime<Utc>,
    },
    GoalCompleted {
        goal_id: GoalId,
        iterations: u32,
        at: DateTime<Utc>,
    },
    GoalBlocked {
        goal_id: GoalId,
        reason: String,
        at: DateTime<Utc>,
    },
    /// Autonomous recovery was unsafe or impossible; a human must step in.
    EscalationRaised {
        goal_id: GoalId,
        delegatee: String,
        reason: String,
        trigger: Option<FailureTrigger>,
        at: DateTime<Utc>,
    },
    PolicyViolationBlocked {
        tool_name: String,
        delegatee: String,
        action: String,
        at: DateTime<Utc>,
    },
}
