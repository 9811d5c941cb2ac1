// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GoalId(pub Uuid);

impl GoalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for GoalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GoalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user objective the control plane pursues via bounded agent delegation.
///
/// The conductor never interprets the objective text itself; it is handed to
/// the planner model verbatim. `requested_by` is the billing/budget identity
/// consulted by the cost governor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: GoalId,
    pub objective: String,
    pub requested_by: String,
    pub created_at: DateTime<Utc>,
}

impl Goal {
    pub fn new(objective: impl Into<String>, requested_by: impl Into<String>) -> Self {
        Self {
            id: GoalId::new(),
            objective: objective.into(),
            requested_by: requested_by.into(),
            created_at: Utc::now(),
        }
    }
}
