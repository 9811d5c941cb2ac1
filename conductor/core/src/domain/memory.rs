// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::goal::GoalId;

/// One record surfaced by a memory tier during the perceive phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Name of the tier that produced the record.
    pub tier: String,
    pub content: String,
    pub recorded_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryTierError {
    #[error("memory tier unavailable: {0}")]
    Unavailable(String),

    #[error("memory query failed: {0}")]
    Query(String),
}

/// A bounded-read view over one memory tier (working set, episodic log,
/// semantic store). Concrete tiers live outside this crate.
///
/// Tier failures are isolated: the perceive phase drops the tier's
/// contribution and carries on with the rest.
#[async_trait]
pub trait MemoryTier: Send + Sync {
    fn name(&self) -> &str;

    /// Read at most `limit` observations relevant to `goal_id`.
    async fn snapshot(&self, goal_id: GoalId, limit: usize) -> Result<Vec<Observation>, MemoryTierError>;
}
