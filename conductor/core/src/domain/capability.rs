// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Capability Token Value Object
//!
//! A `CapabilityToken` is a short-lived, scoped authorization minted once per
//! delegation. It limits what a delegated agent may invoke at every tool-call
//! boundary.
//!
//! ## Evaluation Order
//!
//! [`CapabilityToken::can_perform`] checks the deny set before the allow set:
//! an action present in both is always refused. Validity is purely temporal:
//! a token expires `time_limit_seconds` after minting and is never refreshed.
//!
//! Tokens are owned exclusively by the call that minted them. They are never
//! mutated and never persisted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::goal::GoalId;

/// Scoped, time-limited authorization for one delegated agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityToken {
    pub token_id: Uuid,
    /// Agent-type name of the delegatee the token was minted for.
    pub delegatee: String,
    pub goal_id: GoalId,
    pub allowed_actions: HashSet<String>,
    /// Always overrides `allowed_actions` for the same action.
    pub denied_actions: HashSet<String>,
    pub time_limit_seconds: u64,
    pub created_at: DateTime<Utc>,
}

impl CapabilityToken {
    /// Mint a fresh token scoped to one delegation.
    pub fn mint(
        delegatee: impl Into<String>,
        goal_id: GoalId,
        allowed_actions: HashSet<String>,
        denied_actions: HashSet<String>,
        time_limit_seconds: u64,
    ) -> Self {
        Self {
            token_id: Uuid::new_v4(),
            delegatee: delegatee.into(),
            goal_id,
            allowed_actions,
            denied_actions,
            time_limit_seconds,
            created_at: Utc::now(),
        }
    }

    /// True iff the token has not yet expired.
    ///
    /// A token minted with `time_limit_seconds = 0` is invalid immediately.
    pub fn is_valid(&self) -> bool {
        let expires_at = self.created_at + Duration::seconds(self.time_limit_seconds as i64);
        Utc::now() < expires_at
    }

    /// Evaluate whether `action` is within this token's scope.
    ///
    /// Deny wins: an action in `denied_actions` is refused even when it also
    /// appears in `allowed_actions`. Anything not explicitly allowed is
    /// refused.
    pub fn can_perform(&self, action: &str) -> bool {
        if self.denied_actions.contains(action) {
            return false;
        }
        self.allowed_actions.contains(action)
    }
}

/// Why a tool call was refused at the enforcement boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationReason {
    /// The token's time limit has elapsed.
    TokenExpired,
    /// The action appears in the token's deny set.
    ActionDenied,
    /// The action was never granted to the token.
    ActionNotGranted,
}

impl std::fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationReason::TokenExpired => write!(f, "token expired"),
            ViolationReason::ActionDenied => write!(f, "action explicitly denied"),
            ViolationReason::ActionNotGranted => write!(f, "action not granted"),
        }
    }
}

/// Security boundary breach: the one error category that always propagates to
/// the caller. Aborts only the offending tool call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("capability violation: delegatee '{delegatee}' may not invoke tool '{tool_name}' (action '{action}'): {reason}")]
pub struct CapabilityViolation {
    pub tool_name: String,
    pub delegatee: String,
    pub action: String,
    pub reason: ViolationReason,
}
