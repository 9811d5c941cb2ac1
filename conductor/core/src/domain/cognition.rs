// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cognition State Machine Types
//!
//! State for one goal run of the perceive → reason → decide → act loop.
//! A [`LoopState`] is created per run, mutated only by the run driving it,
//! and terminal once complete, blocked, or out of iterations.
//!
//! [`Synthesis`] and [`Directive`] are the two payloads the planner model
//! produces. Both parse tolerantly: malformed model output degrades to a
//! defined fallback instead of aborting the loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::goal::GoalId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Perceive,
    Reason,
    Decide,
    Act,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Perceive => "perceive",
            Phase::Reason => "reason",
            Phase::Decide => "decide",
            Phase::Act => "act",
        }
    }
}

/// One phase-log entry. Summaries are truncated by the loop before logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseLog {
    pub phase: Phase,
    pub iteration: u32,
    pub input_summary: String,
    pub output_summary: String,
    pub tokens_used: u64,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Per-run loop state. Single-writer: only the run driving the goal mutates
/// it, so no internal locking is needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    pub goal_id: GoalId,
    pub iteration: u32,
    pub current_phase: Phase,
    pub phase_logs: Vec<PhaseLog>,
    pub last_decision: Option<Directive>,
    pub is_complete: bool,
    pub is_blocked: bool,
}

impl LoopState {
    pub fn new(goal_id: GoalId) -> Self {
        Self {
            goal_id,
            iteration: 0,
            current_phase: Phase::Perceive,
            phase_logs: Vec::new(),
            last_decision: None,
            is_complete: false,
            is_blocked: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.is_complete || self.is_blocked
    }
}

/// What the planner distilled out of the perceived observations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Synthesis {
    pub patterns: Vec<String>,
    pub opportunities: Vec<String>,
    pub threats: Vec<String>,
    pub recommended_focus: Option<String>,
}

impl Synthesis {
    /// Parse planner output. Malformed text yields an empty synthesis; the
    /// loop continues with no insight rather than aborting.
    pub fn parse_lenient(raw: &str) -> Self {
        parse_json_block(raw).unwrap_or_default()
    }
}

/// The planner's chosen next step: either a terminal outcome (`complete`,
/// `blocked`) or a delegation to a worker agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Directive {
    pub action: String,
    pub agent: Option<String>,
    pub parameters: Value,
    pub reasoning: String,
}

impl Default for Directive {
    fn default() -> Self {
        Self {
            action: "delegate".to_string(),
            agent: None,
            parameters: Value::Null,
            reasoning: String::new(),
        }
    }
}

impl Directive {
    pub const ACTION_COMPLETE: &'static str = "complete";
    pub const ACTION_BLOCKED: &'static str = "blocked";

    pub fn is_complete(&self) -> bool {
        self.action == Self::ACTION_COMPLETE
    }

    pub fn is_blocked(&self) -> bool {
        self.action == Self::ACTION_BLOCKED
    }

    /// Parse planner output. Malformed text yields an agent-less delegation
    /// directive; the act phase reports it as a dispatch failure and the
    /// coordinator takes over from there.
    pub fn parse_lenient(raw: &str) -> Self {
        parse_json_block(raw).unwrap_or_else(|| Directive {
            reasoning: "unparseable planner output".to_string(),
            ..Directive::default()
        })
    }
}

/// Extract and deserialize the first JSON object embedded in model output.
/// Models frequently wrap payloads in prose or code fences.
fn parse_json_block<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    if let Ok(parsed) = serde_json::from_str::<T>(raw.trim()) {
        return Some(parsed);
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<T>(&raw[start..=end]).ok()
}

/// Truncate a summary to `max_chars`, marking the cut.
pub fn truncate_summary(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{kept}…")
}
