// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Adaptive Recovery Domain Model
//!
//! Failure classification and the recovery decision vocabulary used by the
//! adaptive coordinator. Classification is deterministic and rule-based; no
//! reasoning-model calls are involved, so two evaluations of the same inputs
//! always agree.
//!
//! ## Failure Precedence
//!
//! [`analyze_failure`] applies triggers in a fixed order, first match wins:
//! 1. confidence below the floor → `LowConfidence`
//! 2. all result-bearing fields empty → `NoResults`
//! 3. underlying data older than the staleness window → `StaleData`
//! 4. execution time beyond the expected-duration multiplier → `Timeout`
//! 5. explicit failed verification → `VerificationFailed`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::agent::{AgentKind, ResolvedAgent};
use crate::domain::config::CoordinatorThresholds;
use crate::domain::trace::VerificationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureTrigger {
    LowConfidence,
    NoResults,
    StaleData,
    Timeout,
    VerificationFailed,
}

/// Transient classification of one failed evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureAnalysis {
    pub trigger: FailureTrigger,
    /// 0–1, higher is worse.
    pub severity: f64,
    pub details: String,
    pub recoverable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Proceed,
    RetrySame,
    ReDelegate,
    Augment,
    Escalate,
}

/// Recovery decision, consumed immediately by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveDecision {
    pub decision: DecisionKind,
    pub failure_analysis: Option<FailureAnalysis>,
    pub target_agent: Option<AgentKind>,
    pub retry_params: Value,
    pub partial_results: Option<Value>,
    pub reasoning: String,
    pub retry_count: u32,
}

impl AdaptiveDecision {
    pub fn proceed() -> Self {
        Self {
            decision: DecisionKind::Proceed,
            failure_analysis: None,
            target_agent: None,
            retry_params: Value::Null,
            partial_results: None,
            reasoning: "output passed quality checks".to_string(),
            retry_count: 0,
        }
    }
}

/// Everything the coordinator inspects about one delegated execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputEvaluation {
    pub agent: ResolvedAgent,
    /// Self-reported confidence, when the agent supplies one.
    pub confidence: Option<f64>,
    /// Result-bearing payload returned by the agent.
    pub results: Value,
    /// Freshness of the underlying data the agent worked from.
    pub data_timestamp: Option<DateTime<Utc>>,
    pub execution_time_ms: u64,
    pub expected_duration_ms: u64,
    pub verification_result: Option<VerificationResult>,
    pub partial_results: Option<Value>,
    pub error: Option<String>,
}

/// Caller-supplied task context the decision policy weighs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskCharacteristics {
    /// 0–1; at or above the escalation ceiling, autonomous recovery is
    /// considered unsafe.
    pub risk_score: f64,
}

/// Static map of valid alternate agent types per failed agent.
///
/// Operator, verifier, and executor work is either side-effecting or
/// judgement-bearing and has no interchangeable substitute.
pub fn re_delegation_alternates(kind: AgentKind) -> &'static [AgentKind] {
    match kind {
        AgentKind::Scout => &[AgentKind::Analyst, AgentKind::Hunter],
        AgentKind::Hunter => &[AgentKind::Scout],
        AgentKind::Analyst => &[AgentKind::Strategist],
        AgentKind::Scribe => &[AgentKind::Strategist],
        AgentKind::Strategist => &[AgentKind::Analyst],
        AgentKind::Operator | AgentKind::Verifier | AgentKind::Executor => &[],
    }
}

/// Next untried alternate for `failed`, in table order.
pub fn re_delegation_target(failed: AgentKind, already_tried: &[AgentKind]) -> Option<AgentKind> {
    re_delegation_alternates(failed)
        .iter()
        .copied()
        .find(|candidate| !already_tried.contains(candidate))
}

/// Classify a completed execution. `None` means the output is healthy.
pub fn analyze_failure(
    evaluation: &OutputEvaluation,
    thresholds: &CoordinatorThresholds,
) -> Option<FailureAnalysis> {
    if let Some(confidence) = evaluation.confidence {
        if confidence < thresholds.low_confidence_floor {
            return Some(FailureAnalysis {
                trigger: FailureTrigger::LowConfidence,
                severity: 0.6,
                details: format!(
                    "agent reported confidence {confidence:.2}, floor is {:.2}",
                    thresholds.low_confidence_floor
                ),
                recoverable: true,
            });
        }
    }

    if no_result_content(&evaluation.results) {
        let details = match &evaluation.error {
            Some(err) => format!("no result-bearing output ({err})"),
            None => "all result-bearing fields are empty".to_string(),
        };
        return Some(FailureAnalysis {
            trigger: FailureTrigger::NoResults,
            severity: 0.8,
            details,
            recoverable: true,
        });
    }

    if let Some(data_at) = evaluation.data_timestamp {
        let age = Utc::now().signed_duration_since(data_at);
        if age > chrono::Duration::from_std(thresholds.stale_after).unwrap_or_else(|_| chrono::Duration::hours(24)) {
            return Some(FailureAnalysis {
                trigger: FailureTrigger::StaleData,
                severity: 0.4,
                details: format!("underlying data is {}h old", age.num_hours()),
                recoverable: true,
            });
        }
    }

    if evaluation.expected_duration_ms > 0 {
        let ceiling = evaluation.expected_duration_ms as f64 * thresholds.timeout_multiplier;
        if evaluation.execution_time_ms as f64 > ceiling {
            return Some(FailureAnalysis {
                trigger: FailureTrigger::Timeout,
                severity: 0.5,
                details: format!(
                    "execution took {}ms against an expected {}ms",
                    evaluation.execution_time_ms, evaluation.expected_duration_ms
                ),
                recoverable: true,
            });
        }
    }

    if let Some(verification) = &evaluation.verification_result {
        if !verification.passed {
            return Some(FailureAnalysis {
                trigger: FailureTrigger::VerificationFailed,
                severity: if verification.structural { 0.95 } else { 0.7 },
                details: verification
                    .notes
                    .clone()
                    .unwrap_or_else(|| "verification failed".to_string()),
                // Structurally broken output cannot be fixed by re-running
                // the same task.
                recoverable: !verification.structural,
            });
        }
    }

    None
}

/// True when the payload carries nothing a downstream step could use.
///
/// Objects are judged by their result-bearing fields when any are present;
/// otherwise by all their values.
fn no_result_content(data: &Value) -> bool {
    const RESULT_FIELDS: [&str; 6] = ["results", "items", "findings", "records", "documents", "output"];

    match data {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.iter().all(no_result_content),
        Value::Object(map) => {
            let bearing: Vec<&Value> = RESULT_FIELDS.iter().filter_map(|k| map.get(*k)).collect();
            if bearing.is_empty() {
                map.values().all(no_result_content)
            } else {
                bearing.into_iter().all(no_result_content)
            }
        }
        Value::Bool(_) | Value::Number(_) => false,
    }
}
