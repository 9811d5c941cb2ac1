// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Adaptive Coordinator
//!
//! Failure analysis and the retry/re-delegate/escalate policy for delegated
//! executions. Purely rule-based over its inputs plus current budget state;
//! no reasoning-model calls, so evaluation is deterministic and fast.
//!
//! ## Decision Order
//!
//! 1. Exhausted budget forces `Escalate`, regardless of anything else.
//! 2. Healthy output → `Proceed`.
//! 3. No alternates, risk at the ceiling, or an unrecoverable failure →
//!    `Escalate`.
//! 4. First failure with an untried alternate → `ReDelegate` (table order).
//! 5. Retry budget left and a transient trigger → `RetrySame` with adjusted
//!    parameters.
//! 6. Partial results of moderate severity → `Augment`.
//! 7. Otherwise `Escalate`.
//!
//! The coordinator is stateless per call: attempt history is re-derived from
//! the trace tree, which is already the durable record of the goal.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::cost_governor::CostGovernor;
use crate::application::trace_service::DelegationTraceService;
use crate::domain::adaptive::{
    analyze_failure, re_delegation_target, AdaptiveDecision, DecisionKind, FailureAnalysis,
    FailureTrigger, OutputEvaluation, TaskCharacteristics,
};
use crate::domain::agent::AgentKind;
use crate::domain::cognition::truncate_summary;
use crate::domain::config::CoordinatorThresholds;
use crate::domain::goal::Goal;
use crate::domain::trace::TraceStatus;

pub struct AdaptiveCoordinator {
    governor: Arc<CostGovernor>,
    traces: Arc<DelegationTraceService>,
    thresholds: CoordinatorThresholds,
}

impl AdaptiveCoordinator {
    pub fn new(
        governor: Arc<CostGovernor>,
        traces: Arc<DelegationTraceService>,
        thresholds: CoordinatorThresholds,
    ) -> Self {
        Self {
            governor,
            traces,
            thresholds,
        }
    }

    /// Evaluate one delegated execution and decide how the goal run proceeds.
    pub async fn evaluate_output(
        &self,
        goal: &Goal,
        evaluation: &OutputEvaluation,
        characteristics: Option<&TaskCharacteristics>,
    ) -> AdaptiveDecision {
        let (already_tried, retry_count) = self.attempt_history(goal).await;
        let analysis = analyze_failure(evaluation, &self.thresholds);

        // Budget first: an exhausted budget is a hard stop no matter what
        // the failure looks like.
        match self.governor.check_budget(&goal.requested_by).await {
            Ok(budget) if !budget.allowed => {
                metrics::counter!("conductor_decisions_total", "decision" => "escalate").increment(1);
                return self.escalate(
                    analysis,
                    evaluation,
                    retry_count,
                    format!(
                        "spend budget exhausted for '{}' ({:.2}/{:.2} USD)",
                        budget.identity, budget.monthly_spend_usd, budget.monthly_limit_usd
                    ),
                );
            }
            Ok(_) => {}
            Err(e) => {
                // Ledger reads degrade open: a broken accounting backend must
                // not stall every goal in flight.
                warn!(goal_id = %goal.id, "budget check failed, treating as allowed: {e}");
            }
        }

        let Some(analysis) = analysis else {
            metrics::counter!("conductor_decisions_total", "decision" => "proceed").increment(1);
            return AdaptiveDecision::proceed();
        };

        info!(
            goal_id = %goal.id,
            agent = evaluation.agent.name(),
            trigger = ?analysis.trigger,
            severity = analysis.severity,
            "delegated output failed quality checks"
        );

        let alternates: &[AgentKind] = evaluation
            .agent
            .builtin()
            .map(crate::domain::adaptive::re_delegation_alternates)
            .unwrap_or(&[]);
        let risk = characteristics.map(|c| c.risk_score).unwrap_or(0.0);

        if alternates.is_empty() || risk >= self.thresholds.escalation_risk_ceiling || !analysis.recoverable {
            metrics::counter!("conductor_decisions_total", "decision" => "escalate").increment(1);
            let reason = if !analysis.recoverable {
                format!("unrecoverable failure: {}", analysis.details)
            } else if alternates.is_empty() {
                format!(
                    "no alternate agent types for '{}' and autonomous retry is not safe",
                    evaluation.agent.name()
                )
            } else {
                format!("task risk {risk:.2} at or above the escalation ceiling")
            };
            return self.escalate(Some(analysis), evaluation, retry_count, reason);
        }

        if retry_count == 0 {
            if let Some(failed) = evaluation.agent.builtin() {
                if let Some(target) = re_delegation_target(failed, &already_tried) {
                    metrics::counter!("conductor_decisions_total", "decision" => "re_delegate").increment(1);
                    return AdaptiveDecision {
                        decision: DecisionKind::ReDelegate,
                        target_agent: Some(target),
                        retry_params: Value::Null,
                        partial_results: evaluation.partial_results.clone(),
                        reasoning: format!(
                            "first failure of '{failed}': handing the step to untried alternate '{target}'"
                        ),
                        failure_analysis: Some(analysis),
                        retry_count,
                    };
                }
            }
        }

        if retry_count < self.thresholds.max_retries
            && matches!(analysis.trigger, FailureTrigger::Timeout | FailureTrigger::StaleData)
        {
            metrics::counter!("conductor_decisions_total", "decision" => "retry_same").increment(1);
            let retry_params = json!({
                "expected_duration_ms": evaluation.expected_duration_ms.saturating_mul(2),
                "refresh_sources": analysis.trigger == FailureTrigger::StaleData,
            });
            return AdaptiveDecision {
                decision: DecisionKind::RetrySame,
                target_agent: None,
                retry_params,
                partial_results: evaluation.partial_results.clone(),
                reasoning: "transient failure: retrying the same agent with a wider time budget".to_string(),
                failure_analysis: Some(analysis),
                retry_count: retry_count + 1,
            };
        }

        if evaluation.partial_results.is_some() && analysis.severity <= self.thresholds.augment_severity_ceiling {
            metrics::counter!("conductor_decisions_total", "decision" => "augment").increment(1);
            let supplement = evaluation
                .agent
                .builtin()
                .and_then(|failed| re_delegation_target(failed, &already_tried))
                .unwrap_or(AgentKind::Analyst);
            return AdaptiveDecision {
                decision: DecisionKind::Augment,
                target_agent: Some(supplement),
                retry_params: Value::Null,
                partial_results: evaluation.partial_results.clone(),
                reasoning: format!(
                    "partial results are usable: dispatching '{supplement}' to supplement rather than discard"
                ),
                failure_analysis: Some(analysis),
                retry_count,
            };
        }

        metrics::counter!("conductor_decisions_total", "decision" => "escalate").increment(1);
        let reason = format!("recovery options exhausted: {}", analysis.details);
        self.escalate(Some(analysis), evaluation, retry_count, reason)
    }

    /// Persist whatever partial output exists before abandoning an execution
    /// line. Fail-open: losing this audit record is preferable to crashing an
    /// already-degraded goal.
    pub async fn checkpoint_partial_results(
        &self,
        goal: &Goal,
        delegatee: &str,
        partial_results: &Value,
        reason: &str,
    ) {
        let summary = truncate_summary(&partial_results.to_string(), 240);
        let opened = self
            .traces
            .start_trace(
                goal.id,
                "coordinator",
                delegatee,
                &format!("partial-results checkpoint: {reason}"),
                Some(&goal.requested_by),
            )
            .await;
        match opened {
            Ok(trace_id) => {
                if let Err(e) = self
                    .traces
                    .complete_trace(trace_id, &summary, 0.0, 0, None, None)
                    .await
                {
                    warn!(goal_id = %goal.id, "failed to close partial-results checkpoint: {e}");
                }
            }
            Err(e) => {
                warn!(goal_id = %goal.id, "failed to checkpoint partial results: {e}");
            }
        }
    }

    fn escalate(
        &self,
        analysis: Option<FailureAnalysis>,
        evaluation: &OutputEvaluation,
        retry_count: u32,
        reason: String,
    ) -> AdaptiveDecision {
        AdaptiveDecision {
            decision: DecisionKind::Escalate,
            target_agent: None,
            retry_params: Value::Null,
            partial_results: evaluation.partial_results.clone(),
            reasoning: reason,
            failure_analysis: analysis,
            retry_count,
        }
    }

    /// Re-derive which agents already attempted this goal's current line of
    /// work, and how many attempts have failed, from the durable trace rows.
    async fn attempt_history(&self, goal: &Goal) -> (Vec<AgentKind>, u32) {
        let rows = match self.traces.goal_traces(goal.id).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(goal_id = %goal.id, "trace history unavailable, assuming fresh attempt: {e}");
                return (Vec::new(), 0);
            }
        };

        let mut tried = Vec::new();
        let mut failed_attempts = 0u32;
        for row in rows
            .iter()
            .filter(|r| matches!(r.status, TraceStatus::Failed | TraceStatus::ReDelegated))
        {
            failed_attempts += 1;
            if let Ok(kind) = row.delegatee.parse::<AgentKind>() {
                if !tried.contains(&kind) {
                    tried.push(kind);
                }
            }
        }
        (tried, failed_attempts)
    }
}
