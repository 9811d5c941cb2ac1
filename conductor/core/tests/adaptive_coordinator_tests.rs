// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Decision-policy tests for the adaptive coordinator.
//!
//! The coordinator is deterministic over its inputs plus budget state, so
//! each test seeds the in-memory ledger and trace store and asserts one
//! branch of the policy.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use conductor_core::application::coordinator::AdaptiveCoordinator;
use conductor_core::application::cost_governor::CostGovernor;
use conductor_core::application::trace_service::DelegationTraceService;
use conductor_core::domain::adaptive::{
    re_delegation_target, DecisionKind, FailureTrigger, OutputEvaluation, TaskCharacteristics,
};
use conductor_core::domain::agent::{AgentKind, ResolvedAgent};
use conductor_core::domain::config::{BudgetDefaults, CoordinatorThresholds};
use conductor_core::domain::goal::Goal;
use conductor_core::domain::trace::VerificationResult;
use conductor_core::infrastructure::repositories::{InMemoryBudgetLedger, InMemoryTraceRepository};

struct Harness {
    coordinator: AdaptiveCoordinator,
    traces: Arc<DelegationTraceService>,
    ledger: Arc<InMemoryBudgetLedger>,
    goal: Goal,
}

fn harness() -> Harness {
    let repo = Arc::new(InMemoryTraceRepository::new());
    let traces = Arc::new(DelegationTraceService::new(repo));
    let ledger = Arc::new(InMemoryBudgetLedger::new());
    let governor = Arc::new(CostGovernor::new(ledger.clone(), BudgetDefaults::default()));
    let coordinator = AdaptiveCoordinator::new(governor, traces.clone(), CoordinatorThresholds::default());
    Harness {
        coordinator,
        traces,
        ledger,
        goal: Goal::new("expand into the nordic market", "acct-42"),
    }
}

fn healthy(agent: AgentKind) -> OutputEvaluation {
    OutputEvaluation {
        agent: ResolvedAgent::Builtin(agent),
        confidence: Some(0.9),
        results: json!({"results": [{"company": "Fjord AS"}]}),
        data_timestamp: Some(Utc::now()),
        execution_time_ms: 900,
        expected_duration_ms: 1000,
        verification_result: None,
        partial_results: None,
        error: None,
    }
}

/// Seed one already-failed attempt by `agent` so the next failure is not the
/// first for this goal.
async fn seed_failed_attempt(h: &Harness, agent: AgentKind) {
    let trace_id = h
        .traces
        .start_trace(h.goal.id, "conductor", agent.as_str(), "earlier attempt", None)
        .await
        .unwrap();
    h.traces.fail_trace(trace_id, "earlier failure").await.unwrap();
}

#[tokio::test]
async fn test_healthy_output_proceeds() {
    let h = harness();

    let decision = h
        .coordinator
        .evaluate_output(&h.goal, &healthy(AgentKind::Scout), None)
        .await;

    assert_eq!(decision.decision, DecisionKind::Proceed);
    assert!(decision.failure_analysis.is_none());
}

#[tokio::test]
async fn test_low_confidence_classifies_as_low_confidence() {
    let h = harness();
    let mut evaluation = healthy(AgentKind::Scout);
    evaluation.confidence = Some(0.3);

    let decision = h.coordinator.evaluate_output(&h.goal, &evaluation, None).await;

    let analysis = decision.failure_analysis.expect("failure expected");
    assert_eq!(analysis.trigger, FailureTrigger::LowConfidence);
}

#[tokio::test]
async fn test_exhausted_budget_forces_escalate_even_for_healthy_output() {
    let h = harness();
    h.ledger.set_limit("acct-42", 10.0);
    h.ledger.record_spend("acct-42", 15.0);

    let decision = h
        .coordinator
        .evaluate_output(&h.goal, &healthy(AgentKind::Scout), None)
        .await;

    assert_eq!(decision.decision, DecisionKind::Escalate);
    assert!(decision.reasoning.contains("budget"));
}

#[tokio::test]
async fn test_exhausted_budget_forces_escalate_regardless_of_trigger() {
    let h = harness();
    h.ledger.set_limit("acct-42", 10.0);
    h.ledger.record_spend("acct-42", 15.0);

    for evaluation in [
        {
            let mut e = healthy(AgentKind::Scout);
            e.confidence = Some(0.1);
            e
        },
        {
            let mut e = healthy(AgentKind::Scout);
            e.execution_time_ms = 10_000;
            e
        },
    ] {
        let decision = h.coordinator.evaluate_output(&h.goal, &evaluation, None).await;
        assert_eq!(decision.decision, DecisionKind::Escalate);
    }
}

#[tokio::test]
async fn test_five_times_expected_duration_classifies_as_timeout() {
    let h = harness();
    let mut evaluation = healthy(AgentKind::Scout);
    evaluation.execution_time_ms = 5000;
    evaluation.expected_duration_ms = 1000;

    let decision = h.coordinator.evaluate_output(&h.goal, &evaluation, None).await;

    let analysis = decision.failure_analysis.expect("failure expected");
    assert_eq!(analysis.trigger, FailureTrigger::Timeout);
}

#[tokio::test]
async fn test_first_failure_re_delegates_to_table_alternate() {
    let h = harness();
    let mut evaluation = healthy(AgentKind::Scout);
    evaluation.results = json!({"results": []});

    let decision = h.coordinator.evaluate_output(&h.goal, &evaluation, None).await;

    assert_eq!(decision.decision, DecisionKind::ReDelegate);
    assert_eq!(decision.target_agent, Some(AgentKind::Analyst));
}

#[tokio::test]
async fn test_transient_failure_after_first_attempt_retries_same_agent() {
    let h = harness();
    seed_failed_attempt(&h, AgentKind::Scout).await;
    // The sole remaining alternates are untried, but this is no longer the
    // first failure, so the transient branch applies.
    let mut evaluation = healthy(AgentKind::Scout);
    evaluation.execution_time_ms = 5000;
    evaluation.expected_duration_ms = 1000;

    let decision = h.coordinator.evaluate_output(&h.goal, &evaluation, None).await;

    assert_eq!(decision.decision, DecisionKind::RetrySame);
    assert_eq!(
        decision.retry_params.get("expected_duration_ms").and_then(|v| v.as_u64()),
        Some(2000)
    );
}

#[tokio::test]
async fn test_moderate_failure_with_partials_augments() {
    let h = harness();
    seed_failed_attempt(&h, AgentKind::Scout).await;
    // Low confidence is not transient, so with the first failure already
    // consumed the partial results route the decision to augment.
    let mut evaluation = healthy(AgentKind::Scout);
    evaluation.confidence = Some(0.3);
    evaluation.partial_results = Some(json!([{"company": "Fjord AS"}]));

    let decision = h.coordinator.evaluate_output(&h.goal, &evaluation, None).await;

    assert_eq!(decision.decision, DecisionKind::Augment);
    assert!(decision.target_agent.is_some());
    assert!(decision.partial_results.is_some());
}

#[tokio::test]
async fn test_agent_without_alternates_escalates() {
    let h = harness();
    let mut evaluation = healthy(AgentKind::Operator);
    evaluation.results = json!({"results": []});

    let decision = h.coordinator.evaluate_output(&h.goal, &evaluation, None).await;

    assert_eq!(decision.decision, DecisionKind::Escalate);
}

#[tokio::test]
async fn test_high_risk_task_escalates_despite_alternates() {
    let h = harness();
    let mut evaluation = healthy(AgentKind::Scout);
    evaluation.results = json!({"results": []});
    let characteristics = TaskCharacteristics { risk_score: 0.8 };

    let decision = h
        .coordinator
        .evaluate_output(&h.goal, &evaluation, Some(&characteristics))
        .await;

    assert_eq!(decision.decision, DecisionKind::Escalate);
}

#[tokio::test]
async fn test_structural_verification_failure_escalates() {
    let h = harness();
    let mut evaluation = healthy(AgentKind::Scribe);
    evaluation.verification_result = Some(VerificationResult {
        passed: false,
        score: Some(0.1),
        notes: Some("missing required sections".to_string()),
        structural: true,
    });

    let decision = h.coordinator.evaluate_output(&h.goal, &evaluation, None).await;

    assert_eq!(decision.decision, DecisionKind::Escalate);
    assert!(!decision.failure_analysis.unwrap().recoverable);
}

#[tokio::test]
async fn test_checkpoint_partial_results_records_a_trace_row() {
    let h = harness();
    let partial = json!([{"company": "Fjord AS"}]);

    h.coordinator
        .checkpoint_partial_results(&h.goal, "scout", &partial, "escalating")
        .await;

    let tree = h.traces.get_trace_tree(h.goal.id).await.unwrap();
    let checkpoint_rows: Vec<_> = tree
        .roots
        .iter()
        .filter(|n| n.trace.delegator == "coordinator")
        .collect();
    assert_eq!(checkpoint_rows.len(), 1);
}

#[tokio::test]
async fn test_checkpoint_partial_results_is_fail_open_on_broken_store() {
    use async_trait::async_trait;
    use conductor_core::domain::goal::GoalId;
    use conductor_core::domain::repository::{RepositoryError, TraceRepository};
    use conductor_core::domain::trace::{DelegationTrace, TraceId};

    struct BrokenTraceRepository;

    #[async_trait]
    impl TraceRepository for BrokenTraceRepository {
        async fn insert(&self, _trace: &DelegationTrace) -> Result<(), RepositoryError> {
            Err(RepositoryError::Database("store offline".to_string()))
        }
        async fn update(&self, _trace: &DelegationTrace) -> Result<(), RepositoryError> {
            Err(RepositoryError::Database("store offline".to_string()))
        }
        async fn find_by_id(&self, _id: TraceId) -> Result<Option<DelegationTrace>, RepositoryError> {
            Err(RepositoryError::Database("store offline".to_string()))
        }
        async fn find_by_goal(&self, _goal_id: GoalId) -> Result<Vec<DelegationTrace>, RepositoryError> {
            Err(RepositoryError::Database("store offline".to_string()))
        }
        async fn find_by_user(&self, _user_id: &str, _limit: usize) -> Result<Vec<DelegationTrace>, RepositoryError> {
            Err(RepositoryError::Database("store offline".to_string()))
        }
    }

    let traces = Arc::new(DelegationTraceService::new(Arc::new(BrokenTraceRepository)));
    let ledger = Arc::new(InMemoryBudgetLedger::new());
    let governor = Arc::new(CostGovernor::new(ledger, BudgetDefaults::default()));
    let coordinator = AdaptiveCoordinator::new(governor, traces, CoordinatorThresholds::default());
    let goal = Goal::new("objective", "acct-42");

    // Must return, not propagate: losing the checkpoint beats crashing an
    // already-degraded goal.
    coordinator
        .checkpoint_partial_results(&goal, "scout", &json!([1, 2, 3]), "escalating")
        .await;
}

#[test]
fn test_re_delegation_table_matches_policy() {
    assert_eq!(re_delegation_target(AgentKind::Scribe, &[]), Some(AgentKind::Strategist));
    assert_eq!(re_delegation_target(AgentKind::Operator, &[]), None);
    assert_eq!(re_delegation_target(AgentKind::Verifier, &[]), None);
    assert_eq!(re_delegation_target(AgentKind::Executor, &[]), None);
    assert_eq!(re_delegation_target(AgentKind::Scout, &[]), Some(AgentKind::Analyst));
}
