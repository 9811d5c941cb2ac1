// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end tests for the perceive → reason → decide → act loop, wired
//! with scripted collaborators.
//!
//! The phase-log contract checked throughout: a full non-terminal cycle
//! appends exactly four entries, a cycle the planner terminates at decide
//! appends three, and a run never exceeds the configured iteration bound.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use conductor_core::application::cognition_loop::CognitionLoop;
use conductor_core::application::coordinator::AdaptiveCoordinator;
use conductor_core::application::cost_governor::CostGovernor;
use conductor_core::application::trace_service::DelegationTraceService;
use conductor_core::domain::agent::{
    AgentDispatcher, AgentTask, DispatchError, DispatchOutcome, ResolvedAgent,
};
use conductor_core::domain::capability::CapabilityToken;
use conductor_core::domain::cognition::Phase;
use conductor_core::domain::config::ConductorConfig;
use conductor_core::domain::events::GoalEvent;
use conductor_core::domain::goal::{Goal, GoalId};
use conductor_core::domain::llm::{
    FinishReason, GenerationOptions, GenerationResponse, LLMError, LLMProvider, TokenUsage,
};
use conductor_core::domain::memory::{MemoryTier, MemoryTierError, Observation};
use conductor_core::domain::trace::TraceStatus;
use conductor_core::infrastructure::event_bus::EventBus;
use conductor_core::infrastructure::repositories::{InMemoryBudgetLedger, InMemoryTraceRepository};

/// Route degradation warnings through the subscriber when RUST_LOG is set.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

/// Plays back queued responses; repeats `fallback` once the queue drains.
struct ScriptedReasoner {
    queue: Mutex<VecDeque<String>>,
    fallback: String,
}

impl ScriptedReasoner {
    fn new(responses: Vec<&str>, fallback: &str) -> Self {
        Self {
            queue: Mutex::new(responses.into_iter().map(|s| s.to_string()).collect()),
            fallback: fallback.to_string(),
        }
    }
}

#[async_trait]
impl LLMProvider for ScriptedReasoner {
    async fn generate(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<GenerationResponse, LLMError> {
        let text = self
            .queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(GenerationResponse {
            text,
            usage: TokenUsage {
                prompt_tokens: 50,
                completion_tokens: 25,
                total_tokens: 75,
            },
            provider: "scripted".to_string(),
            model: "test".to_string(),
            finish_reason: FinishReason::Stop,
        })
    }
}

struct DownReasoner;

#[async_trait]
impl LLMProvider for DownReasoner {
    async fn generate(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<GenerationResponse, LLMError> {
        Err(LLMError::Network("connection refused".to_string()))
    }
}

/// Routes outcomes by agent name; anything unlisted succeeds with results.
struct RoutedDispatcher {
    empty_for: Vec<&'static str>,
    fail_for: Vec<&'static str>,
}

impl RoutedDispatcher {
    fn healthy() -> Self {
        Self {
            empty_for: vec![],
            fail_for: vec![],
        }
    }
}

#[async_trait]
impl AgentDispatcher for RoutedDispatcher {
    async fn dispatch(
        &self,
        agent: &ResolvedAgent,
        _task: AgentTask,
        token: &CapabilityToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        assert_eq!(token.delegatee, agent.name(), "token must be scoped to the delegatee");

        if self.fail_for.contains(&agent.name()) {
            return Err(DispatchError::AgentUnavailable(agent.name().to_string()));
        }
        if self.empty_for.contains(&agent.name()) {
            return Ok(DispatchOutcome {
                success: true,
                data: json!({"results": []}),
                error: None,
                tokens_used: 10,
                execution_time_ms: 100,
            });
        }
        Ok(DispatchOutcome {
            success: true,
            data: json!({"confidence": 0.9, "results": [{"company": "Fjord AS"}]}),
            error: None,
            tokens_used: 120,
            execution_time_ms: 400,
        })
    }
}

struct StaticTier {
    name: String,
    rows: usize,
}

#[async_trait]
impl MemoryTier for StaticTier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn snapshot(&self, _goal_id: GoalId, limit: usize) -> Result<Vec<Observation>, MemoryTierError> {
        Ok((0..self.rows.min(limit))
            .map(|i| Observation {
                tier: self.name.clone(),
                content: format!("observation {i}"),
                recorded_at: chrono::Utc::now(),
                metadata: json!({}),
            })
            .collect())
    }
}

struct BrokenTier;

#[async_trait]
impl MemoryTier for BrokenTier {
    fn name(&self) -> &str {
        "broken"
    }

    async fn snapshot(&self, _goal_id: GoalId, _limit: usize) -> Result<Vec<Observation>, MemoryTierError> {
        Err(MemoryTierError::Unavailable("tier offline".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

const SYNTHESIS: &str = r#"{"patterns": ["inbound interest"], "opportunities": ["nordic expansion"], "threats": [], "recommended_focus": "discovery"}"#;
const DELEGATE_SCOUT: &str = r#"{"action": "delegate", "agent": "scout", "parameters": {"intent": "find nordic prospects"}, "reasoning": "need discovery first"}"#;
const DELEGATE_OPERATOR: &str = r#"{"action": "delegate", "agent": "operator", "parameters": {}, "reasoning": "update the crm"}"#;
const COMPLETE: &str = r#"{"action": "complete", "agent": null, "parameters": {}, "reasoning": "objective satisfied"}"#;
const BLOCKED: &str = r#"{"action": "blocked", "agent": null, "parameters": {}, "reasoning": "waiting on credentials"}"#;

struct Wiring {
    cognition: CognitionLoop,
    traces: Arc<DelegationTraceService>,
    events: EventBus,
}

fn wire(
    reasoner: Arc<dyn LLMProvider>,
    dispatcher: Arc<dyn AgentDispatcher>,
    tiers: Vec<Arc<dyn MemoryTier>>,
    config: ConductorConfig,
) -> Wiring {
    let repo = Arc::new(InMemoryTraceRepository::new());
    let traces = Arc::new(DelegationTraceService::new(repo));
    let ledger = Arc::new(InMemoryBudgetLedger::new());
    let governor = Arc::new(CostGovernor::new(ledger, config.budget.clone()));
    let coordinator = Arc::new(AdaptiveCoordinator::new(
        governor,
        traces.clone(),
        config.coordinator.clone(),
    ));
    let events = EventBus::with_default_capacity();
    let cognition = CognitionLoop::new(
        reasoner,
        dispatcher,
        coordinator,
        traces.clone(),
        events.clone(),
        Arc::new(config),
    )
    .with_memory_tiers(tiers);
    Wiring {
        cognition,
        traces,
        events,
    }
}

fn goal() -> Goal {
    Goal::new("expand into the nordic market", "acct-42")
}

fn phases(state: &conductor_core::domain::cognition::LoopState) -> Vec<Phase> {
    state.phase_logs.iter().map(|l| l.phase).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_cycle_appends_exactly_four_phase_logs() {
    let reasoner = Arc::new(ScriptedReasoner::new(vec![SYNTHESIS, DELEGATE_SCOUT], COMPLETE));
    let w = wire(
        reasoner,
        Arc::new(RoutedDispatcher::healthy()),
        vec![Arc::new(StaticTier { name: "working".into(), rows: 3 })],
        ConductorConfig::default(),
    );
    let goal = goal();
    let mut state = conductor_core::domain::cognition::LoopState::new(goal.id);

    w.cognition.run_single_iteration(&mut state, &goal).await;

    assert_eq!(state.phase_logs.len(), 4);
    assert_eq!(phases(&state), vec![Phase::Perceive, Phase::Reason, Phase::Decide, Phase::Act]);
    assert_eq!(state.iteration, 1);
    assert!(!state.is_terminal());
}

#[tokio::test]
async fn test_complete_decision_appends_three_logs_and_terminates() {
    let reasoner = Arc::new(ScriptedReasoner::new(vec![SYNTHESIS, COMPLETE], COMPLETE));
    let w = wire(
        reasoner,
        Arc::new(RoutedDispatcher::healthy()),
        vec![],
        ConductorConfig::default(),
    );
    let goal = goal();
    let mut state = conductor_core::domain::cognition::LoopState::new(goal.id);

    w.cognition.run_single_iteration(&mut state, &goal).await;

    assert_eq!(state.phase_logs.len(), 3);
    assert_eq!(phases(&state), vec![Phase::Perceive, Phase::Reason, Phase::Decide]);
    assert!(state.is_complete);
    assert!(!state.is_blocked);
}

#[tokio::test]
async fn test_blocked_decision_appends_three_logs_and_terminates() {
    let reasoner = Arc::new(ScriptedReasoner::new(vec![SYNTHESIS, BLOCKED], BLOCKED));
    let w = wire(
        reasoner,
        Arc::new(RoutedDispatcher::healthy()),
        vec![],
        ConductorConfig::default(),
    );
    let goal = goal();
    let mut state = conductor_core::domain::cognition::LoopState::new(goal.id);

    w.cognition.run_single_iteration(&mut state, &goal).await;

    assert_eq!(state.phase_logs.len(), 3);
    assert!(state.is_blocked);
    assert!(!state.is_complete);
}

#[tokio::test]
async fn test_run_to_completion_never_exceeds_max_iterations() {
    // The planner always delegates; only the fail-safe bound stops the run.
    let reasoner = Arc::new(ScriptedReasoner::new(vec![], DELEGATE_SCOUT));
    let mut config = ConductorConfig::default();
    config.cognition.max_iterations = 4;
    let w = wire(reasoner, Arc::new(RoutedDispatcher::healthy()), vec![], config);
    let goal = goal();

    let state = w.cognition.run_to_completion(&goal, &CancellationToken::new()).await;

    assert_eq!(state.iteration, 4);
    assert_eq!(state.phase_logs.len(), 16);
    assert!(!state.is_terminal());
}

#[tokio::test]
async fn test_run_to_completion_publishes_goal_completed() {
    let reasoner = Arc::new(ScriptedReasoner::new(
        vec![SYNTHESIS, DELEGATE_SCOUT, SYNTHESIS, COMPLETE],
        COMPLETE,
    ));
    let w = wire(
        reasoner,
        Arc::new(RoutedDispatcher::healthy()),
        vec![],
        ConductorConfig::default(),
    );
    let goal = goal();
    let mut rx = w.events.subscribe();

    let state = w.cognition.run_to_completion(&goal, &CancellationToken::new()).await;

    assert!(state.is_complete);
    let mut saw_completed = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, GoalEvent::GoalCompleted { .. }) {
            saw_completed = true;
        }
    }
    assert!(saw_completed);
}

#[tokio::test]
async fn test_failing_memory_tier_does_not_abort_perceive() {
    init_tracing();
    let reasoner = Arc::new(ScriptedReasoner::new(vec![SYNTHESIS, DELEGATE_SCOUT], COMPLETE));
    let w = wire(
        reasoner,
        Arc::new(RoutedDispatcher::healthy()),
        vec![
            Arc::new(BrokenTier),
            Arc::new(StaticTier { name: "episodic".into(), rows: 2 }),
        ],
        ConductorConfig::default(),
    );
    let goal = goal();
    let mut state = conductor_core::domain::cognition::LoopState::new(goal.id);

    w.cognition.run_single_iteration(&mut state, &goal).await;

    assert_eq!(state.phase_logs.len(), 4);
    // The healthy tier still contributed.
    assert!(state.phase_logs[0].output_summary.contains("2 observations"));
}

#[tokio::test]
async fn test_reasoner_outage_degrades_without_aborting() {
    init_tracing();
    let w = wire(
        Arc::new(DownReasoner),
        Arc::new(RoutedDispatcher::healthy()),
        vec![],
        ConductorConfig::default(),
    );
    let goal = goal();
    let mut state = conductor_core::domain::cognition::LoopState::new(goal.id);

    w.cognition.run_single_iteration(&mut state, &goal).await;

    // Perception, an empty synthesis, a fallback directive, and an act entry
    // reporting that nothing was dispatchable.
    assert_eq!(state.phase_logs.len(), 4);
    assert!(state.phase_logs[3].output_summary.contains("no dispatchable agent"));
    assert!(!state.is_terminal());
}

#[tokio::test]
async fn test_malformed_planner_output_falls_back_to_empty_synthesis() {
    let reasoner = Arc::new(ScriptedReasoner::new(
        vec!["not json at all", DELEGATE_SCOUT],
        COMPLETE,
    ));
    let w = wire(
        reasoner,
        Arc::new(RoutedDispatcher::healthy()),
        vec![],
        ConductorConfig::default(),
    );
    let goal = goal();
    let mut state = conductor_core::domain::cognition::LoopState::new(goal.id);

    w.cognition.run_single_iteration(&mut state, &goal).await;

    assert_eq!(state.phase_logs.len(), 4);
    assert!(!state.is_terminal());
}

#[tokio::test]
async fn test_first_failure_re_delegates_and_links_traces() {
    // Scout returns nothing; the coordinator hands the step to the analyst.
    let reasoner = Arc::new(ScriptedReasoner::new(vec![SYNTHESIS, DELEGATE_SCOUT], COMPLETE));
    let dispatcher = Arc::new(RoutedDispatcher {
        empty_for: vec!["scout"],
        fail_for: vec![],
    });
    let w = wire(reasoner, dispatcher, vec![], ConductorConfig::default());
    let goal = goal();
    let mut state = conductor_core::domain::cognition::LoopState::new(goal.id);

    w.cognition.run_single_iteration(&mut state, &goal).await;

    let summary = w.traces.summarize_goal(goal.id).await.unwrap();
    assert_eq!(summary.retries, 1, "the scout row links the step as re_delegated");
    assert_eq!(summary.agent_count, 2);

    let rows = w.traces.get_user_traces("acct-42", 10).await.unwrap();
    assert!(rows.iter().any(|r| r.delegatee == "scout" && r.status == TraceStatus::ReDelegated));
    assert!(rows.iter().any(|r| r.delegatee == "analyst" && r.status == TraceStatus::Completed));
}

#[tokio::test]
async fn test_unrecoverable_operator_failure_escalates_and_blocks() {
    let reasoner = Arc::new(ScriptedReasoner::new(vec![SYNTHESIS, DELEGATE_OPERATOR], COMPLETE));
    let dispatcher = Arc::new(RoutedDispatcher {
        empty_for: vec![],
        fail_for: vec!["operator"],
    });
    let w = wire(reasoner, dispatcher, vec![], ConductorConfig::default());
    let goal = goal();
    let mut rx = w.events.subscribe();
    let mut state = conductor_core::domain::cognition::LoopState::new(goal.id);

    w.cognition.run_single_iteration(&mut state, &goal).await;

    assert!(state.is_blocked, "escalation must surface as a blocked run");
    assert_eq!(state.phase_logs.len(), 4);

    let mut saw_escalation = false;
    while let Ok(event) = rx.try_recv() {
        if let GoalEvent::EscalationRaised { delegatee, .. } = event {
            assert_eq!(delegatee, "operator");
            saw_escalation = true;
        }
    }
    assert!(saw_escalation, "escalation must be published for the user");

    let rows = w.traces.get_user_traces("acct-42", 10).await.unwrap();
    assert!(rows.iter().any(|r| r.delegatee == "operator" && r.status == TraceStatus::Failed));
}

#[tokio::test]
async fn test_cancellation_stops_the_run_between_iterations() {
    let reasoner = Arc::new(ScriptedReasoner::new(vec![], DELEGATE_SCOUT));
    let w = wire(
        reasoner,
        Arc::new(RoutedDispatcher::healthy()),
        vec![],
        ConductorConfig::default(),
    );
    let goal = goal();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let state = w.cognition.run_to_completion(&goal, &cancel).await;

    assert_eq!(state.iteration, 0);
    assert!(state.phase_logs.is_empty());
}
