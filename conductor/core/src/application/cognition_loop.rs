// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cognition Loop
//!
//! Drives one goal through repeated perceive → reason → decide → act cycles
//! until the planner declares it complete, it blocks on human input, or the
//! iteration fail-safe trips.
//!
//! ## Phase Contract
//!
//! A full non-terminal cycle appends exactly four phase-log entries; a cycle
//! the planner terminates at decide appends three. Every phase is bounded by
//! the configured phase timeout, and the run is abortable between cycles via
//! a cancellation token.
//!
//! ## Degradation
//!
//! Collaborator failures never abort the loop: a failing memory tier
//! contributes nothing to perceive, malformed planner output falls back to
//! defined defaults, and failed dispatches are routed through the adaptive
//! coordinator. The only signal a user ever sees directly is an escalation.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::coordinator::AdaptiveCoordinator;
use crate::application::trace_service::DelegationTraceService;
use crate::domain::adaptive::{DecisionKind, OutputEvaluation, TaskCharacteristics};
use crate::domain::agent::{AgentDispatcher, AgentKind, AgentKindRegistry, AgentTask, DispatchOutcome, ResolvedAgent};
use crate::domain::capability::CapabilityToken;
use crate::domain::cognition::{truncate_summary, Directive, LoopState, Phase, PhaseLog, Synthesis};
use crate::domain::config::ConductorConfig;
use crate::domain::events::GoalEvent;
use crate::domain::goal::Goal;
use crate::domain::llm::{GenerationOptions, LLMProvider};
use crate::domain::memory::{MemoryTier, Observation};
use crate::domain::trace::{TraceId, TraceStatus, VerificationResult};
use crate::infrastructure::event_bus::EventBus;

/// Observations read from each memory tier per perceive phase.
const PERCEIVE_SNAPSHOT_LIMIT: usize = 32;

const REASON_SYSTEM_PROMPT: &str = "You are the situational-awareness stage of an autonomous goal conductor. \
Synthesize the observations into patterns, opportunities, and threats. \
Respond with a single JSON object: {\"patterns\": [], \"opportunities\": [], \"threats\": [], \"recommended_focus\": null}.";

const DECIDE_SYSTEM_PROMPT: &str = "You are the decision stage of an autonomous goal conductor. \
Given the goal and the current synthesis, choose the next step. \
Respond with a single JSON object: {\"action\": \"delegate\"|\"complete\"|\"blocked\", \
\"agent\": \"scout\"|\"analyst\"|\"hunter\"|\"scribe\"|\"strategist\"|\"operator\"|\"verifier\"|\"executor\"|null, \
\"parameters\": {}, \"reasoning\": \"...\"}.";

pub struct CognitionLoop {
    reasoner: Arc<dyn LLMProvider>,
    memory_tiers: Vec<Arc<dyn MemoryTier>>,
    dispatcher: Arc<dyn AgentDispatcher>,
    coordinator: Arc<AdaptiveCoordinator>,
    traces: Arc<DelegationTraceService>,
    events: EventBus,
    registry: AgentKindRegistry,
    config: Arc<ConductorConfig>,
}

struct DelegationAttempt {
    trace_id: Option<TraceId>,
    outcome: DispatchOutcome,
    duration_ms: u64,
}

struct ActReport {
    input_summary: String,
    output_summary: String,
    tokens_used: u64,
    escalated: bool,
}

impl CognitionLoop {
    pub fn new(
        reasoner: Arc<dyn LLMProvider>,
        dispatcher: Arc<dyn AgentDispatcher>,
        coordinator: Arc<AdaptiveCoordinator>,
        traces: Arc<DelegationTraceService>,
        events: EventBus,
        config: Arc<ConductorConfig>,
    ) -> Self {
        Self {
            reasoner,
            memory_tiers: Vec::new(),
            dispatcher,
            coordinator,
            traces,
            events,
            registry: AgentKindRegistry::new(),
            config,
        }
    }

    pub fn with_memory_tiers(mut self, tiers: Vec<Arc<dyn MemoryTier>>) -> Self {
        self.memory_tiers = tiers;
        self
    }

    pub fn with_registry(mut self, registry: AgentKindRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Run cycles until the goal completes, blocks, is cancelled, or the
    /// iteration fail-safe trips.
    pub async fn run_to_completion(&self, goal: &Goal, cancel: &CancellationToken) -> LoopState {
        let mut state = LoopState::new(goal.id);
        let max_iterations = self.config.cognition.max_iterations;

        while !state.is_terminal() && state.iteration < max_iterations {
            if cancel.is_cancelled() {
                info!(goal_id = %goal.id, iteration = state.iteration, "goal run cancelled between iterations");
                break;
            }
            self.run_single_iteration(&mut state, goal).await;
        }

        if state.is_complete {
            self.events.publish(GoalEvent::GoalCompleted {
                goal_id: goal.id,
                iterations: state.iteration,
                at: Utc::now(),
            });
        } else if state.is_blocked {
            let reason = state
                .last_decision
                .as_ref()
                .map(|d| d.reasoning.clone())
                .unwrap_or_else(|| "goal run blocked".to_string());
            self.events.publish(GoalEvent::GoalBlocked {
                goal_id: goal.id,
                reason,
                at: Utc::now(),
            });
        }
        state
    }

    /// Execute one perceive → reason → decide → act cycle, unless decide is
    /// terminal.
    pub async fn run_single_iteration(&self, state: &mut LoopState, goal: &Goal) {
        let iteration = state.iteration;
        metrics::counter!("conductor_iterations_total").increment(1);

        // PERCEIVE
        state.current_phase = Phase::Perceive;
        let started = Instant::now();
        let observations = self.perceive(goal).await;
        state.phase_logs.push(self.phase_log(
            Phase::Perceive,
            iteration,
            format!("snapshot of {} memory tiers", self.memory_tiers.len()),
            format!("{} observations gathered", observations.len()),
            0,
            started.elapsed().as_millis() as u64,
        ));

        // REASON
        state.current_phase = Phase::Reason;
        let started = Instant::now();
        let (synthesis, reason_tokens) = self.reason(goal, &observations).await;
        state.phase_logs.push(self.phase_log(
            Phase::Reason,
            iteration,
            format!("{} observations", observations.len()),
            serde_json::to_string(&synthesis).unwrap_or_default(),
            reason_tokens,
            started.elapsed().as_millis() as u64,
        ));

        // DECIDE
        state.current_phase = Phase::Decide;
        let started = Instant::now();
        let (directive, decide_tokens) = self.decide(goal, &synthesis).await;
        state.phase_logs.push(self.phase_log(
            Phase::Decide,
            iteration,
            synthesis
                .recommended_focus
                .clone()
                .unwrap_or_else(|| "no recommended focus".to_string()),
            format!("action={} agent={}", directive.action, directive.agent.as_deref().unwrap_or("-")),
            decide_tokens,
            started.elapsed().as_millis() as u64,
        ));
        state.last_decision = Some(directive.clone());

        if directive.is_complete() {
            info!(goal_id = %goal.id, iteration, "planner declared the goal complete");
            state.is_complete = true;
            return;
        }
        if directive.is_blocked() {
            info!(goal_id = %goal.id, iteration, "planner declared the goal blocked");
            state.is_blocked = true;
            return;
        }

        // ACT
        state.current_phase = Phase::Act;
        let started = Instant::now();
        let report = self.act(goal, &directive).await;
        if report.escalated {
            state.is_blocked = true;
        }
        state.phase_logs.push(self.phase_log(
            Phase::Act,
            iteration,
            report.input_summary,
            report.output_summary,
            report.tokens_used,
            started.elapsed().as_millis() as u64,
        ));
        state.iteration += 1;
    }

    /// Gather bounded snapshots from every configured memory tier. A failing
    /// or slow tier contributes nothing.
    async fn perceive(&self, goal: &Goal) -> Vec<Observation> {
        let phase_timeout = self.config.cognition.phase_timeout;
        let snapshots = futures::future::join_all(self.memory_tiers.iter().map(|tier| {
            let tier = Arc::clone(tier);
            async move {
                let name = tier.name().to_string();
                match timeout(phase_timeout, tier.snapshot(goal.id, PERCEIVE_SNAPSHOT_LIMIT)).await {
                    Ok(Ok(rows)) => rows,
                    Ok(Err(e)) => {
                        warn!(tier = %name, "memory tier failed during perceive: {e}");
                        Vec::new()
                    }
                    Err(_) => {
                        warn!(tier = %name, "memory tier timed out during perceive");
                        Vec::new()
                    }
                }
            }
        }))
        .await;
        snapshots.into_iter().flatten().collect()
    }

    async fn reason(&self, goal: &Goal, observations: &[Observation]) -> (Synthesis, u64) {
        let digest: String = observations
            .iter()
            .take(PERCEIVE_SNAPSHOT_LIMIT)
            .map(|o| format!("- [{}] {}", o.tier, truncate_summary(&o.content, 200)))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!("Goal: {}\n\nObservations:\n{digest}", goal.objective);
        let options = GenerationOptions {
            system_prompt: Some(REASON_SYSTEM_PROMPT.to_string()),
            temperature: Some(0.2),
            max_tokens: Some(1024),
            ..Default::default()
        };

        match timeout(self.config.cognition.phase_timeout, self.reasoner.generate(&prompt, &options)).await {
            Ok(Ok(response)) => (
                Synthesis::parse_lenient(&response.text),
                response.usage.total_tokens as u64,
            ),
            Ok(Err(e)) => {
                warn!(goal_id = %goal.id, "reasoner failed during reason phase: {e}");
                (Synthesis::default(), 0)
            }
            Err(_) => {
                warn!(goal_id = %goal.id, "reason phase timed out");
                (Synthesis::default(), 0)
            }
        }
    }

    async fn decide(&self, goal: &Goal, synthesis: &Synthesis) -> (Directive, u64) {
        let prompt = format!(
            "Goal: {}\n\nCurrent synthesis:\n{}",
            goal.objective,
            serde_json::to_string_pretty(synthesis).unwrap_or_default()
        );
        let options = GenerationOptions {
            system_prompt: Some(DECIDE_SYSTEM_PROMPT.to_string()),
            temperature: Some(0.1),
            max_tokens: Some(1024),
            ..Default::default()
        };

        match timeout(self.config.cognition.phase_timeout, self.reasoner.generate(&prompt, &options)).await {
            Ok(Ok(response)) => (
                Directive::parse_lenient(&response.text),
                response.usage.total_tokens as u64,
            ),
            Ok(Err(e)) => {
                warn!(goal_id = %goal.id, "reasoner failed during decide phase: {e}");
                (
                    Directive {
                        reasoning: format!("planner unavailable: {e}"),
                        ..Directive::default()
                    },
                    0,
                )
            }
            Err(_) => {
                warn!(goal_id = %goal.id, "decide phase timed out");
                (
                    Directive {
                        reasoning: "planner timed out".to_string(),
                        ..Directive::default()
                    },
                    0,
                )
            }
        }
    }

    /// Dispatch the decided sub-task and resolve its aftermath through the
    /// adaptive coordinator.
    async fn act(&self, goal: &Goal, directive: &Directive) -> ActReport {
        let max = self.config.cognition.summary_max_chars;

        let Some(agent) = directive.agent.as_deref().and_then(|name| self.registry.resolve(name)) else {
            // The planner named no agent, or one neither built in nor
            // registered. Nothing can be dispatched; the next cycle gets a
            // fresh chance and the iteration bound caps the damage.
            warn!(goal_id = %goal.id, agent = ?directive.agent, "directive names no dispatchable agent");
            return ActReport {
                input_summary: truncate_summary(&directive.action, max),
                output_summary: "no dispatchable agent in directive".to_string(),
                tokens_used: 0,
                escalated: false,
            };
        };

        let intent = directive
            .parameters
            .get("intent")
            .and_then(Value::as_str)
            .unwrap_or(&goal.objective)
            .to_string();
        let task = AgentTask {
            goal_id: goal.id,
            intent: intent.clone(),
            parameters: directive.parameters.clone(),
        };

        let attempt = self.delegate(goal, &agent, task.clone()).await;
        let evaluation = self.build_evaluation(&agent, &attempt.outcome, directive);
        let characteristics = TaskCharacteristics {
            risk_score: directive
                .parameters
                .get("risk_score")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
        };
        let decision = self.coordinator.evaluate_output(goal, &evaluation, Some(&characteristics)).await;

        self.events.publish(GoalEvent::RecoveryDecided {
            goal_id: goal.id,
            delegatee: agent.name().to_string(),
            decision: decision.decision,
            trigger: decision.failure_analysis.as_ref().map(|a| a.trigger),
            at: Utc::now(),
        });

        let mut tokens_used = attempt.outcome.tokens_used;
        let mut escalated = false;
        let output_summary = match decision.decision {
            DecisionKind::Proceed => {
                self.close_attempt(&attempt, evaluation.verification_result.clone(), None).await;
                self.outcome_summary(&attempt.outcome)
            }
            DecisionKind::RetrySame => {
                if let Some(trace_id) = attempt.trace_id {
                    self.fail_trace_open(trace_id, "retrying the same agent with adjusted parameters").await;
                }
                let retry_task = AgentTask {
                    goal_id: goal.id,
                    intent: intent.clone(),
                    parameters: merged_parameters(&directive.parameters, &decision.retry_params),
                };
                let retry = self.delegate(goal, &agent, retry_task).await;
                tokens_used += retry.outcome.tokens_used;
                let status = if retry.outcome.success {
                    TraceStatus::Completed
                } else {
                    TraceStatus::Failed
                };
                self.close_attempt(&retry, None, Some(status)).await;
                format!("retried once: {}", self.outcome_summary(&retry.outcome))
            }
            DecisionKind::ReDelegate => {
                if let Some(trace_id) = attempt.trace_id {
                    self.close_re_delegated(trace_id, &attempt).await;
                }
                let target = decision.target_agent.unwrap_or(AgentKind::Analyst);
                let handoff = self.delegate(goal, &ResolvedAgent::Builtin(target), task).await;
                tokens_used += handoff.outcome.tokens_used;
                let status = if handoff.outcome.success {
                    TraceStatus::Completed
                } else {
                    TraceStatus::Failed
                };
                self.close_attempt(&handoff, None, Some(status)).await;
                format!("re-delegated to {target}: {}", self.outcome_summary(&handoff.outcome))
            }
            DecisionKind::Augment => {
                self.close_attempt(&attempt, evaluation.verification_result.clone(), None).await;
                let supplement = decision.target_agent.unwrap_or(AgentKind::Analyst);
                let augment_task = AgentTask {
                    goal_id: goal.id,
                    intent: format!("supplement partial results: {intent}"),
                    parameters: serde_json::json!({
                        "partial_results": decision.partial_results,
                        "original_agent": agent.name(),
                    }),
                };
                let extra = self.delegate(goal, &ResolvedAgent::Builtin(supplement), augment_task).await;
                tokens_used += extra.outcome.tokens_used;
                let status = if extra.outcome.success {
                    TraceStatus::Completed
                } else {
                    TraceStatus::Failed
                };
                self.close_attempt(&extra, None, Some(status)).await;
                format!("augmented by {supplement}: {}", self.outcome_summary(&extra.outcome))
            }
            DecisionKind::Escalate => {
                if let Some(partial) = &decision.partial_results {
                    self.coordinator
                        .checkpoint_partial_results(goal, agent.name(), partial, &decision.reasoning)
                        .await;
                }
                if let Some(trace_id) = attempt.trace_id {
                    self.fail_trace_open(trace_id, &decision.reasoning).await;
                }
                self.events.publish(GoalEvent::EscalationRaised {
                    goal_id: goal.id,
                    delegatee: agent.name().to_string(),
                    reason: decision.reasoning.clone(),
                    trigger: decision.failure_analysis.as_ref().map(|a| a.trigger),
                    at: Utc::now(),
                });
                escalated = true;
                format!("escalated: {}", decision.reasoning)
            }
        };

        ActReport {
            input_summary: truncate_summary(&intent, max),
            output_summary: truncate_summary(&output_summary, max),
            tokens_used,
            escalated,
        }
    }

    /// Mint a scoped token, open a trace row, and dispatch one sub-task.
    /// Trace-store failures are swallowed; the dispatch still happens.
    async fn delegate(&self, goal: &Goal, agent: &ResolvedAgent, task: AgentTask) -> DelegationAttempt {
        let (allowed, denied) = self.config.tokens.scope_for(agent);
        let token = CapabilityToken::mint(
            agent.name(),
            goal.id,
            allowed,
            denied,
            self.config.tokens.time_limit_seconds,
        );

        let trace_id = match self
            .traces
            .start_trace(
                goal.id,
                "conductor",
                agent.name(),
                &truncate_summary(&task.intent, self.config.cognition.summary_max_chars),
                Some(&goal.requested_by),
            )
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(goal_id = %goal.id, "trace open failed, continuing untraced: {e}");
                None
            }
        };

        let started = Instant::now();
        let outcome = match timeout(
            self.config.cognition.phase_timeout,
            self.dispatcher.dispatch(agent, task, &token),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(goal_id = %goal.id, agent = agent.name(), "dispatch failed: {e}");
                DispatchOutcome::failure(e.to_string())
            }
            Err(_) => {
                warn!(goal_id = %goal.id, agent = agent.name(), "dispatch exceeded the phase timeout");
                DispatchOutcome::failure("dispatch exceeded the phase timeout")
            }
        };

        self.events.publish(GoalEvent::DelegationDispatched {
            goal_id: goal.id,
            delegatee: agent.name().to_string(),
            trace_id,
            at: Utc::now(),
        });

        DelegationAttempt {
            trace_id,
            outcome,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn build_evaluation(
        &self,
        agent: &ResolvedAgent,
        outcome: &DispatchOutcome,
        directive: &Directive,
    ) -> OutputEvaluation {
        let data = &outcome.data;
        let results = if outcome.success {
            data.get("results").cloned().unwrap_or_else(|| data.clone())
        } else {
            Value::Null
        };
        let verification: Option<VerificationResult> = data
            .get("verification")
            .and_then(|v| serde_json::from_value(v.clone()).ok());

        OutputEvaluation {
            agent: agent.clone(),
            confidence: data.get("confidence").and_then(Value::as_f64),
            results,
            data_timestamp: data
                .get("data_timestamp")
                .and_then(Value::as_str)
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            execution_time_ms: outcome.execution_time_ms,
            expected_duration_ms: directive
                .parameters
                .get("expected_duration_ms")
                .and_then(Value::as_u64)
                .unwrap_or(self.config.cognition.default_expected_duration_ms),
            verification_result: verification,
            partial_results: data.get("partial_results").cloned().filter(|v| !v.is_null()),
            error: outcome.error.clone(),
        }
    }

    async fn close_attempt(
        &self,
        attempt: &DelegationAttempt,
        verification: Option<VerificationResult>,
        status: Option<TraceStatus>,
    ) {
        let Some(trace_id) = attempt.trace_id else {
            return;
        };
        let duration = if attempt.outcome.execution_time_ms > 0 {
            attempt.outcome.execution_time_ms
        } else {
            attempt.duration_ms
        };
        let summary = self.outcome_summary(&attempt.outcome);
        if let Err(e) = self
            .traces
            .complete_trace(
                trace_id,
                &summary,
                self.dispatch_cost(attempt.outcome.tokens_used),
                duration,
                verification,
                status,
            )
            .await
        {
            warn!(%trace_id, "trace close failed: {e}");
        }
    }

    async fn close_re_delegated(&self, trace_id: TraceId, attempt: &DelegationAttempt) {
        if let Err(e) = self
            .traces
            .complete_trace(
                trace_id,
                "step handed to an alternate agent",
                self.dispatch_cost(attempt.outcome.tokens_used),
                attempt.duration_ms,
                None,
                Some(TraceStatus::ReDelegated),
            )
            .await
        {
            warn!(%trace_id, "trace close failed: {e}");
        }
    }

    async fn fail_trace_open(&self, trace_id: TraceId, message: &str) {
        if let Err(e) = self.traces.fail_trace(trace_id, message).await {
            warn!(%trace_id, "trace close failed: {e}");
        }
    }

    fn outcome_summary(&self, outcome: &DispatchOutcome) -> String {
        let max = self.config.cognition.summary_max_chars;
        if outcome.success {
            truncate_summary(&outcome.data.to_string(), max)
        } else {
            truncate_summary(
                outcome.error.as_deref().unwrap_or("dispatch failed without detail"),
                max,
            )
        }
    }

    fn dispatch_cost(&self, tokens_used: u64) -> f64 {
        tokens_used as f64 / 1000.0 * self.config.cognition.usd_per_1k_tokens
    }

    fn phase_log(
        &self,
        phase: Phase,
        iteration: u32,
        input: String,
        output: String,
        tokens_used: u64,
        duration_ms: u64,
    ) -> PhaseLog {
        let max = self.config.cognition.summary_max_chars;
        PhaseLog {
            phase,
            iteration,
            input_summary: truncate_summary(&input, max),
            output_summary: truncate_summary(&output, max),
            tokens_used,
            duration_ms,
            recorded_at: Utc::now(),
        }
    }
}

/// Overlay retry parameters onto the directive's original parameters.
fn merged_parameters(base: &Value, extra: &Value) -> Value {
    match (base, extra) {
        (Value::Object(b), Value::Object(e)) => {
            let mut merged = b.clone();
            for (k, v) in e {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        (Value::Null, other) => other.clone(),
        (kept, Value::Null) => kept.clone(),
        (kept, _) => kept.clone(),
    }
}
