// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Worker Agent Contracts
//!
//! The conductor treats worker agents as opaque beyond their input/output
//! contract. Agent types form a closed set ([`AgentKind`]) with an explicit
//! extension registry for dynamically defined agents, so an invalid type
//! coming out of the planner is caught at the decision boundary instead of
//! leaking into dispatch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::domain::capability::CapabilityToken;
use crate::domain::goal::GoalId;

/// Known worker-agent categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Broad external discovery (search, crawl).
    Scout,
    /// Synthesis and interpretation of gathered material.
    Analyst,
    /// Targeted lookup of specific entities.
    Hunter,
    /// Drafting and editing of written output.
    Scribe,
    /// Planning and prioritization.
    Strategist,
    /// Side-effecting business operations (CRM writes, outreach).
    Operator,
    /// Independent quality verification.
    Verifier,
    /// Direct execution of pre-approved action sequences.
    Executor,
}

impl AgentKind {
    pub const ALL: [AgentKind; 8] = [
        AgentKind::Scout,
        AgentKind::Analyst,
        AgentKind::Hunter,
        AgentKind::Scribe,
        AgentKind::Strategist,
        AgentKind::Operator,
        AgentKind::Verifier,
        AgentKind::Executor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Scout => "scout",
            AgentKind::Analyst => "analyst",
            AgentKind::Hunter => "hunter",
            AgentKind::Scribe => "scribe",
            AgentKind::Strategist => "strategist",
            AgentKind::Operator => "operator",
            AgentKind::Verifier => "verifier",
            AgentKind::Executor => "executor",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentKind {
    type Err = UnknownAgentKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownAgentKind(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown agent kind: '{0}'")]
pub struct UnknownAgentKind(pub String);

/// An agent reference resolved at the decision boundary: either a built-in
/// kind or a registered dynamic extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedAgent {
    Builtin(AgentKind),
    Extension(String),
}

impl ResolvedAgent {
    pub fn name(&self) -> &str {
        match self {
            ResolvedAgent::Builtin(kind) => kind.as_str(),
            ResolvedAgent::Extension(name) => name,
        }
    }

    /// The built-in kind, when this is not an extension agent.
    pub fn builtin(&self) -> Option<AgentKind> {
        match self {
            ResolvedAgent::Builtin(kind) => Some(*kind),
            ResolvedAgent::Extension(_) => None,
        }
    }
}

/// Resolves planner-supplied agent-type names.
///
/// Built-in kinds always resolve; anything else must have been registered as
/// an extension at composition time. Unknown names resolve to `None` and the
/// caller decides how to degrade.
#[derive(Debug, Default)]
pub struct AgentKindRegistry {
    extensions: HashSet<String>,
}

impl AgentKindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dynamically defined agent type.
    pub fn register_extension(&mut self, name: impl Into<String>) {
        self.extensions.insert(name.into());
    }

    pub fn resolve(&self, name: &str) -> Option<ResolvedAgent> {
        if let Ok(kind) = name.parse::<AgentKind>() {
            return Some(ResolvedAgent::Builtin(kind));
        }
        if self.extensions.contains(name) {
            return Some(ResolvedAgent::Extension(name.to_string()));
        }
        None
    }
}

/// One bounded sub-task handed to a worker agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub goal_id: GoalId,
    /// What the agent is being asked to do, in the planner's words.
    pub intent: String,
    pub parameters: Value,
}

/// Result contract every worker agent reports back through the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub data: Value,
    pub error: Option<String>,
    pub tokens_used: u64,
    pub execution_time_ms: u64,
}

impl DispatchOutcome {
    /// A synthesized failure outcome for errors that never reached an agent.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            tokens_used: 0,
            execution_time_ms: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no worker available for agent type '{0}'")]
    AgentUnavailable(String),

    #[error("dispatch transport error: {0}")]
    Transport(String),

    #[error("task rejected by agent: {0}")]
    Rejected(String),
}

/// Hands sub-tasks to worker agents. Implementations live outside this crate;
/// the conductor only relies on the outcome contract.
#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        agent: &ResolvedAgent,
        task: AgentTask,
        token: &CapabilityToken,
    ) -> Result<DispatchOutcome, DispatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_kinds_resolve() {
        let registry = AgentKindRegistry::new();

        assert_eq!(
            registry.resolve("scout"),
            Some(ResolvedAgent::Builtin(AgentKind::Scout))
        );
        assert_eq!(
            registry.resolve("strategist"),
            Some(ResolvedAgent::Builtin(AgentKind::Strategist))
        );
    }

    #[test]
    fn test_unknown_kind_is_rejected_at_boundary() {
        let registry = AgentKindRegistry::new();

        assert_eq!(registry.resolve("wizard"), None);
    }

    #[test]
    fn test_registered_extension_resolves() {
        let mut registry = AgentKindRegistry::new();
        registry.register_extension("translator");

        assert_eq!(
            registry.resolve("translator"),
            Some(ResolvedAgent::Extension("translator".to_string()))
        );
    }
}
