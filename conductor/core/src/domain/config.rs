// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Conductor Configuration
//!
//! Product-tunable knobs for the cognition loop, the adaptive coordinator,
//! and token minting. Defaults preserve the shipped decision behavior;
//! deployments override them via YAML (`conductor-config.yaml`).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::domain::agent::{AgentKind, ResolvedAgent};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    pub coordinator: CoordinatorThresholds,
    pub cognition: CognitionLimits,
    pub budget: BudgetDefaults,
    pub tokens: TokenPolicy,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorThresholds::default(),
            cognition: CognitionLimits::default(),
            budget: BudgetDefaults::default(),
            tokens: TokenPolicy::default(),
        }
    }
}

impl ConductorConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn from_yaml_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml_str(&raw)?)
    }
}

/// Thresholds driving failure classification and the recovery policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorThresholds {
    /// Self-reported confidence below this floor classifies as low-confidence.
    pub low_confidence_floor: f64,
    /// Underlying data older than this window classifies as stale.
    #[serde(with = "humantime_serde")]
    pub stale_after: Duration,
    /// Execution time beyond `expected * multiplier` classifies as a timeout.
    pub timeout_multiplier: f64,
    /// Task risk at or above this ceiling forces escalation.
    pub escalation_risk_ceiling: f64,
    /// Partial results are only worth augmenting below this severity.
    pub augment_severity_ceiling: f64,
    /// Same-agent retries permitted per logical step.
    pub max_retries: u32,
}

impl Default for CoordinatorThresholds {
    fn default() -> Self {
        Self {
            low_confidence_floor: 0.5,
            stale_after: Duration::from_secs(24 * 60 * 60),
            timeout_multiplier: 2.0,
            escalation_risk_ceiling: 0.7,
            augment_severity_ceiling: 0.6,
            max_retries: 2,
        }
    }
}

/// Bounds on a single goal run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CognitionLimits {
    /// Fail-safe bound against runaway iteration.
    pub max_iterations: u32,
    /// Per-phase wall clock budget.
    #[serde(with = "humantime_serde")]
    pub phase_timeout: Duration,
    /// Phase-log summaries are truncated to this many characters.
    pub summary_max_chars: usize,
    /// Expected duration assumed for a dispatch when the planner gives none.
    pub default_expected_duration_ms: u64,
    /// Reasoner token spend converted to USD for trace cost accounting.
    pub usd_per_1k_tokens: f64,
}

impl Default for CognitionLimits {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            phase_timeout: Duration::from_secs(120),
            summary_max_chars: 240,
            default_expected_duration_ms: 30_000,
            usd_per_1k_tokens: 0.012,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetDefaults {
    /// Monthly ceiling applied when the ledger has no per-identity limit.
    pub monthly_limit_usd: f64,
}

impl Default for BudgetDefaults {
    fn default() -> Self {
        Self {
            monthly_limit_usd: 250.0,
        }
    }
}

/// Token minting policy: lifetime plus the per-agent action scopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenPolicy {
    pub time_limit_seconds: u64,
    /// Extra actions granted to registered extension agents.
    pub extension_actions: Vec<String>,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            time_limit_seconds: 900,
            extension_actions: vec!["read_corpus".to_string()],
        }
    }
}

impl TokenPolicy {
    /// Allowed/denied action sets for a delegation to `agent`.
    ///
    /// Write-capable actions are denied outright for every kind that has no
    /// business performing them, rather than merely left unlisted.
    pub fn scope_for(&self, agent: &ResolvedAgent) -> (HashSet<String>, HashSet<String>) {
        let allowed: &[&str] = match agent {
            ResolvedAgent::Builtin(AgentKind::Scout) => &["read_exa", "read_web"],
            ResolvedAgent::Builtin(AgentKind::Analyst) => &["read_corpus", "read_web"],
            ResolvedAgent::Builtin(AgentKind::Hunter) => &["read_exa", "read_crm"],
            ResolvedAgent::Builtin(AgentKind::Scribe) => &["read_corpus", "write_draft"],
            ResolvedAgent::Builtin(AgentKind::Strategist) => &["read_corpus", "read_crm"],
            ResolvedAgent::Builtin(AgentKind::Operator) => &["read_crm", "write_crm", "send_outreach"],
            ResolvedAgent::Builtin(AgentKind::Verifier) => &["read_corpus", "verify_output"],
            ResolvedAgent::Builtin(AgentKind::Executor) => &["read_crm", "write_crm", "run_playbook"],
            ResolvedAgent::Extension(_) => {
                let allowed = self.extension_actions.iter().cloned().collect();
                let denied = ["write_crm", "send_outreach", "run_playbook"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                return (allowed, denied);
            }
        };

        let denied: &[&str] = match agent {
            ResolvedAgent::Builtin(AgentKind::Operator) | ResolvedAgent::Builtin(AgentKind::Executor) => &[],
            _ => &["write_crm", "send_outreach", "run_playbook"],
        };

        (
            allowed.iter().map(|s| s.to_string()).collect(),
            denied.iter().map(|s| s.to_string()).collect(),
        )
    }
}
