// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Tool Enforcement Middleware
//!
//! The single choke-point through which every tool call passes before any
//! transport I/O. Validates a [`CapabilityToken`] against the action a tool
//! requires.
//!
//! ## Fail-Open / Fail-Closed Asymmetry
//!
//! - **No token supplied → fail-open.** Trusted internal and test callers
//!   invoke tools outside any delegation; they carry no token and are let
//!   through.
//! - **Token supplied → fail-closed.** A delegated caller is refused with a
//!   [`CapabilityViolation`] when the token is expired or out of scope.
//!
//! This asymmetry is intentional and load-bearing. Unifying it into uniform
//! fail-closed behavior breaks every legitimate tokenless internal call path.
//!
//! Enforcement is pure and synchronous: no I/O, no suspension point, so it
//! cannot bottleneck concurrent tool dispatch.

use tracing::{debug, warn};

use crate::domain::capability::{CapabilityToken, CapabilityViolation, ViolationReason};

/// Validates capability tokens at the tool-call boundary.
///
/// Stateless; a single instance is shared across the router.
#[derive(Debug, Default, Clone)]
pub struct ToolEnforcement;

impl ToolEnforcement {
    pub fn new() -> Self {
        Self
    }

    /// Check `token` against the action `tool_name` requires.
    ///
    /// # Errors
    ///
    /// Returns the violation when a supplied token is expired, explicitly
    /// denied the action, or never granted it. Never errs when `token` is
    /// `None`.
    pub fn enforce(
        &self,
        tool_name: &str,
        required_action: &str,
        token: Option<&CapabilityToken>,
    ) -> Result<(), CapabilityViolation> {
        let Some(token) = token else {
            debug!(tool_name, required_action, "tokenless tool call, enforcement bypassed");
            return Ok(());
        };

        let reason = if !token.is_valid() {
            Some(ViolationReason::TokenExpired)
        } else if token.denied_actions.contains(required_action) {
            Some(ViolationReason::ActionDenied)
        } else if !token.can_perform(required_action) {
            Some(ViolationReason::ActionNotGranted)
        } else {
            None
        };

        match reason {
            None => Ok(()),
            Some(reason) => {
                let violation = CapabilityViolation {
                    tool_name: tool_name.to_string(),
                    delegatee: token.delegatee.clone(),
                    action: required_action.to_string(),
                    reason,
                };
                warn!("Capability violation detected: {:?}", violation);
                metrics::counter!("conductor_policy_violations_total").increment(1);
                Err(violation)
            }
        }
    }
}
