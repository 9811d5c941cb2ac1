// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Tool Registry & Router
//!
//! Maps each tool name to the server that hosts it and the capability action
//! it requires, then routes calls over JSON-RPC 2.0.
//!
//! Conductor-mediated proxy pattern:
//!
//! ```text
//! Agent → ToolRouter (enforce → dispatch → audit) → Tool Server
//! ```
//!
//! Enforcement runs client-side, before any network I/O, so an out-of-scope
//! call fails fast without ever reaching the server. When a trace service and
//! goal/delegatee are supplied, every invocation is wrapped in open/close
//! trace calls, failures included.

use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::trace_service::DelegationTraceService;
use crate::domain::capability::{CapabilityToken, CapabilityViolation};
use crate::domain::events::GoalEvent;
use crate::domain::goal::GoalId;
use crate::domain::trace::TraceId;
use crate::infrastructure::enforcement::ToolEnforcement;
use crate::infrastructure::event_bus::EventBus;

/// A tool server reachable over HTTP JSON-RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolServer {
    pub name: String,
    pub endpoint: String,
}

/// Registry entry: one tool, the server hosting it, and the capability
/// action it requires.
#[derive(Debug, Clone)]
pub struct ToolRoute {
    pub tool_name: String,
    pub server: ToolServer,
    pub required_action: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolCallError {
    #[error("no route registered for tool '{0}'")]
    UnknownTool(String),

    #[error(transparent)]
    Capability(#[from] CapabilityViolation),

    #[error("tool transport error: {0}")]
    Transport(String),

    #[error("tool server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("malformed tool response: {0}")]
    MalformedResponse(String),
}

pub struct ToolRouter {
    routes: DashMap<String, ToolRoute>,
    enforcement: ToolEnforcement,
    http: reqwest::Client,
    traces: Option<Arc<DelegationTraceService>>,
    events: Option<EventBus>,
}

impl ToolRouter {
    pub fn new(enforcement: ToolEnforcement) -> Self {
        Self {
            routes: DashMap::new(),
            enforcement,
            http: reqwest::Client::new(),
            traces: None,
            events: None,
        }
    }

    /// Audit every routed call through the delegation trace store.
    pub fn with_traces(mut self, traces: Arc<DelegationTraceService>) -> Self {
        self.traces = Some(traces);
        self
    }

    /// Publish blocked-call events for observers.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Register a tool route. Later registrations replace earlier ones.
    pub fn register_route(&self, route: ToolRoute) {
        debug!(tool = %route.tool_name, server = %route.server.name, "tool route registered");
        self.routes.insert(route.tool_name.clone(), route);
    }

    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.iter().map(|r| r.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Route one tool call.
    ///
    /// Enforcement happens before dispatch: a delegated caller whose token
    /// does not cover the route's required action is refused without any
    /// network traffic. Tokenless callers pass through (trusted internal
    /// paths).
    ///
    /// # Errors
    ///
    /// [`ToolCallError::Capability`] on an enforcement refusal; transport,
    /// server, and decoding failures otherwise.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        args: Value,
        token: Option<&CapabilityToken>,
        goal_id: Option<GoalId>,
        delegatee: Option<&str>,
    ) -> Result<Value, ToolCallError> {
        let route = self
            .routes
            .get(tool_name)
            .map(|r| r.value().clone())
            .ok_or_else(|| ToolCallError::UnknownTool(tool_name.to_string()))?;

        if let Err(violation) = self.enforcement.enforce(tool_name, &route.required_action, token) {
            if let Some(events) = &self.events {
                events.publish(GoalEvent::PolicyViolationBlocked {
                    tool_name: violation.tool_name.clone(),
                    delegatee: violation.delegatee.clone(),
                    action: violation.action.clone(),
                    at: chrono::Utc::now(),
                });
            }
            return Err(violation.into());
        }

        let trace_id = self.open_trace(&route, &args, goal_id, delegatee).await;
        let started = Instant::now();
        let result = self.dispatch_rpc(&route, tool_name, args).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        metrics::counter!("conductor_tool_calls_total", "tool" => tool_name.to_string()).increment(1);
        metrics::histogram!("conductor_tool_call_duration_ms").record(duration_ms as f64);

        match &result {
            Ok(value) => self.close_trace_ok(trace_id, value, duration_ms).await,
            Err(e) => self.close_trace_err(trace_id, e).await,
        }
        result
    }

    async fn dispatch_rpc(&self, route: &ToolRoute, tool_name: &str, args: Value) -> Result<Value, ToolCallError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": tool_name,
            "params": args,
        });

        let response = self
            .http
            .post(&route.server.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ToolCallError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolCallError::Transport(format!(
                "server '{}' returned HTTP {status}",
                route.server.name
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolCallError::MalformedResponse(e.to_string()))?;

        if let Some(error) = body.get("error") {
            return Err(ToolCallError::Server {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified server error")
                    .to_string(),
            });
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| ToolCallError::MalformedResponse("response carries neither result nor error".to_string()))
    }

    /// Trace-store failures never block a tool call.
    async fn open_trace(
        &self,
        route: &ToolRoute,
        args: &Value,
        goal_id: Option<GoalId>,
        delegatee: Option<&str>,
    ) -> Option<TraceId> {
        let (traces, goal_id, delegatee) = match (&self.traces, goal_id, delegatee) {
            (Some(traces), Some(goal_id), Some(delegatee)) => (traces, goal_id, delegatee),
            _ => return None,
        };
        let input_summary = crate::domain::cognition::truncate_summary(
            &format!("{}({})", route.tool_name, args),
            240,
        );
        match traces
            .start_trace(goal_id, delegatee, &route.server.name, &input_summary, None)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(tool = %route.tool_name, "tool-call trace open failed: {e}");
                None
            }
        }
    }

    async fn close_trace_ok(&self, trace_id: Option<TraceId>, result: &Value, duration_ms: u64) {
        let (Some(traces), Some(trace_id)) = (&self.traces, trace_id) else {
            return;
        };
        let summary = crate::domain::cognition::truncate_summary(&result.to_string(), 240);
        if let Err(e) = traces
            .complete_trace(trace_id, &summary, 0.0, duration_ms, None, None)
            .await
        {
            warn!(%trace_id, "tool-call trace close failed: {e}");
        }
    }

    async fn close_trace_err(&self, trace_id: Option<TraceId>, error: &ToolCallError) {
        let (Some(traces), Some(trace_id)) = (&self.traces, trace_id) else {
            return;
        };
        if let Err(e) = traces.fail_trace(trace_id, &error.to_string()).await {
            warn!(%trace_id, "tool-call trace close failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::capability::CapabilityToken;
    use std::collections::HashSet;

    fn actions(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn router_with_route(endpoint: &str) -> ToolRouter {
        let router = ToolRouter::new(ToolEnforcement::new());
        router.register_route(ToolRoute {
            tool_name: "crm_write".to_string(),
            server: ToolServer {
                name: "crm".to_string(),
                endpoint: endpoint.to_string(),
            },
            required_action: "write_crm".to_string(),
        });
        router
    }

    #[tokio::test]
    async fn test_unknown_tool_is_rejected() {
        let router = ToolRouter::new(ToolEnforcement::new());

        let result = router.call_tool("nope", json!({}), None, None, None).await;

        assert!(matches!(result, Err(ToolCallError::UnknownTool(_))));
    }

    #[tokio::test]
    async fn test_out_of_scope_token_fails_before_any_network_call() {
        // Endpoint is a black hole; reaching it would surface as Transport.
        let router = router_with_route("http://127.0.0.1:1/rpc");
        let token = CapabilityToken::mint(
            "scout",
            GoalId::new(),
            actions(&["read_exa"]),
            actions(&[]),
            300,
        );

        let result = router
            .call_tool("crm_write", json!({"field": "x"}), Some(&token), None, None)
            .await;

        match result {
            Err(ToolCallError::Capability(violation)) => {
                assert_eq!(violation.tool_name, "crm_write");
                assert_eq!(violation.delegatee, "scout");
                assert_eq!(violation.action, "write_crm");
            }
            other => panic!("expected capability violation, got {other:?}"),
        }
    }

    #[test]
    fn test_list_tools_is_sorted() {
        let router = ToolRouter::new(ToolEnforcement::new());
        for tool in ["web_fetch", "crm_write", "exa_search"] {
            router.register_route(ToolRoute {
                tool_name: tool.to_string(),
                server: ToolServer {
                    name: "srv".to_string(),
                    endpoint: "http://localhost:0".to_string(),
                },
                required_action: "read_web".to_string(),
            });
        }

        assert_eq!(router.list_tools(), vec!["crm_write", "exa_search", "web_fetch"]);
    }
}
