//! Plan execution pipeline
//!
//! Pipeline for tool calls: availability → policy → rate limit → invoke → metrics.
//! Every outcome is returned as an `ExecutionResult`; nothing raised by a
//! tool escapes this module.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::metrics::{ExecutionStatus, MetricsSink};
use crate::planner::{Plan, PlanType};
use crate::policy::{ActionContext, PolicyCheck};
use crate::rate_limit::RateLimiter;
use crate::tools::ToolExecutor;

/// Typed payload of an execution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutput {
    Analysis {
        analysis: String,
    },
    ToolResult {
        tool: String,
        result: Option<Value>,
    },
    /// The call was deferred by the rate limiter and never attempted
    RateLimited {
        tool: String,
    },
    /// The policy gate blocked the call
    PolicyDenied {
        tool: String,
        requires_confirmation: bool,
        reason: Option<String>,
    },
    /// Goal directive acknowledged; the caller applies it
    Acknowledged {
        message: String,
        parameters: Map<String, Value>,
    },
    UnknownAction {
        message: String,
    },
    Empty,
}

impl ExecutionOutput {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_policy_denied(&self) -> bool {
        matches!(self, Self::PolicyDenied { .. })
    }

    /// Short human-readable summary for history and logs
    pub fn summary(&self) -> String {
        match self {
            Self::Analysis { analysis } => analysis.clone(),
            Self::ToolResult { tool, .. } => format!("{tool} returned"),
            Self::RateLimited { tool } => format!("{tool} rate limited"),
            Self::PolicyDenied { tool, reason, .. } => format!(
                "{tool} denied: {}",
                reason.as_deref().unwrap_or("policy")
            ),
            Self::Acknowledged { message, .. } => message.clone(),
            Self::UnknownAction { message } => message.clone(),
            Self::Empty => String::new(),
        }
    }
}

/// Normalised result envelope of a plan execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub action_type: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub output: ExecutionOutput,
    pub error: Option<String>,
}

impl ExecutionResult {
    fn succeeded(plan: &Plan, output: ExecutionOutput) -> Self {
        Self {
            action_type: plan.plan_type.to_string(),
            action: plan.action.clone(),
            timestamp: Utc::now(),
            success: true,
            output,
            error: None,
        }
    }

    fn failed(plan: &Plan, error: impl Into<String>) -> Self {
        Self {
            action_type: plan.plan_type.to_string(),
            action: plan.action.clone(),
            timestamp: Utc::now(),
            success: false,
            output: ExecutionOutput::Empty,
            error: Some(error.into()),
        }
    }
}

/// Runs plans against the injected collaborators
pub struct Executor {
    agent_id: String,
    tools: Option<Arc<dyn ToolExecutor>>,
    rate_limiter: Arc<RateLimiter>,
    policy: Option<Arc<dyn PolicyCheck>>,
    metrics: Arc<dyn MetricsSink>,
}

impl Executor {
    pub fn new(
        agent_id: impl Into<String>,
        rate_limiter: Arc<RateLimiter>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            tools: None,
            rate_limiter,
            policy: None,
            metrics,
        }
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn PolicyCheck>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Same collaborators, different agent identity (used for sub-agents so
    /// they draw from their own agent bucket in the shared limiter)
    pub fn for_agent(&self, agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            tools: self.tools.clone(),
            rate_limiter: self.rate_limiter.clone(),
            policy: self.policy.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Execute one plan. Never fails: errors become `success: false` results.
    pub async fn execute(&self, plan: &Plan) -> ExecutionResult {
        match &plan.plan_type {
            PlanType::Think => self.think(plan),
            PlanType::ToolCall => self.tool_call(plan).await,
            PlanType::CreateGoal => ExecutionResult::succeeded(
                plan,
                ExecutionOutput::Acknowledged {
                    message: format!(
                        "Goal creation requested: {}",
                        plan.param_str("description").unwrap_or(&plan.action)
                    ),
                    parameters: plan.parameters.clone().unwrap_or_default(),
                },
            ),
            PlanType::StartGoal => ExecutionResult::succeeded(
                plan,
                ExecutionOutput::Acknowledged {
                    message: format!(
                        "Goal start requested: {}",
                        plan.param_str("goal_id").unwrap_or(&plan.action)
                    ),
                    parameters: plan.parameters.clone().unwrap_or_default(),
                },
            ),
            PlanType::Other(kind) => {
                warn!("Unknown action type '{kind}', skipping");
                self.metrics.increment("unknown_plan_type");
                ExecutionResult::succeeded(
                    plan,
                    ExecutionOutput::UnknownAction {
                        message: format!("Unknown action type: {kind}"),
                    },
                )
            }
        }
    }

    fn think(&self, plan: &Plan) -> ExecutionResult {
        let mut analysis = format!("Analysis of '{}'", plan.action);
        if let Some(description) = plan.param_str("description") {
            analysis.push_str(&format!(": {description}"));
        }
        if !plan.reasoning.is_empty() {
            analysis.push_str(&format!(" ({})", plan.reasoning));
        }
        debug!("{analysis}");
        ExecutionResult::succeeded(plan, ExecutionOutput::Analysis { analysis })
    }

    async fn tool_call(&self, plan: &Plan) -> ExecutionResult {
        let tool_name = plan.action.as_str();
        let parameters = plan.parameters.clone().unwrap_or_default();
        let start = Instant::now();

        // 1. Availability
        let Some(tools) = &self.tools else {
            warn!("No tool server available for {tool_name}");
            self.metrics
                .record_execution(start.elapsed(), tool_name, ExecutionStatus::Unavailable);
            return ExecutionResult::failed(plan, "Tool server unavailable");
        };

        // 2. Policy gate
        if let Some(policy) = &self.policy {
            let decision = policy
                .check(&ActionContext {
                    agent_id: self.agent_id.clone(),
                    action_type: plan.plan_type.to_string(),
                    action: tool_name.to_string(),
                    parameters: parameters.clone(),
                })
                .await;
            if !decision.permits_unattended() {
                info!(
                    "Policy blocked {tool_name} (confirmation required: {})",
                    decision.requires_confirmation
                );
                self.metrics.increment("policy_denied");
                return ExecutionResult::succeeded(
                    plan,
                    ExecutionOutput::PolicyDenied {
                        tool: tool_name.to_string(),
                        requires_confirmation: decision.requires_confirmation,
                        reason: decision.reason,
                    },
                );
            }
        }

        // 3. Rate limiting
        if !self.rate_limiter.check(&self.agent_id, tool_name) {
            warn!("Rate limited: agent={} tool={tool_name}", self.agent_id);
            self.metrics.increment("rate_limited");
            return ExecutionResult::succeeded(
                plan,
                ExecutionOutput::RateLimited {
                    tool: tool_name.to_string(),
                },
            );
        }

        // 4. Invoke
        info!("Executing: agent={} tool={tool_name}", self.agent_id);
        let result = match tools.call(tool_name, &parameters).await {
            Ok(response) if response.success => ExecutionResult::succeeded(
                plan,
                ExecutionOutput::ToolResult {
                    tool: tool_name.to_string(),
                    result: response.result,
                },
            ),
            Ok(response) => ExecutionResult::failed(
                plan,
                response
                    .error
                    .unwrap_or_else(|| format!("{tool_name} failed")),
            ),
            Err(e) => ExecutionResult::failed(plan, e.to_string()),
        };

        // 5. Metrics
        let status = if result.success {
            ExecutionStatus::Success
        } else {
            warn!(
                "Tool {tool_name} failed: {}",
                result.error.as_deref().unwrap_or_default()
            );
            ExecutionStatus::Error
        };
        self.metrics
            .record_execution(start.elapsed(), tool_name, status);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ExecutionMetrics;
    use crate::policy::RulePolicy;
    use crate::tools::{ToolRegistry, ToolResponse};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and answers with a fixed outcome
    struct SpyTools {
        calls: AtomicUsize,
        outcome: Result<ToolResponse, String>,
    }

    impl SpyTools {
        fn returning(outcome: Result<ToolResponse, String>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                outcome,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ToolExecutor for SpyTools {
        async fn call(&self, _tool: &str, _params: &Map<String, Value>) -> Result<ToolResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn executor(limiter: RateLimiter) -> (Executor, Arc<ExecutionMetrics>) {
        let metrics = Arc::new(ExecutionMetrics::new());
        (
            Executor::new("worker", Arc::new(limiter), metrics.clone()),
            metrics,
        )
    }

    fn open_limiter() -> RateLimiter {
        RateLimiter::new(100.0, 100.0)
    }

    #[tokio::test]
    async fn test_think_without_tool_server() {
        let (exec, _) = executor(open_limiter());
        let result = exec.execute(&Plan::new(PlanType::Think, "x")).await;

        assert!(result.success);
        assert_eq!(result.action_type, "think");
        match &result.output {
            ExecutionOutput::Analysis { analysis } => assert!(analysis.contains("'x'")),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tool_call_success() {
        let spy = SpyTools::returning(Ok(ToolResponse::ok(serde_json::json!({"up": true}))));
        let (exec, metrics) = executor(open_limiter());
        let exec = exec.with_tools(spy.clone());

        let plan = Plan::new(PlanType::ToolCall, "system.status").with_parameters(serde_json::json!({}));
        let result = exec.execute(&plan).await;

        assert!(result.success);
        assert_eq!(spy.calls(), 1);
        assert_eq!(
            result.output,
            ExecutionOutput::ToolResult {
                tool: "system.status".into(),
                result: Some(serde_json::json!({"up": true})),
            }
        );
        assert_eq!(metrics.executions("system.status", ExecutionStatus::Success), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_call_is_never_attempted() {
        let spy = SpyTools::returning(Ok(ToolResponse::ok(Value::Null)));
        let (exec, metrics) = executor(RateLimiter::new(0.0, 0.0));
        let exec = exec.with_tools(spy.clone());

        let result = exec.execute(&Plan::new(PlanType::ToolCall, "system.echo")).await;

        assert!(result.success);
        assert!(result.output.is_rate_limited());
        assert_eq!(spy.calls(), 0);
        assert_eq!(metrics.counter("rate_limited"), 1);
    }

    #[tokio::test]
    async fn test_tool_error_becomes_failed_result() {
        let spy = SpyTools::returning(Err("connection reset".into()));
        let (exec, metrics) = executor(open_limiter());
        let exec = exec.with_tools(spy.clone());

        let result = exec.execute(&Plan::new(PlanType::ToolCall, "net.ping")).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("connection reset"));
        assert_eq!(metrics.executions("net.ping", ExecutionStatus::Error), 1);
    }

    #[tokio::test]
    async fn test_unsuccessful_tool_response_becomes_failed_result() {
        let spy = SpyTools::returning(Ok(ToolResponse::failed("permission denied")));
        let (exec, _) = executor(open_limiter());
        let exec = exec.with_tools(spy);

        let result = exec.execute(&Plan::new(PlanType::ToolCall, "fs.read")).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("permission denied"));
    }

    #[tokio::test]
    async fn test_tool_call_without_tool_server() {
        let (exec, metrics) = executor(open_limiter());
        let result = exec.execute(&Plan::new(PlanType::ToolCall, "system.echo")).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("unavailable"));
        assert_eq!(metrics.executions("system.echo", ExecutionStatus::Unavailable), 1);
    }

    #[tokio::test]
    async fn test_policy_denial_skips_invocation() {
        let spy = SpyTools::returning(Ok(ToolResponse::ok(Value::Null)));
        let (exec, metrics) = executor(open_limiter());
        let exec = exec
            .with_tools(spy.clone())
            .with_policy(Arc::new(RulePolicy::new(vec!["fs.*".into()], vec![])));

        let result = exec.execute(&Plan::new(PlanType::ToolCall, "fs.delete")).await;

        assert!(result.success);
        assert!(result.output.is_policy_denied());
        assert_eq!(spy.calls(), 0);
        assert_eq!(metrics.counter("policy_denied"), 1);
    }

    #[tokio::test]
    async fn test_confirmation_required_is_treated_as_denied() {
        let spy = SpyTools::returning(Ok(ToolResponse::ok(Value::Null)));
        let (exec, _) = executor(open_limiter());
        let exec = exec
            .with_tools(spy.clone())
            .with_policy(Arc::new(RulePolicy::new(vec![], vec!["pkg.install".into()])));

        let result = exec.execute(&Plan::new(PlanType::ToolCall, "pkg.install")).await;
        match result.output {
            ExecutionOutput::PolicyDenied {
                requires_confirmation,
                ..
            } => assert!(requires_confirmation),
            other => panic!("unexpected output: {other:?}"),
        }
        assert_eq!(spy.calls(), 0);
    }

    #[tokio::test]
    async fn test_goal_directives_are_acknowledged_only() {
        let (exec, _) = executor(open_limiter());

        let create = Plan::new(PlanType::CreateGoal, "create")
            .with_parameters(serde_json::json!({"description": "sub task"}));
        let result = exec.execute(&create).await;
        assert!(result.success);
        assert!(result.output.summary().contains("sub task"));

        let start = Plan::new(PlanType::StartGoal, "start")
            .with_parameters(serde_json::json!({"goal_id": "g-42"}));
        let result = exec.execute(&start).await;
        assert!(result.success);
        assert!(result.output.summary().contains("g-42"));
    }

    #[tokio::test]
    async fn test_unknown_plan_type_is_a_successful_no_op() {
        let (exec, metrics) = executor(open_limiter());
        let result = exec.execute(&Plan::new("dance", "wiggle")).await;

        assert!(result.success);
        assert_eq!(result.action_type, "dance");
        assert!(result.output.summary().contains("Unknown action type"));
        assert_eq!(metrics.counter("unknown_plan_type"), 1);
    }

    #[tokio::test]
    async fn test_with_registry() {
        let (exec, _) = executor(open_limiter());
        let exec = exec.with_tools(Arc::new(ToolRegistry::with_builtins()));

        let plan = Plan::new(PlanType::ToolCall, "system.echo")
            .with_parameters(serde_json::json!({"ping": "pong"}));
        let result = exec.execute(&plan).await;
        match result.output {
            ExecutionOutput::ToolResult { result: Some(v), .. } => assert_eq!(v["ping"], "pong"),
            other => panic!("unexpected output: {other:?}"),
        }
    }
}
