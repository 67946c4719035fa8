//! Planner: turns the active goal and recent history into an action plan
//!
//! Two strategies share one capability (`PlanStrategy`):
//! - `RuleBasedPlanner`: deterministic, always available
//! - `DelegatedPlanner`: hands the context to an external `Reasoner` and falls
//!   back to the rule-based strategy whenever the reasoner is missing, fails,
//!   or declines to plan
//!
//! The strategy is picked once, at construction.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::goal_engine::{Goal, NewGoal};
use crate::metacognition::Evaluation;

/// Kind of action a plan asks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PlanType {
    Think,
    ToolCall,
    CreateGoal,
    StartGoal,
    /// Anything else; executed as a no-op
    Other(String),
}

impl PlanType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Think => "think",
            Self::ToolCall => "tool_call",
            Self::CreateGoal => "create_goal",
            Self::StartGoal => "start_goal",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for PlanType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "think" => Self::Think,
            "tool_call" => Self::ToolCall,
            "create_goal" => Self::CreateGoal,
            "start_goal" => Self::StartGoal,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for PlanType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<PlanType> for String {
    fn from(t: PlanType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured action proposal for the active goal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    #[serde(rename = "type")]
    pub plan_type: PlanType,
    /// For `tool_call` plans this is the tool name
    pub action: String,
    pub parameters: Option<Map<String, Value>>,
    pub reasoning: String,
    /// Set by the planner when the active goal's criteria are judged satisfied
    #[serde(default)]
    pub completes_goal: bool,
    pub timestamp: DateTime<Utc>,
}

impl Plan {
    pub fn new(plan_type: impl Into<PlanType>, action: impl Into<String>) -> Self {
        Self {
            plan_type: plan_type.into(),
            action: action.into(),
            parameters: None,
            reasoning: String::new(),
            completes_goal: false,
            timestamp: Utc::now(),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters.as_object().cloned();
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn completing_goal(mut self) -> Self {
        self.completes_goal = true;
        self
    }

    /// A string parameter, if present
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters
            .as_ref()
            .and_then(|p| p.get(key))
            .and_then(Value::as_str)
    }
}

/// Everything a strategy may look at when planning
#[derive(Debug, Clone, Default)]
pub struct PlanContext {
    pub active_goal: Option<Goal>,
    /// Recent actions, oldest first
    pub memory_context: Vec<String>,
    /// Evaluation of the previous cycle
    pub feedback: Option<Evaluation>,
    /// External event that triggered this cycle, if any
    pub event: Option<String>,
}

/// A planning strategy
#[async_trait]
pub trait PlanStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Build a plan for `context.active_goal`; `Ok(None)` means nothing to do
    async fn plan_from_context(&self, context: &PlanContext) -> Result<Option<Plan>>;

    /// Propose sub-goals for a goal; may legitimately be empty
    async fn decompose_goal(&self, goal: &Goal) -> Result<Vec<NewGoal>>;
}

/// An external reasoner (e.g. a language model) used by `DelegatedPlanner`
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn reason(&self, context: &PlanContext) -> Result<Option<Plan>>;

    async fn decompose(&self, goal: &Goal) -> Result<Vec<NewGoal>>;
}

/// Deterministic planner: always analyses the active goal
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedPlanner;

impl RuleBasedPlanner {
    pub fn plan(&self, context: &PlanContext) -> Option<Plan> {
        let goal = context.active_goal.as_ref()?;

        let mut reasoning = format!("Rule-based planning: analyzing goal '{}'", goal.description);
        if let Some(feedback) = &context.feedback {
            if !feedback.issues_detected.is_empty() {
                reasoning.push_str(&format!(
                    "; previous cycle reported {} issue(s)",
                    feedback.issues_detected.len()
                ));
            }
        }
        if let Some(event) = &context.event {
            reasoning.push_str(&format!("; triggered by event '{event}'"));
        }

        Some(
            Plan::new(PlanType::Think, "analyze_goal")
                .with_parameters(serde_json::json!({
                    "goal_id": goal.id,
                    "description": goal.description,
                    "completion_criteria": goal.completion_criteria,
                    "recent_actions": context.memory_context.len(),
                }))
                .with_reasoning(reasoning),
        )
    }
}

#[async_trait]
impl PlanStrategy for RuleBasedPlanner {
    fn name(&self) -> &str {
        "rule_based"
    }

    async fn plan_from_context(&self, context: &PlanContext) -> Result<Option<Plan>> {
        Ok(self.plan(context))
    }

    async fn decompose_goal(&self, goal: &Goal) -> Result<Vec<NewGoal>> {
        debug!("Rule-based planner does not decompose goal {}", goal.id);
        Ok(Vec::new())
    }
}

/// Planner that delegates to an external reasoner
pub struct DelegatedPlanner {
    reasoner: Option<Arc<dyn Reasoner>>,
    fallback: RuleBasedPlanner,
}

impl DelegatedPlanner {
    pub fn new(reasoner: Option<Arc<dyn Reasoner>>) -> Self {
        Self {
            reasoner,
            fallback: RuleBasedPlanner,
        }
    }
}

#[async_trait]
impl PlanStrategy for DelegatedPlanner {
    fn name(&self) -> &str {
        "delegated"
    }

    async fn plan_from_context(&self, context: &PlanContext) -> Result<Option<Plan>> {
        let Some(reasoner) = &self.reasoner else {
            debug!("No reasoner wired, using rule-based fallback");
            return Ok(self.fallback.plan(context));
        };

        match reasoner.reason(context).await {
            Ok(Some(plan)) => Ok(Some(plan)),
            Ok(None) => Ok(self.fallback.plan(context)),
            Err(e) => {
                warn!("Reasoner failed, using rule-based fallback: {e}");
                Ok(self.fallback.plan(context))
            }
        }
    }

    async fn decompose_goal(&self, goal: &Goal) -> Result<Vec<NewGoal>> {
        match &self.reasoner {
            Some(reasoner) => reasoner.decompose(goal).await,
            None => Ok(Vec::new()),
        }
    }
}

/// Front door used by the cognitive loop
pub struct Planner {
    strategy: Arc<dyn PlanStrategy>,
}

impl Planner {
    pub fn new(strategy: Arc<dyn PlanStrategy>) -> Self {
        Self { strategy }
    }

    pub fn rule_based() -> Self {
        Self::new(Arc::new(RuleBasedPlanner))
    }

    pub fn planner_type(&self) -> &str {
        self.strategy.name()
    }

    /// Plan for the active goal; `None` when there is no active goal or the
    /// strategy has nothing to propose.
    pub async fn create_plan(&self, context: &PlanContext) -> Option<Plan> {
        if context.active_goal.is_none() {
            return None;
        }
        match self.strategy.plan_from_context(context).await {
            Ok(plan) => {
                if let Some(plan) = &plan {
                    debug!(
                        "Plan created: {}:{} ({})",
                        plan.plan_type, plan.action, plan.reasoning
                    );
                }
                plan
            }
            Err(e) => {
                error!("Planning failed: {e}");
                None
            }
        }
    }

    pub async fn decompose_goal(&self, goal: &Goal) -> Result<Vec<NewGoal>> {
        self.strategy.decompose_goal(goal).await
    }

    /// Fraction of the required fields (`type`, `action`, `parameters`) present
    pub fn evaluate_plan_quality(plan: &Plan) -> f64 {
        let present = [
            !plan.plan_type.as_str().is_empty(),
            !plan.action.is_empty(),
            plan.parameters.is_some(),
        ];
        present.iter().filter(|p| **p).count() as f64 / present.len() as f64
    }
}
