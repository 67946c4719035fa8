//! Cognitive Loop: select → plan → execute → evaluate
//!
//! One cycle per tick, strictly sequential: one active goal, one plan and one
//! execution in flight. The state lock is never held across the planner or
//! the executor, so the management console stays responsive while a tool runs.
//!
//! Cancellation is observed between cycles only; a cycle that has started
//! always runs to completion.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::AgentRole;
use crate::error::AgentResult;
use crate::executor::{ExecutionResult, Executor};
use crate::goal_engine::{GoalMode, GoalStatus, NewGoal};
use crate::metacognition::Evaluation;
use crate::planner::{Plan, PlanContext, PlanType, Planner};
use crate::state::{AgentState, SharedState};

/// The permanent agent whose current task mirrors the active goal
const WORKER: &str = AgentRole::Worker.as_str();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Selecting,
    Planning,
    Executing,
    Evaluating,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub tick_interval: Duration,
    /// How many recent actions the planner sees
    pub memory_context_size: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1000),
            memory_context_size: 10,
        }
    }
}

/// What one completed cycle did
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub goal_id: String,
    pub plan: Plan,
    pub result: ExecutionResult,
    pub evaluation: Evaluation,
    /// The active goal was marked Completed by this cycle
    pub goal_completed: bool,
}

pub struct CognitiveLoop {
    state: SharedState,
    planner: Arc<Planner>,
    executor: Arc<Executor>,
    config: LoopConfig,
    phase: LoopState,
}

impl CognitiveLoop {
    pub fn new(
        state: SharedState,
        planner: Arc<Planner>,
        executor: Arc<Executor>,
        config: LoopConfig,
    ) -> Self {
        Self {
            state,
            planner,
            executor,
            config,
            phase: LoopState::Idle,
        }
    }

    pub fn phase(&self) -> LoopState {
        self.phase
    }

    /// Run until `cancel` fires. Tick errors are logged and the loop carries on.
    pub async fn run(&mut self, cancel: CancellationToken) {
        self.state.write().await.initialized = true;
        info!(
            "Cognitive loop started (tick={}ms, planner={})",
            self.config.tick_interval.as_millis(),
            self.planner.planner_type()
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Cognitive loop shutting down gracefully");
                    break;
                }
                _ = tokio::time::sleep(self.config.tick_interval) => {
                    if let Err(e) = self.tick().await {
                        error!("Cognitive loop tick error: {e}");
                        self.phase = LoopState::Idle;
                    }
                }
            }
        }

        self.phase = LoopState::Stopped;
        info!("Cognitive loop stopped");
    }

    /// Run exactly one cycle. `Ok(None)` means there was nothing to do.
    pub async fn tick(&mut self) -> AgentResult<Option<CycleOutcome>> {
        self.phase = LoopState::Selecting;
        let Some(Selection {
            goal_id,
            context,
            promoted,
        }) = self.select().await?
        else {
            self.phase = LoopState::Idle;
            return Ok(None);
        };

        self.phase = LoopState::Planning;
        if promoted {
            self.decompose(&context).await?;
        }
        let Some(plan) = self.planner.create_plan(&context).await else {
            debug!("Planner produced nothing for goal {goal_id}");
            self.phase = LoopState::Idle;
            return Ok(None);
        };
        debug!(
            "Plan quality for {}: {:.2}",
            plan.action,
            Planner::evaluate_plan_quality(&plan)
        );

        self.phase = LoopState::Executing;
        let result = self.executor.execute(&plan).await;

        self.phase = LoopState::Evaluating;
        let outcome = {
            let mut state = self.state.write().await;
            let evaluation = state.record_outcome(Some(&goal_id), &result);
            for issue in &evaluation.issues_detected {
                warn!(
                    "Issue detected: {:?} on {} (count {})",
                    issue.kind, issue.subject, issue.count
                );
            }
            state.last_evaluation = Some(evaluation.clone());
            if !result.success {
                warn!(
                    "{} failed; {:.0}% of recent {} actions succeeded",
                    result.action,
                    state.history.success_rate(&result.action_type) * 100.0,
                    result.action_type
                );
            }

            let goal_completed = if result.success {
                apply_directives(&mut state, &goal_id, &plan)?
            } else {
                false
            };

            CycleOutcome {
                goal_id,
                plan,
                result,
                evaluation,
                goal_completed,
            }
        };

        self.phase = LoopState::Idle;
        Ok(Some(outcome))
    }

    /// Confirm the active goal or promote the next pending one, then build the
    /// planning context
    async fn select(&self) -> AgentResult<Option<Selection>> {
        let mut state = self.state.write().await;

        let still_active = state
            .goal_engine
            .active_goal()
            .map(|g| (g.id.clone(), g.status == GoalStatus::InProgress));
        if let Some((id, false)) = still_active {
            debug!("Active goal {id} is no longer in progress");
            state.goal_engine.clear_active()?;
        }

        let mut promoted = false;
        if state.goal_engine.active_goal().is_none() {
            let next = state
                .scheduler
                .get_next(&state.goal_engine)
                .map(|g| g.id.clone());
            match next {
                Some(id) => {
                    state.goal_engine.set_active(&id)?;
                    promoted = true;
                }
                None => {
                    state.coordinator.assign_task(WORKER, None)?;
                    return Ok(None);
                }
            }
        }

        let Some(goal) = state.goal_engine.active_goal().cloned() else {
            return Ok(None);
        };
        state
            .coordinator
            .assign_task(WORKER, Some(goal.description.clone()))?;
        let context = PlanContext {
            memory_context: state.history.memory_context(self.config.memory_context_size),
            feedback: state.last_evaluation.clone(),
            event: state.pending_events.pop_front(),
            active_goal: Some(goal.clone()),
        };
        Ok(Some(Selection {
            goal_id: goal.id,
            context,
            promoted,
        }))
    }

    /// Ask the planner to split a freshly promoted leaf goal into sub-goals.
    /// Decomposition failures are logged; the goal is still worked on directly.
    async fn decompose(&self, context: &PlanContext) -> AgentResult<()> {
        let Some(goal) = context.active_goal.as_ref().filter(|g| g.sub_goals.is_empty()) else {
            return Ok(());
        };
        let sub_goals = match self.planner.decompose_goal(goal).await {
            Ok(sub_goals) => sub_goals,
            Err(e) => {
                warn!("Decomposition of goal {} failed: {e}", goal.id);
                return Ok(());
            }
        };
        if sub_goals.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        for sub_goal in sub_goals {
            state.goal_engine.create(sub_goal.with_parent(goal.id.clone()))?;
        }
        info!(
            "Goal {} decomposed into {} sub-goals",
            goal.id,
            state.goal_engine.get(&goal.id)?.sub_goals.len()
        );
        Ok(())
    }
}

struct Selection {
    goal_id: String,
    context: PlanContext,
    /// The goal was promoted from pending during this selection
    promoted: bool,
}

/// Apply goal mutations requested by a successful plan. Bad directive
/// parameters are logged, not fatal. Returns true if the active goal was
/// completed.
fn apply_directives(state: &mut AgentState, goal_id: &str, plan: &Plan) -> AgentResult<bool> {
    match plan.plan_type {
        PlanType::CreateGoal => {
            let new_goal = goal_from_plan(plan, goal_id, state);
            match state.goal_engine.create(new_goal) {
                Ok(goal) => info!("Plan created sub-goal {} under {goal_id}", goal.id),
                Err(e) if e.is_not_found() => warn!("create_goal directive ignored: {e}"),
                Err(e) => return Err(e),
            }
        }
        PlanType::StartGoal => match plan.param_str("goal_id") {
            Some(target) => match state.goal_engine.set_active(target) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => warn!("start_goal directive ignored: {e}"),
                Err(e) => return Err(e),
            },
            None => warn!("start_goal plan without goal_id parameter"),
        },
        _ => {}
    }

    if !plan.completes_goal {
        return Ok(false);
    }
    if state.goal_engine.get(goal_id)?.mode == GoalMode::Continuous {
        debug!("Goal {goal_id} is continuous, staying in progress");
        return Ok(false);
    }
    state.goal_engine.update_status(goal_id, GoalStatus::Completed)?;
    if state.goal_engine.active_goal().map(|g| g.id.as_str()) == Some(goal_id) {
        state.goal_engine.clear_active()?;
    }
    info!("Goal {goal_id} completed");
    Ok(true)
}

fn goal_from_plan(plan: &Plan, parent_id: &str, state: &AgentState) -> NewGoal {
    let params = plan.parameters.clone().unwrap_or_default();
    let description = plan.param_str("description").unwrap_or(&plan.action);
    let priority = params
        .get("priority")
        .and_then(Value::as_i64)
        .and_then(|p| i32::try_from(p).ok())
        .or_else(|| state.goal_engine.get(parent_id).ok().map(|g| g.priority))
        .unwrap_or_default();

    let mut new_goal = NewGoal::new(description, priority).with_parent(parent_id);
    if plan.param_str("mode") == Some("continuous") {
        new_goal = new_goal.continuous();
    }
    if let Some(criteria) = params.get("completion_criteria").and_then(Value::as_array) {
        new_goal = new_goal.with_criteria(criteria.iter().filter_map(Value::as_str));
    }
    new_goal
}
