//! Agent Coordinator: permanent agents plus a capped pool of sub-agents
//!
//! The worker, planner and chat agents exist for the coordinator's whole
//! lifetime. Sub-agents are spawned on demand for one bounded subtask and
//! removed when it finishes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AgentError, AgentResult};
use crate::executor::{ExecutionResult, Executor};
use crate::goal_engine::GoalStatus;
use crate::planner::Plan;
use crate::state::SharedState;

pub const DEFAULT_MAX_SUB_AGENTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Worker,
    Planner,
    Chat,
    SubAgent,
}

impl AgentRole {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Planner => "planner",
            Self::Chat => "chat",
            Self::SubAgent => "sub_agent",
        }
    }
}

/// A lightweight coordination unit
#[derive(Debug, Clone, Serialize)]
pub struct AgentInstance {
    pub id: String,
    pub role: AgentRole,
    pub active: bool,
    pub current_task: Option<String>,
    pub parent_agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AgentInstance {
    fn permanent(role: AgentRole) -> Self {
        Self {
            id: role.as_str().to_string(),
            role,
            active: true,
            current_task: None,
            parent_agent_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Tracks agent instances and enforces the sub-agent cap
pub struct AgentCoordinator {
    agents: HashMap<String, AgentInstance>,
    max_sub_agents: usize,
}

impl AgentCoordinator {
    pub fn new(max_sub_agents: usize) -> Self {
        let agents = [AgentRole::Worker, AgentRole::Planner, AgentRole::Chat]
            .into_iter()
            .map(AgentInstance::permanent)
            .map(|a| (a.id.clone(), a))
            .collect();
        Self {
            agents,
            max_sub_agents,
        }
    }

    pub fn active_sub_agent_count(&self) -> usize {
        self.agents
            .values()
            .filter(|a| a.role == AgentRole::SubAgent && a.active)
            .count()
    }

    /// Spawn a sub-agent for `task`. Returns `Ok(None)` when the cap is
    /// reached; the request is neither queued nor retried.
    pub fn spawn_sub_agent(&mut self, parent_id: &str, task: &str) -> AgentResult<Option<String>> {
        if !self.agents.contains_key(parent_id) {
            return Err(AgentError::AgentNotFound(parent_id.to_string()));
        }
        if self.active_sub_agent_count() >= self.max_sub_agents {
            warn!(
                "Sub-agent cap reached ({}), not spawning for: {task}",
                self.max_sub_agents
            );
            return Ok(None);
        }

        let id = format!("sub-{}", Uuid::new_v4());
        self.agents.insert(
            id.clone(),
            AgentInstance {
                id: id.clone(),
                role: AgentRole::SubAgent,
                active: true,
                current_task: Some(task.to_string()),
                parent_agent_id: Some(parent_id.to_string()),
                created_at: Utc::now(),
            },
        );
        info!("Spawned sub-agent {id} (parent {parent_id}): {task}");
        Ok(Some(id))
    }

    /// Remove a sub-agent. Permanent agents cannot be terminated.
    pub fn terminate(&mut self, agent_id: &str) -> AgentResult<()> {
        let agent = self.get(agent_id)?;
        if agent.role != AgentRole::SubAgent {
            return Err(AgentError::CoreAgent(agent_id.to_string()));
        }
        self.agents.remove(agent_id);
        info!("Terminated sub-agent {agent_id}");
        Ok(())
    }

    pub fn get(&self, agent_id: &str) -> AgentResult<&AgentInstance> {
        self.agents
            .get(agent_id)
            .ok_or_else(|| AgentError::AgentNotFound(agent_id.to_string()))
    }

    /// All agents, permanent first, then sub-agents by spawn time
    pub fn list(&self) -> Vec<&AgentInstance> {
        let mut agents: Vec<&AgentInstance> = self.agents.values().collect();
        agents.sort_by(|a, b| {
            (a.role == AgentRole::SubAgent, a.created_at, &a.id)
                .cmp(&(b.role == AgentRole::SubAgent, b.created_at, &b.id))
        });
        agents
    }

    pub fn assign_task(&mut self, agent_id: &str, task: Option<String>) -> AgentResult<()> {
        let agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| AgentError::AgentNotFound(agent_id.to_string()))?;
        agent.current_task = task;
        Ok(())
    }
}

impl Default for AgentCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SUB_AGENTS)
    }
}

/// Run one plan on a fresh sub-agent in the background.
///
/// Returns `Ok(None)` when the sub-agent cap is reached. On completion the
/// task records the result, marks `goal_id` Completed if the plan succeeded,
/// and terminates the sub-agent, all under one state write lock.
pub async fn dispatch_sub_agent(
    state: &SharedState,
    executor: &Executor,
    parent_id: &str,
    plan: Plan,
    goal_id: Option<String>,
) -> AgentResult<Option<JoinHandle<ExecutionResult>>> {
    let task = format!("{}:{}", plan.plan_type, plan.action);
    let sub_id = {
        let mut s = state.write().await;
        match s.coordinator.spawn_sub_agent(parent_id, &task)? {
            Some(id) => id,
            None => return Ok(None),
        }
    };

    let executor = Arc::new(executor.for_agent(sub_id.clone()));
    let state = state.clone();
    let handle = tokio::spawn(async move {
        let result = executor.execute(&plan).await;

        let mut s = state.write().await;
        s.record_outcome(goal_id.as_deref(), &result);
        if let Some(goal_id) = goal_id.as_deref().filter(|_| result.success) {
            if let Err(e) = s.goal_engine.update_status(goal_id, GoalStatus::Completed) {
                error!("Sub-agent {sub_id} could not complete goal {goal_id}: {e}");
            }
        }
        if let Err(e) = s.coordinator.terminate(&sub_id) {
            warn!("Sub-agent {sub_id} cleanup failed: {e}");
        }
        result
    });

    Ok(Some(handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_agents_exist() {
        let coord = AgentCoordinator::default();
        let roles: Vec<AgentRole> = coord.list().iter().map(|a| a.role).collect();
        assert_eq!(roles.len(), 3);
        assert!(roles.contains(&AgentRole::Worker));
        assert!(roles.contains(&AgentRole::Planner));
        assert!(roles.contains(&AgentRole::Chat));
        assert_eq!(coord.active_sub_agent_count(), 0);
    }

    #[test]
    fn test_spawn_respects_cap() {
        let mut coord = AgentCoordinator::new(2);
        let a = coord.spawn_sub_agent("worker", "task a").unwrap();
        let b = coord.spawn_sub_agent("worker", "task b").unwrap();
        let c = coord.spawn_sub_agent("worker", "task c").unwrap();

        assert!(a.is_some());
        assert!(b.is_some());
        assert!(c.is_none());
        assert_eq!(coord.active_sub_agent_count(), 2);

        coord.terminate(&a.unwrap()).unwrap();
        assert!(coord.spawn_sub_agent("worker", "task c").unwrap().is_some());
    }

    #[test]
    fn test_spawn_unknown_parent() {
        let mut coord = AgentCoordinator::default();
        let err = coord.spawn_sub_agent("ghost", "task").unwrap_err();
        assert!(matches!(err, AgentError::AgentNotFound(_)));
    }

    #[test]
    fn test_sub_agent_fields() {
        let mut coord = AgentCoordinator::default();
        let id = coord.spawn_sub_agent("planner", "index logs").unwrap().unwrap();
        let agent = coord.get(&id).unwrap();
        assert_eq!(agent.role, AgentRole::SubAgent);
        assert_eq!(agent.parent_agent_id.as_deref(), Some("planner"));
        assert_eq!(agent.current_task.as_deref(), Some("index logs"));
        assert!(agent.active);
    }

    #[test]
    fn test_terminate() {
        let mut coord = AgentCoordinator::default();
        assert!(matches!(
            coord.terminate("worker").unwrap_err(),
            AgentError::CoreAgent(_)
        ));
        assert!(matches!(
            coord.terminate("missing").unwrap_err(),
            AgentError::AgentNotFound(_)
        ));

        let id = coord.spawn_sub_agent("worker", "t").unwrap().unwrap();
        coord.terminate(&id).unwrap();
        assert!(coord.get(&id).is_err());
    }

    #[test]
    fn test_assign_task() {
        let mut coord = AgentCoordinator::default();
        coord.assign_task("chat", Some("answer".into())).unwrap();
        assert_eq!(coord.get("chat").unwrap().current_task.as_deref(), Some("answer"));
        assert!(coord.assign_task("nobody", None).is_err());
    }
}
