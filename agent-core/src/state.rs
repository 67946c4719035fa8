//! Shared agent state: everything the loop, sub-agents and the management
//! console read or mutate, behind one `RwLock`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::coordinator::AgentCoordinator;
use crate::executor::ExecutionResult;
use crate::goal_engine::{GoalEngine, GoalStatus, GoalsSummary};
use crate::history::{ActionHistory, ActionRecord};
use crate::metacognition::{Evaluation, MetaCognitionMonitor};
use crate::persistence::Persistence;
use crate::scheduler::GoalScheduler;

/// Upper bound on queued external events; oldest are dropped first
const MAX_PENDING_EVENTS: usize = 64;

pub type SharedState = Arc<RwLock<AgentState>>;

/// Short view of a goal for status snapshots
#[derive(Debug, Clone, Serialize)]
pub struct GoalSummary {
    pub id: String,
    pub description: String,
    pub status: GoalStatus,
    pub priority: i32,
}

/// Outward status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub agent_id: String,
    pub initialized: bool,
    pub goals_summary: GoalsSummary,
    pub active_goal: Option<GoalSummary>,
    pub planner_type: String,
    pub active_sub_agents: usize,
    pub started_at: DateTime<Utc>,
}

pub struct AgentState {
    pub agent_id: String,
    pub goal_engine: GoalEngine,
    pub scheduler: GoalScheduler,
    pub monitor: MetaCognitionMonitor,
    pub history: ActionHistory,
    pub coordinator: AgentCoordinator,
    pub store: Option<Arc<dyn Persistence>>,
    pub planner_type: String,
    /// Evaluation of the most recent cycle, fed back to the planner
    pub last_evaluation: Option<Evaluation>,
    pub pending_events: VecDeque<String>,
    pub started_at: DateTime<Utc>,
    pub initialized: bool,
}

impl AgentState {
    pub fn new(
        agent_id: impl Into<String>,
        goal_engine: GoalEngine,
        monitor: MetaCognitionMonitor,
        coordinator: AgentCoordinator,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            goal_engine,
            scheduler: GoalScheduler::default(),
            monitor,
            history: ActionHistory::new(1000),
            coordinator,
            store: None,
            planner_type: "rule_based".to_string(),
            last_evaluation: None,
            pending_events: VecDeque::new(),
            started_at: Utc::now(),
            initialized: false,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn Persistence>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_planner_type(mut self, planner_type: impl Into<String>) -> Self {
        self.planner_type = planner_type.into();
        self
    }

    pub fn with_history(mut self, history: ActionHistory) -> Self {
        self.history = history;
        self
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    /// Queue an external event for the next cycle
    pub fn push_event(&mut self, event: impl Into<String>) {
        let event = event.into();
        debug!("Event queued: {event}");
        self.pending_events.push_back(event);
        while self.pending_events.len() > MAX_PENDING_EVENTS {
            self.pending_events.pop_front();
        }
    }

    /// Feed a result to the monitor and the action history (and persistence,
    /// best effort). Returns the monitor's evaluation.
    pub fn record_outcome(&mut self, goal_id: Option<&str>, result: &ExecutionResult) -> Evaluation {
        let evaluation = self.monitor.evaluate(result);
        let record = ActionRecord::from_result(goal_id, result);
        if let Some(store) = &self.store {
            if let Err(e) = store.record_action(&self.agent_id, &record) {
                warn!("Failed to persist action {}: {e}", record.id);
            }
        }
        self.history.record(record);
        evaluation
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            agent_id: self.agent_id.clone(),
            initialized: self.initialized,
            goals_summary: self.goal_engine.summary(),
            active_goal: self.goal_engine.active_goal().map(|g| GoalSummary {
                id: g.id.clone(),
                description: g.description.clone(),
                status: g.status,
                priority: g.priority,
            }),
            planner_type: self.planner_type.clone(),
            active_sub_agents: self.coordinator.active_sub_agent_count(),
            started_at: self.started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionOutput;
    use crate::goal_engine::NewGoal;
    use crate::persistence::SqliteStore;

    fn state() -> AgentState {
        AgentState::new(
            "test-agent",
            GoalEngine::new(),
            MetaCognitionMonitor::default(),
            AgentCoordinator::default(),
        )
    }

    fn result(success: bool) -> ExecutionResult {
        ExecutionResult {
            action_type: "think".into(),
            action: "analyze_goal".into(),
            timestamp: Utc::now(),
            success,
            output: ExecutionOutput::Empty,
            error: (!success).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn test_status_snapshot() {
        let mut s = state();
        let goal = s.goal_engine.create(NewGoal::new("demo", 5)).unwrap();
        s.goal_engine.set_active(&goal.id).unwrap();

        let snapshot = s.status();
        assert!(!snapshot.initialized);
        assert_eq!(snapshot.goals_summary.total, 1);
        assert_eq!(snapshot.goals_summary.by_status["in_progress"], 1);
        assert_eq!(snapshot.active_goal.unwrap().id, goal.id);
        assert_eq!(snapshot.planner_type, "rule_based");
    }

    #[test]
    fn test_push_event_is_bounded() {
        let mut s = state();
        for i in 0..(MAX_PENDING_EVENTS + 5) {
            s.push_event(format!("e{i}"));
        }
        assert_eq!(s.pending_events.len(), MAX_PENDING_EVENTS);
        assert_eq!(s.pending_events.front().map(String::as_str), Some("e5"));
    }

    #[test]
    fn test_record_outcome_feeds_monitor_history_and_store() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut s = state().with_store(store.clone());

        let evaluation = s.record_outcome(Some("g1"), &result(true));
        assert_eq!(evaluation.success_rate, 1.0);
        s.record_outcome(Some("g1"), &result(false));

        assert_eq!(s.history.len(), 2);
        assert_eq!(s.monitor.window_len(), 2);
        let persisted = store.recent_actions("test-agent", 10).unwrap();
        assert_eq!(persisted.len(), 2);
        assert!(!persisted[0].success);
    }
}
