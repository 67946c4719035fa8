//! Goal Engine: owns the goal graph and its lifecycle
//!
//! Goals flow through: Pending → InProgress → Completed/Failed (or Blocked),
//! but any status may be set from any other; higher-level logic decides which
//! transitions are meaningful.
//!
//! Storage: HashMap in-memory cache + optional write-through persistence.
//! When a store is attached, every mutation is written before the cache is
//! touched, so goals survive restarts and a failed write changes nothing.
//! Writes that touch several records (a child and its parent, a goal and the
//! active pointer) go to the store as one atomic call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AgentError, AgentResult};
use crate::persistence::Persistence;

/// How a goal finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalMode {
    /// Reaches a terminal state once its work is done
    #[serde(alias = "goal_oriented")]
    OneTime,
    /// Ongoing monitoring-style work; never considered complete
    Continuous,
}

impl GoalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneTime => "one_time",
            Self::Continuous => "continuous",
        }
    }
}

impl FromStr for GoalMode {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one_time" | "goal_oriented" => Ok(Self::OneTime),
            "continuous" => Ok(Self::Continuous),
            other => Err(AgentError::InvalidMode(other.to_string())),
        }
    }
}

/// Goal lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

impl GoalStatus {
    pub const ALL: [GoalStatus; 5] = [
        Self::Pending,
        Self::InProgress,
        Self::Completed,
        Self::Failed,
        Self::Blocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }
}

impl FromStr for GoalStatus {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "blocked" => Ok(Self::Blocked),
            other => Err(AgentError::InvalidStatus(other.to_string())),
        }
    }
}

/// A unit of work with priority, status and an optional place in a hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub description: String,
    pub mode: GoalMode,
    pub status: GoalStatus,
    /// Higher is more urgent
    pub priority: i32,
    pub parent_id: Option<String>,
    /// Child ids in creation order
    pub sub_goals: Vec<String>,
    /// Informational only, never evaluated automatically
    pub completion_criteria: Vec<String>,
    /// Monotonic creation counter; breaks priority ties deterministically
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Parameters for creating a goal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGoal {
    pub description: String,
    #[serde(default = "default_mode")]
    pub mode: GoalMode,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub completion_criteria: Vec<String>,
}

fn default_mode() -> GoalMode {
    GoalMode::OneTime
}

impl NewGoal {
    pub fn new(description: impl Into<String>, priority: i32) -> Self {
        Self {
            description: description.into(),
            mode: GoalMode::OneTime,
            priority,
            parent_id: None,
            completion_criteria: Vec::new(),
        }
    }

    pub fn continuous(mut self) -> Self {
        self.mode = GoalMode::Continuous;
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.completion_criteria = criteria.into_iter().map(Into::into).collect();
        self
    }
}

/// A goal together with its recursively nested sub-goals
#[derive(Debug, Clone, Serialize)]
pub struct GoalHierarchy {
    pub goal: Goal,
    pub sub_goals: Vec<GoalHierarchy>,
}

/// Totals by status, as exposed in the status snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct GoalsSummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
}

/// Manages goals and their lifecycle
pub struct GoalEngine {
    goals: HashMap<String, Goal>,
    /// Goal ids in creation order
    order: Vec<String>,
    active_goal: Option<String>,
    next_sequence: u64,
    agent_id: String,
    store: Option<Arc<dyn Persistence>>,
}

impl GoalEngine {
    /// Create a new in-memory-only GoalEngine
    pub fn new() -> Self {
        Self {
            goals: HashMap::new(),
            order: Vec::new(),
            active_goal: None,
            next_sequence: 0,
            agent_id: String::new(),
            store: None,
        }
    }

    /// Create a GoalEngine backed by a persistence store, restoring every goal
    /// and the active pointer previously saved for `agent_id`.
    pub fn with_store(agent_id: &str, store: Arc<dyn Persistence>) -> AgentResult<Self> {
        let restored = store.load_goals(agent_id)?;
        let active = store.load_active_goal(agent_id)?;

        let mut engine = Self {
            agent_id: agent_id.to_string(),
            store: Some(store),
            ..Self::new()
        };

        for goal in restored {
            engine.next_sequence = engine.next_sequence.max(goal.sequence + 1);
            engine.order.push(goal.id.clone());
            engine.goals.insert(goal.id.clone(), goal);
        }

        match active {
            Some(id) if engine.goals.contains_key(&id) => engine.active_goal = Some(id),
            Some(id) => warn!("Saved active goal {id} no longer exists, starting without one"),
            None => {}
        }

        info!(
            "GoalEngine restored {} goals for agent {agent_id}",
            engine.goals.len()
        );
        Ok(engine)
    }

    fn persist(&self, goals: &[&Goal]) -> AgentResult<()> {
        if let Some(store) = &self.store {
            store.save_goals(&self.agent_id, goals)?;
        }
        Ok(())
    }

    /// A copy of the goal with `status` applied
    fn with_status(&self, goal_id: &str, status: GoalStatus) -> AgentResult<Goal> {
        let mut goal = self.get(goal_id)?.clone();
        let now = Utc::now();
        goal.status = status;
        goal.updated_at = now;
        if status == GoalStatus::Completed {
            goal.completed_at = Some(now);
        }
        Ok(goal)
    }

    /// Create a goal. Fails with `GoalNotFound` (leaving the store untouched)
    /// when `parent_id` names a goal that does not exist.
    pub fn create(&mut self, new_goal: NewGoal) -> AgentResult<Goal> {
        let mut parent = match &new_goal.parent_id {
            Some(parent_id) => Some(
                self.goals
                    .get(parent_id)
                    .cloned()
                    .ok_or_else(|| AgentError::GoalNotFound(parent_id.clone()))?,
            ),
            None => None,
        };

        let now = Utc::now();
        let goal = Goal {
            id: Uuid::new_v4().to_string(),
            description: new_goal.description,
            mode: new_goal.mode,
            status: GoalStatus::Pending,
            priority: new_goal.priority,
            parent_id: new_goal.parent_id,
            sub_goals: Vec::new(),
            completion_criteria: new_goal.completion_criteria,
            sequence: self.next_sequence,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        match parent.as_mut() {
            Some(parent) => {
                parent.sub_goals.push(goal.id.clone());
                parent.updated_at = now;
                self.persist(&[&goal, &*parent])?;
            }
            None => self.persist(&[&goal])?,
        }

        if let Some(parent) = parent {
            self.goals.insert(parent.id.clone(), parent);
        }
        self.next_sequence += 1;
        self.order.push(goal.id.clone());
        self.goals.insert(goal.id.clone(), goal.clone());

        info!(
            "Goal created: {} (priority {}, mode {})",
            goal.id,
            goal.priority,
            goal.mode.as_str()
        );
        Ok(goal)
    }

    /// Get a goal by id
    pub fn get(&self, goal_id: &str) -> AgentResult<&Goal> {
        self.goals
            .get(goal_id)
            .ok_or_else(|| AgentError::GoalNotFound(goal_id.to_string()))
    }

    /// List goals in creation order, optionally filtered by status
    pub fn list(&self, status_filter: Option<GoalStatus>) -> Vec<&Goal> {
        self.order
            .iter()
            .filter_map(|id| self.goals.get(id))
            .filter(|g| status_filter.map_or(true, |s| g.status == s))
            .collect()
    }

    /// Set a goal's status. Any transition is permitted; `completed_at` is
    /// stamped on every transition into Completed.
    pub fn update_status(&mut self, goal_id: &str, status: GoalStatus) -> AgentResult<()> {
        let previous = self.get(goal_id)?.status;
        let goal = self.with_status(goal_id, status)?;

        self.persist(&[&goal])?;
        self.goals.insert(goal.id.clone(), goal);

        debug!(
            "Goal {goal_id} status: {} -> {}",
            previous.as_str(),
            status.as_str()
        );
        Ok(())
    }

    /// Mark a goal InProgress and record it as the single active goal.
    /// The previously active goal keeps whatever status it had.
    pub fn set_active(&mut self, goal_id: &str) -> AgentResult<()> {
        let goal = self.with_status(goal_id, GoalStatus::InProgress)?;
        if let Some(store) = &self.store {
            store.activate_goal(&self.agent_id, &goal)?;
        }
        self.goals.insert(goal.id.clone(), goal);
        if let Some(previous) = self.active_goal.replace(goal_id.to_string()) {
            if previous != goal_id {
                debug!("Active goal switched from {previous} to {goal_id}");
            }
        }
        info!("Active goal: {goal_id}");
        Ok(())
    }

    /// The current active goal, if any
    pub fn active_goal(&self) -> Option<&Goal> {
        self.active_goal.as_ref().and_then(|id| self.goals.get(id))
    }

    /// Forget the active goal without touching its status
    pub fn clear_active(&mut self) -> AgentResult<()> {
        if self.active_goal.is_none() {
            return Ok(());
        }
        if let Some(store) = &self.store {
            store.clear_active_goal(&self.agent_id)?;
        }
        self.active_goal = None;
        Ok(())
    }

    /// The goal plus its nested sub-goal tree. Cycles cannot exist because a
    /// parent must exist before any child can reference it.
    pub fn get_hierarchy(&self, goal_id: &str) -> AgentResult<GoalHierarchy> {
        let goal = self.get(goal_id)?.clone();
        let sub_goals = goal
            .sub_goals
            .iter()
            .map(|child| self.get_hierarchy(child))
            .collect::<AgentResult<Vec<_>>>()?;
        Ok(GoalHierarchy { goal, sub_goals })
    }

    /// Whether a goal is done. Continuous goals never are.
    pub fn check_completion(&self, goal_id: &str) -> AgentResult<bool> {
        let goal = self.get(goal_id)?;
        if goal.mode == GoalMode::Continuous {
            return Ok(false);
        }
        Ok(goal.status == GoalStatus::Completed)
    }

    /// Totals by status
    pub fn summary(&self) -> GoalsSummary {
        let mut by_status: BTreeMap<String, usize> = GoalStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for goal in self.goals.values() {
            *by_status.entry(goal.status.as_str().to_string()).or_default() += 1;
        }
        GoalsSummary {
            total: self.goals.len(),
            by_status,
        }
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }
}

impl Default for GoalEngine {
    fn default() -> Self {
        Self::new()
    }
}
