//! Error taxonomy for the agent core
//!
//! Only conditions the caller must act on are errors. Rate limiting, policy
//! denials and tool failures are data carried inside an `ExecutionResult`.

use thiserror::Error;

/// Errors surfaced by the goal store, coordinator and composition root
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Goal not found: {0}")]
    GoalNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Invalid goal status: {0}")]
    InvalidStatus(String),

    #[error("Invalid goal mode: {0}")]
    InvalidMode(String),

    /// Permanent agents (worker, planner, chat) live as long as the coordinator
    #[error("Agent {0} is a permanent agent and cannot be terminated")]
    CoreAgent(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    /// True for the NotFound family, used by the management console for 404s
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::GoalNotFound(_) | Self::AgentNotFound(_))
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
