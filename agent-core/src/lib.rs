//! cogshell core: goal engine, planner, executor and the cognitive loop
//!
//! An autonomous agent shell: hierarchical goals are scheduled by priority,
//! the active goal drives a select → plan → execute → evaluate cycle, and a
//! meta-cognition monitor watches for repeated errors and action loops.

pub mod cognitive_loop;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod goal_engine;
pub mod history;
pub mod management;
pub mod metacognition;
pub mod metrics;
pub mod persistence;
pub mod planner;
pub mod policy;
pub mod rate_limit;
pub mod scheduler;
pub mod state;
pub mod tools;

pub use cognitive_loop::{CognitiveLoop, CycleOutcome, LoopConfig, LoopState};
pub use error::{AgentError, AgentResult};
pub use executor::{ExecutionOutput, ExecutionResult, Executor};
pub use goal_engine::{Goal, GoalEngine, GoalMode, GoalStatus, NewGoal};
pub use planner::{Plan, PlanContext, PlanType, Planner};
pub use state::{AgentState, SharedState};
