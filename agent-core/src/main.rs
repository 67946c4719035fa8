//! cogshell: autonomous agent shell
//!
//! Composition root: loads configuration, builds every collaborator
//! explicitly, starts the management console and the cognitive loop, and
//! shuts both down on Ctrl-C once the in-flight cycle has finished.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cogshell_core::cognitive_loop::CognitiveLoop;
use cogshell_core::config::{self, AgentConfig, PlannerKind};
use cogshell_core::coordinator::AgentCoordinator;
use cogshell_core::executor::Executor;
use cogshell_core::goal_engine::GoalEngine;
use cogshell_core::history::ActionHistory;
use cogshell_core::management::{self, MgmtState};
use cogshell_core::metacognition::MetaCognitionMonitor;
use cogshell_core::metrics::ExecutionMetrics;
use cogshell_core::persistence::{Persistence, SqliteStore};
use cogshell_core::planner::{DelegatedPlanner, Planner};
use cogshell_core::policy::RulePolicy;
use cogshell_core::rate_limit::RateLimiter;
use cogshell_core::state::AgentState;
use cogshell_core::tools::ToolRegistry;

fn init_tracing(agent: &AgentConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&agent.log_level));

    if agent.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config::config_path();
    let config = config::load_config(&config_path)?;
    init_tracing(&config.agent);

    let agent_id = config.agent.id.clone();
    info!("cogshell starting (agent {agent_id}, config {config_path})");

    // Persistence
    let store: Option<Arc<dyn Persistence>> = match &config.persistence.db_path {
        Some(path) => {
            let store = SqliteStore::open(path)
                .with_context(|| format!("Failed to open persistence at {path}"))?;
            info!("Persistence: {path}");
            Some(Arc::new(store) as Arc<dyn Persistence>)
        }
        None => {
            warn!("No persistence configured, goals live in memory only");
            None
        }
    };

    // Goal store, seeded on first start
    let mut goal_engine = match &store {
        Some(store) => GoalEngine::with_store(&agent_id, store.clone())?,
        None => GoalEngine::new(),
    };
    if goal_engine.is_empty() {
        for seed in config.goals.clone() {
            goal_engine.create(seed)?;
        }
    }

    let mut history = ActionHistory::new(config.cognitive_loop.history_size);
    if let Some(store) = &store {
        let mut recent = store.recent_actions(&agent_id, config.cognitive_loop.history_size)?;
        recent.reverse();
        for record in recent {
            history.record(record);
        }
    }

    // Collaborators
    let planner = Arc::new(match config.planner.kind {
        PlannerKind::RuleBased => Planner::rule_based(),
        PlannerKind::Delegated => {
            warn!("Delegated planner selected without a reasoner; rule-based fallback applies");
            Planner::new(Arc::new(DelegatedPlanner::new(None)))
        }
    });
    let metrics = Arc::new(ExecutionMetrics::new());
    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_limit.agent_rps,
        config.rate_limit.tool_rps,
    ));
    let tools = Arc::new(ToolRegistry::with_builtins());
    let executor = Arc::new(
        Executor::new(agent_id.clone(), rate_limiter, metrics.clone())
            .with_tools(tools.clone())
            .with_policy(Arc::new(RulePolicy::new(
                config.policy.deny.clone(),
                config.policy.confirm.clone(),
            ))),
    );

    let mut agent_state = AgentState::new(
        agent_id.clone(),
        goal_engine,
        MetaCognitionMonitor::new(config.monitor_config()),
        AgentCoordinator::new(config.agents.max_sub_agents),
    )
    .with_planner_type(planner.planner_type())
    .with_history(history);
    if let Some(store) = store {
        agent_state = agent_state.with_store(store);
    }
    let state = agent_state.into_shared();

    let cancel = CancellationToken::new();

    // Management console
    let mgmt_handle = if config.management.enabled {
        let mgmt_state = MgmtState {
            agent: state.clone(),
            metrics: metrics.clone(),
            tools,
        };
        let bind = config.management.bind.clone();
        let token = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = management::start_management_server(&bind, mgmt_state, token).await {
                error!("Management server failed: {e}");
            }
        }))
    } else {
        None
    };

    // Cognitive loop
    let mut cognitive_loop = CognitiveLoop::new(state, planner, executor, config.loop_config());
    let token = cancel.clone();
    let loop_handle = tokio::spawn(async move { cognitive_loop.run(token).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    cancel.cancel();

    loop_handle.await.context("Cognitive loop task panicked")?;
    if let Some(handle) = mgmt_handle {
        handle.await.context("Management server task panicked")?;
    }

    info!("cogshell stopped");
    Ok(())
}
