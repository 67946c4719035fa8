//! Management Console: REST API over the agent state
//!
//! Read-mostly view of goals, agents, the monitor and metrics, plus a few
//! operator controls (submit/activate goals, change status, reset the
//! monitor, push events). Shuts down with the rest of the process.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::coordinator::AgentInstance;
use crate::error::AgentError;
use crate::goal_engine::{Goal, GoalHierarchy, GoalStatus, NewGoal};
use crate::history::ActionRecord;
use crate::metacognition::MonitorSummary;
use crate::metrics::{ExecutionMetrics, MetricsSnapshot};
use crate::state::{SharedState, StatusSnapshot};
use crate::tools::{ToolDefinition, ToolRegistry};

/// Combined state for the management server
#[derive(Clone)]
pub struct MgmtState {
    pub agent: SharedState,
    pub metrics: Arc<ExecutionMetrics>,
    pub tools: Arc<ToolRegistry>,
}

pub fn router(state: MgmtState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/goals", get(list_goals).post(submit_goal))
        .route("/api/goals/:goal_id", get(get_goal))
        .route("/api/goals/:goal_id/hierarchy", get(get_goal_hierarchy))
        .route("/api/goals/:goal_id/activate", post(activate_goal))
        .route("/api/goals/:goal_id/status", put(update_goal_status))
        .route("/api/agents", get(list_agents))
        .route("/api/monitor", get(get_monitor))
        .route("/api/monitor/reset", post(reset_monitor))
        .route("/api/metrics", get(get_metrics))
        .route("/api/tools", get(list_tools))
        .route("/api/tools/:name", get(get_tool))
        .route("/api/actions", get(list_actions))
        .route("/api/events", post(post_event))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the management API on `bind` until `cancel` fires
pub async fn start_management_server(
    bind: &str,
    state: MgmtState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Management console listening on http://{bind}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("Management console stopped");
    Ok(())
}

// --- API Types ---

#[derive(Debug, Default, Deserialize)]
struct GoalsQuery {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusUpdateRequest {
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct ToolsQuery {
    #[serde(default)]
    namespace: String,
}

#[derive(Debug, Default, Deserialize)]
struct ActionsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EventRequest {
    event: String,
}

fn status_code(e: &AgentError) -> StatusCode {
    match e {
        AgentError::GoalNotFound(_) | AgentError::AgentNotFound(_) => StatusCode::NOT_FOUND,
        AgentError::InvalidStatus(_) | AgentError::InvalidMode(_) => StatusCode::BAD_REQUEST,
        AgentError::CoreAgent(_) => StatusCode::CONFLICT,
        AgentError::Other(inner) => {
            error!("Management request failed: {inner:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// --- Handlers ---

async fn get_status(State(state): State<MgmtState>) -> Json<StatusSnapshot> {
    Json(state.agent.read().await.status())
}

async fn list_goals(
    State(state): State<MgmtState>,
    Query(query): Query<GoalsQuery>,
) -> Result<Json<Vec<Goal>>, StatusCode> {
    let filter = query
        .status
        .as_deref()
        .map(str::parse::<GoalStatus>)
        .transpose()
        .map_err(|e| status_code(&e))?;

    let s = state.agent.read().await;
    Ok(Json(s.goal_engine.list(filter).into_iter().cloned().collect()))
}

async fn submit_goal(
    State(state): State<MgmtState>,
    Json(req): Json<NewGoal>,
) -> Result<(StatusCode, Json<Goal>), StatusCode> {
    let mut s = state.agent.write().await;
    let goal = s.goal_engine.create(req).map_err(|e| status_code(&e))?;
    info!("Goal submitted via management console: {}", goal.id);
    Ok((StatusCode::CREATED, Json(goal)))
}

async fn get_goal(
    State(state): State<MgmtState>,
    Path(goal_id): Path<String>,
) -> Result<Json<Goal>, StatusCode> {
    let s = state.agent.read().await;
    s.goal_engine
        .get(&goal_id)
        .map(|g| Json(g.clone()))
        .map_err(|e| status_code(&e))
}

async fn get_goal_hierarchy(
    State(state): State<MgmtState>,
    Path(goal_id): Path<String>,
) -> Result<Json<GoalHierarchy>, StatusCode> {
    let s = state.agent.read().await;
    s.goal_engine
        .get_hierarchy(&goal_id)
        .map(Json)
        .map_err(|e| status_code(&e))
}

async fn activate_goal(
    State(state): State<MgmtState>,
    Path(goal_id): Path<String>,
) -> Result<Json<Goal>, StatusCode> {
    let mut s = state.agent.write().await;
    s.goal_engine
        .set_active(&goal_id)
        .map_err(|e| status_code(&e))?;
    s.goal_engine
        .get(&goal_id)
        .map(|g| Json(g.clone()))
        .map_err(|e| status_code(&e))
}

async fn update_goal_status(
    State(state): State<MgmtState>,
    Path(goal_id): Path<String>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<Goal>, StatusCode> {
    let status: GoalStatus = req.status.parse().map_err(|e| status_code(&e))?;

    let mut s = state.agent.write().await;
    s.goal_engine
        .update_status(&goal_id, status)
        .map_err(|e| status_code(&e))?;
    s.goal_engine
        .get(&goal_id)
        .map(|g| Json(g.clone()))
        .map_err(|e| status_code(&e))
}

async fn list_agents(State(state): State<MgmtState>) -> Json<Vec<AgentInstance>> {
    let s = state.agent.read().await;
    Json(s.coordinator.list().into_iter().cloned().collect())
}

async fn get_monitor(State(state): State<MgmtState>) -> Json<MonitorSummary> {
    Json(state.agent.read().await.monitor.summary())
}

async fn reset_monitor(State(state): State<MgmtState>) -> StatusCode {
    let mut s = state.agent.write().await;
    s.monitor.reset();
    s.last_evaluation = None;
    info!("Monitor reset by operator");
    StatusCode::NO_CONTENT
}

async fn get_metrics(State(state): State<MgmtState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn list_tools(
    State(state): State<MgmtState>,
    Query(query): Query<ToolsQuery>,
) -> Json<Vec<ToolDefinition>> {
    Json(
        state
            .tools
            .list_tools(&query.namespace)
            .into_iter()
            .cloned()
            .collect(),
    )
}

async fn get_tool(
    State(state): State<MgmtState>,
    Path(name): Path<String>,
) -> Result<Json<ToolDefinition>, StatusCode> {
    state
        .tools
        .get_tool(&name)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn list_actions(
    State(state): State<MgmtState>,
    Query(query): Query<ActionsQuery>,
) -> Json<Vec<ActionRecord>> {
    let limit = query.limit.unwrap_or(50);
    let s = state.agent.read().await;
    Json(s.history.recent(limit).into_iter().cloned().collect())
}

async fn post_event(
    State(state): State<MgmtState>,
    Json(req): Json<EventRequest>,
) -> StatusCode {
    if req.event.trim().is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    state.agent.write().await.push_event(req.event);
    StatusCode::ACCEPTED
}
