//! Flow administration endpoints.
//!
//! Flows are addressed by name throughout, matching how operators think of
//! them; ids only appear inside the returned records.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::app::AppState;
use crate::http::error_response;
use flowbeat_scheduler::{DataFlow, FlowRun, NewFlow, SchedulerError};

type ApiError = (StatusCode, Json<Value>);

fn not_found(name: &str) -> ApiError {
    error_response(SchedulerError::FlowNotFound {
        name: name.to_string(),
    })
}

/// POST /flows — create a flow and seed its first pending run.
pub async fn create_flow(
    State(state): State<Arc<AppState>>,
    Json(new_flow): Json<NewFlow>,
) -> Result<(StatusCode, Json<DataFlow>), ApiError> {
    let flow = state.registry.create_flow(&new_flow).map_err(error_response)?;
    // Seed immediately so the flow fires on the next sweep instead of
    // waiting for ensure_scheduled to notice it.
    state
        .ledger
        .create_pending_run(&flow.id, Utc::now())
        .map_err(error_response)?;
    info!(name = %flow.name, "flow created via API");
    Ok((StatusCode::CREATED, Json(flow)))
}

/// GET /flows — all flows, ordered by name.
pub async fn list_flows(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DataFlow>>, ApiError> {
    let flows = state.registry.list_flows().map_err(error_response)?;
    Ok(Json(flows))
}

/// GET /flows/{name}
pub async fn get_flow(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<DataFlow>, ApiError> {
    let flow = state
        .registry
        .get_flow(&name)
        .map_err(error_response)?
        .ok_or_else(|| not_found(&name))?;
    Ok(Json(flow))
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    #[serde(default = "default_runs_limit")]
    limit: usize,
}

fn default_runs_limit() -> usize {
    50
}

/// GET /flows/{name}/runs — run history, newest first.
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<FlowRun>>, ApiError> {
    let flow = state
        .registry
        .get_flow(&name)
        .map_err(error_response)?
        .ok_or_else(|| not_found(&name))?;
    let runs = state
        .ledger
        .runs_for_flow(&flow.id, query.limit)
        .map_err(error_response)?;
    Ok(Json(runs))
}

/// POST /flows/{name}/enable
pub async fn enable_flow(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<DataFlow>, ApiError> {
    set_enabled(&state, &name, true)
}

/// POST /flows/{name}/disable
pub async fn disable_flow(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<DataFlow>, ApiError> {
    set_enabled(&state, &name, false)
}

fn set_enabled(state: &AppState, name: &str, enabled: bool) -> Result<Json<DataFlow>, ApiError> {
    state
        .registry
        .set_enabled(name, enabled)
        .map_err(error_response)?;
    let flow = state
        .registry
        .get_flow(name)
        .map_err(error_response)?
        .ok_or_else(|| not_found(name))?;
    Ok(Json(flow))
}

/// DELETE /flows/{name} — removes the flow and its entire run history.
pub async fn delete_flow(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.registry.delete_flow(&name).map_err(error_response)?;
    info!(name = %name, "flow deleted via API");
    Ok(Json(json!({"ok": true})))
}

/// POST /flows/{name}/run — execute a flow right now, out of schedule.
///
/// Responds with the terminal run record: a handler failure is a 200 whose
/// run carries status "failed" and the error, not an HTTP error. 409 means
/// the flow is already mid-run.
pub async fn trigger_flow(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<FlowRun>, ApiError> {
    info!(name = %name, "manual trigger");
    let run = state
        .sweep
        .trigger_flow(&name, Utc::now())
        .await
        .map_err(error_response)?;
    Ok(Json(run))
}
