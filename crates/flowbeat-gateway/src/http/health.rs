use axum::http::StatusCode;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;
use crate::http::error_response;

/// GET /health — liveness probe, returns server metadata.
pub async fn health_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let flows = state.registry.list_flows().map_err(error_response)?;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "flows": flows.len(),
        "tick_interval_secs": state.config.scheduler.tick_interval_secs,
    })))
}
