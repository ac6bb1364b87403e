use axum::http::StatusCode;
use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::app::AppState;
use crate::http::error_response;
use flowbeat_scheduler::SweepReport;

/// POST /heartbeat (and GET, for callers that can only poll).
///
/// One full scheduling pass: seed pending runs for due flows, then execute
/// everything due. Responds 200 with the sweep report; storage failures
/// respond 500 with `{"error": ...}`.
pub async fn heartbeat_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SweepReport>, (StatusCode, Json<Value>)> {
    let now = Utc::now();
    info!("heartbeat received");

    state.sweep.ensure_scheduled(now).map_err(error_response)?;
    let report = state.sweep.run_sweep(now).await.map_err(error_response)?;

    Ok(Json(report))
}
