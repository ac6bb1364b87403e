//! HTTP control surface: health, heartbeat, and flow administration.

pub mod flows;
pub mod health;
pub mod heartbeat;

use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tracing::error;

use flowbeat_scheduler::SchedulerError;

/// Map scheduler errors onto HTTP responses.
///
/// Validation problems surface as 422, lookups as 404, a run already in
/// flight as 409. Anything else is a 500 and gets logged here, since the
/// response body only carries the message.
pub(crate) fn error_response(err: SchedulerError) -> (StatusCode, Json<Value>) {
    let status = match err {
        SchedulerError::FlowNotFound { .. } => StatusCode::NOT_FOUND,
        SchedulerError::InvalidFlow(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SchedulerError::RunClaimed { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %err, "request failed");
    }
    (status, Json(json!({"error": err.to_string()})))
}
