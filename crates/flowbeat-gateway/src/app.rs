use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use flowbeat_core::FlowbeatConfig;
use flowbeat_scheduler::{FlowRegistry, HeartbeatSweep, RunLedger};

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: FlowbeatConfig,
    pub registry: Arc<FlowRegistry>,
    pub ledger: Arc<RunLedger>,
    pub sweep: Arc<HeartbeatSweep>,
}

impl AppState {
    pub fn new(
        config: FlowbeatConfig,
        registry: Arc<FlowRegistry>,
        ledger: Arc<RunLedger>,
        sweep: Arc<HeartbeatSweep>,
    ) -> Self {
        Self {
            config,
            registry,
            ledger,
            sweep,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/heartbeat",
            post(crate::http::heartbeat::heartbeat_handler)
                .get(crate::http::heartbeat::heartbeat_handler),
        )
        .route(
            "/flows",
            post(crate::http::flows::create_flow).get(crate::http::flows::list_flows),
        )
        .route(
            "/flows/{name}",
            get(crate::http::flows::get_flow).delete(crate::http::flows::delete_flow),
        )
        .route("/flows/{name}/runs", get(crate::http::flows::list_runs))
        .route("/flows/{name}/enable", post(crate::http::flows::enable_flow))
        .route(
            "/flows/{name}/disable",
            post(crate::http::flows::disable_flow),
        )
        .route("/flows/{name}/run", post(crate::http::flows::trigger_flow))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
