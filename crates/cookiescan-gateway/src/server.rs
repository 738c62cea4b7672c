//! Router assembly and serving.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{executions, health, scans, schedules};
use crate::state::AppState;

/// Build the full axum router over the shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/scans", post(scans::create_scan).get(scans::list_scans))
        .route("/scans/batch", post(scans::batch_scan))
        .route(
            "/scans/:scan_id",
            get(scans::get_scan).delete(scans::delete_scan),
        )
        .route("/scans/:scan_id/progress", get(scans::get_scan_progress))
        .route("/scans/:scan_id/stream", get(scans::stream_scan_progress))
        .route(
            "/schedules",
            post(schedules::create_schedule).get(schedules::list_schedules),
        )
        .route("/schedules/sync", post(schedules::sync_schedules))
        .route(
            "/schedules/:schedule_id",
            get(schedules::get_schedule)
                .put(schedules::update_schedule)
                .delete(schedules::delete_schedule),
        )
        .route(
            "/schedules/:schedule_id/executions",
            get(schedules::list_schedule_executions),
        )
        .route("/executions/:execution_id", get(executions::get_execution))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(state: Arc<AppState>) -> std::io::Result<()> {
    let addr = state.config.bind_addr.clone();
    let app = build_router(state);
    info!(addr = %addr, "cookiescan gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}
