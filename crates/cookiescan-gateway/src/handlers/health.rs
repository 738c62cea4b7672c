//! `GET /health` — liveness probe with pool and trigger statistics.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pool = state.browser_pool.stats().await;
    let triggers = state.dispatcher.trigger_count().await;

    Json(json!({
        "status": "ok",
        "service": "cookiescan-gateway",
        "browser_pool": pool,
        "active_triggers": triggers,
    }))
}
