//! Job execution history endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::state::AppState;

/// `GET /executions/{id}` — one audit record.
pub async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<Uuid>,
) -> GatewayResult<impl IntoResponse> {
    let execution = state
        .executions
        .get_execution(execution_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("execution {execution_id} not found")))?;
    Ok(Json(execution))
}
