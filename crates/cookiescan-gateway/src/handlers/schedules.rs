//! Schedule management endpoints.
//!
//! Writes here go straight to the repository; the schedule watcher reflects
//! them into the dispatcher within one tick, so no trigger bookkeeping
//! happens in the handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use cookiescan_kernel::model::scan::{ScanMode, ScanParams};
use cookiescan_kernel::model::schedule::{Frequency, TimeConfig};
use cookiescan_kernel::store::{NewSchedule, SchedulePatch};

use crate::error::{GatewayError, GatewayResult};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// POST /schedules
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub domain_config_id: String,
    pub domain: String,
    #[serde(default = "default_scan_type")]
    pub scan_type: ScanMode,
    #[serde(default)]
    pub scan_params: Option<ScanParams>,
    pub frequency: String,
    pub time_config: TimeConfig,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub profile_id: Option<String>,
}

fn default_scan_type() -> ScanMode {
    ScanMode::Deep
}

fn default_enabled() -> bool {
    true
}

pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateScheduleRequest>,
) -> GatewayResult<impl IntoResponse> {
    if !request.domain.starts_with("http://") && !request.domain.starts_with("https://") {
        return Err(GatewayError::InvalidRequest(format!(
            "domain must include a scheme, got '{}'",
            request.domain
        )));
    }
    let frequency = Frequency::parse(&request.frequency).ok_or_else(|| {
        GatewayError::InvalidRequest(format!("unknown frequency '{}'", request.frequency))
    })?;
    request
        .time_config
        .validate(frequency)
        .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

    let params = request.scan_params.unwrap_or_default();
    params
        .validate()
        .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

    let schedule_id = state
        .schedules
        .create(NewSchedule {
            domain_config_id: request.domain_config_id,
            domain: request.domain,
            scan_type: request.scan_type,
            scan_params: params,
            frequency,
            time_config: request.time_config,
            enabled: request.enabled,
            profile_id: request.profile_id,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "schedule_id": schedule_id })),
    ))
}

// ---------------------------------------------------------------------------
// GET /schedules
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListSchedulesQuery {
    #[serde(default)]
    pub enabled_only: bool,
    #[serde(default)]
    pub domain_config_id: Option<String>,
}

pub async fn list_schedules(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListSchedulesQuery>,
) -> GatewayResult<impl IntoResponse> {
    let schedules = match &query.domain_config_id {
        Some(config_id) => state.schedules.list_by_domain_config_id(config_id).await?,
        None => state.schedules.list_schedules(query.enabled_only).await?,
    };
    let total = schedules.len();
    Ok(Json(json!({ "items": schedules, "total": total })))
}

// ---------------------------------------------------------------------------
// GET /schedules/{id}
// ---------------------------------------------------------------------------

pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<Uuid>,
) -> GatewayResult<impl IntoResponse> {
    let schedule = state
        .schedules
        .get_schedule(schedule_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("schedule {schedule_id} not found")))?;

    let next_run = state.dispatcher.next_run(schedule_id).await;
    Ok(Json(json!({ "schedule": schedule, "next_trigger": next_run })))
}

// ---------------------------------------------------------------------------
// PUT /schedules/{id}
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct UpdateScheduleRequest {
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub time_config: Option<TimeConfig>,
    #[serde(default)]
    pub scan_type: Option<ScanMode>,
    #[serde(default)]
    pub scan_params: Option<ScanParams>,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<Uuid>,
    Json(request): Json<UpdateScheduleRequest>,
) -> GatewayResult<impl IntoResponse> {
    let current = state
        .schedules
        .get_schedule(schedule_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("schedule {schedule_id} not found")))?;

    let frequency = match &request.frequency {
        Some(raw) => Some(Frequency::parse(raw).ok_or_else(|| {
            GatewayError::InvalidRequest(format!("unknown frequency '{raw}'"))
        })?),
        None => None,
    };

    // Validate the post-update combination before committing anything.
    let effective_frequency = frequency.unwrap_or(current.frequency);
    let effective_time_config = request
        .time_config
        .clone()
        .unwrap_or_else(|| current.time_config.clone());
    effective_time_config
        .validate(effective_frequency)
        .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
    if let Some(params) = &request.scan_params {
        params
            .validate()
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
    }

    let patch = SchedulePatch {
        frequency,
        time_config: request.time_config,
        scan_type: request.scan_type,
        scan_params: request.scan_params,
        profile_id: request.profile_id,
        enabled: request.enabled,
        next_run: None,
    };
    if patch.is_empty() {
        return Err(GatewayError::InvalidRequest("no fields to update".into()));
    }

    let updated = state.schedules.update(schedule_id, patch).await?;
    Ok(Json(json!({ "schedule_id": schedule_id, "updated": updated })))
}

// ---------------------------------------------------------------------------
// DELETE /schedules/{id}
// ---------------------------------------------------------------------------

pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<Uuid>,
) -> GatewayResult<impl IntoResponse> {
    let deleted = state.schedules.delete_schedule(schedule_id).await?;
    if !deleted {
        return Err(GatewayError::NotFound(format!(
            "schedule {schedule_id} not found"
        )));
    }
    // The watcher removes the in-memory trigger within one tick.
    Ok(Json(json!({ "schedule_id": schedule_id, "deleted": true })))
}

// ---------------------------------------------------------------------------
// POST /schedules/sync
// ---------------------------------------------------------------------------

pub async fn sync_schedules(
    State(state): State<Arc<AppState>>,
) -> GatewayResult<impl IntoResponse> {
    let Some(sync) = &state.schedule_sync else {
        return Err(GatewayError::InvalidRequest(
            "no external schedule source configured".into(),
        ));
    };

    let stats = sync
        .run_once(&state.schedules)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(Json(json!({
        "created": stats.created,
        "updated": stats.updated,
        "skipped": stats.skipped,
    })))
}

// ---------------------------------------------------------------------------
// GET /schedules/{id}/executions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn list_schedule_executions(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<Uuid>,
    Query(query): Query<ListExecutionsQuery>,
) -> GatewayResult<impl IntoResponse> {
    let executions = state
        .executions
        .list_by_schedule(schedule_id, query.limit.min(200), query.offset)
        .await?;
    let count = executions.len();
    Ok(Json(json!({ "items": executions, "count": count })))
}
