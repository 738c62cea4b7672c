//! Scan management endpoints.
//!
//! Scans created here run asynchronously under the `max_scan_concurrency`
//! semaphore; progress is observable by polling `/scans/{id}/progress` or
//! subscribing to the SSE stream at `/scans/{id}/stream`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{AppendHeaders, IntoResponse};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use cookiescan_kernel::model::scan::{ScanMode, ScanParams, ScanResult, ScanStatus};
use cookiescan_kernel::store::ScanFilter;

use crate::error::{GatewayError, GatewayResult};
use crate::state::AppState;

/// SSE poll cadence.
const STREAM_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Batch requests carry at most this many domains.
const MAX_BATCH_DOMAINS: usize = 10;

// ---------------------------------------------------------------------------
// POST /scans
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateScanRequest {
    /// Domain to scan, scheme included.
    pub domain: String,
    #[serde(default)]
    pub domain_config_id: Option<String>,
    #[serde(default = "default_scan_mode")]
    pub scan_mode: ScanMode,
    #[serde(default)]
    pub params: Option<ScanParams>,
}

fn default_scan_mode() -> ScanMode {
    ScanMode::Quick
}

#[derive(Debug, Serialize)]
pub struct CreateScanResponse {
    pub scan_id: Uuid,
    pub status: ScanStatus,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

pub async fn create_scan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateScanRequest>,
) -> GatewayResult<impl IntoResponse> {
    validate_domain(&request.domain)?;

    let domain_config_id = request
        .domain_config_id
        .unwrap_or_else(|| request.domain.clone());
    let params = request.params.unwrap_or_default();

    let pending = state
        .executor
        .create_scan(&domain_config_id, &request.domain, request.scan_mode, params)
        .await
        .map_err(GatewayError::from)?;

    spawn_scan(&state, pending.clone());

    tracing::info!(scan_id = %pending.scan_id, domain = %pending.domain, "scan queued");
    Ok((
        StatusCode::CREATED,
        Json(CreateScanResponse {
            scan_id: pending.scan_id,
            status: ScanStatus::Pending,
            message: "Scan created and queued for processing".to_string(),
            created_at: pending.created_at,
        }),
    ))
}

/// Run a pending scan in the background under the concurrency gate.
fn spawn_scan(state: &Arc<AppState>, pending: ScanResult) {
    let executor = Arc::clone(&state.executor);
    let semaphore = Arc::clone(&state.scan_semaphore);
    tokio::spawn(async move {
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        if let Err(e) = executor.execute(&pending).await {
            tracing::error!(scan_id = %pending.scan_id, error = %e, "scan execution failed");
        }
    });
}

fn validate_domain(domain: &str) -> GatewayResult<()> {
    if !domain.starts_with("http://") && !domain.starts_with("https://") {
        return Err(GatewayError::InvalidRequest(format!(
            "domain must include a scheme, got '{domain}'"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// GET /scans
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListScansQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub scan_mode: Option<String>,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

pub async fn list_scans(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListScansQuery>,
) -> GatewayResult<impl IntoResponse> {
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 100);

    let status = match &query.status {
        Some(raw) => Some(ScanStatus::parse(raw).ok_or_else(|| {
            GatewayError::InvalidRequest(format!("unknown status '{raw}'"))
        })?),
        None => None,
    };
    let scan_mode = match &query.scan_mode {
        Some(raw) => Some(ScanMode::parse(raw).ok_or_else(|| {
            GatewayError::InvalidRequest(format!("unknown scan mode '{raw}'"))
        })?),
        None => None,
    };

    let filter = ScanFilter {
        domain: query.domain,
        status,
        scan_mode,
        limit: page_size,
        offset: (page - 1) * page_size,
    };
    let (items, total) = state.scans.list_scans(&filter).await?;

    Ok(Json(json!({
        "items": items,
        "total": total,
        "page": page,
        "page_size": page_size,
        "has_next": page * page_size < total,
        "has_prev": page > 1,
    })))
}

// ---------------------------------------------------------------------------
// GET /scans/{id}
// ---------------------------------------------------------------------------

pub async fn get_scan(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<Uuid>,
) -> GatewayResult<impl IntoResponse> {
    let result = state
        .scans
        .get_scan(scan_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("scan {scan_id} not found")))?;
    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// GET /scans/{id}/progress
// ---------------------------------------------------------------------------

pub async fn get_scan_progress(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<Uuid>,
) -> GatewayResult<impl IntoResponse> {
    let progress = state
        .executor
        .progress()
        .latest(scan_id)
        .ok_or_else(|| GatewayError::NotFound(format!("scan {scan_id} not found or not running")))?;
    Ok(Json(progress))
}

// ---------------------------------------------------------------------------
// GET /scans/{id}/stream (SSE)
// ---------------------------------------------------------------------------

pub async fn stream_scan_progress(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<Uuid>,
) -> impl IntoResponse {
    let bus = state.executor.progress().clone();

    let stream = async_stream::stream! {
        loop {
            match bus.latest(scan_id) {
                Some(progress) => {
                    let data = serde_json::to_string(&progress).unwrap_or_default();
                    yield Ok::<_, Infallible>(Event::default().data(data));

                    if progress.status.is_terminal() {
                        yield Ok(Event::default().event("close").data("Scan completed"));
                        break;
                    }
                }
                None => {
                    yield Ok(Event::default().event("error").data("Scan not found"));
                    break;
                }
            }
            tokio::time::sleep(STREAM_POLL_INTERVAL).await;
        }
    };

    (
        AppendHeaders([
            ("Cache-Control", "no-cache"),
            ("Connection", "keep-alive"),
            // Reverse proxies must not buffer the stream.
            ("X-Accel-Buffering", "no"),
        ]),
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
}

// ---------------------------------------------------------------------------
// DELETE /scans/{id}
// ---------------------------------------------------------------------------

pub async fn delete_scan(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<Uuid>,
) -> GatewayResult<impl IntoResponse> {
    let result = state
        .scans
        .get_scan(scan_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("scan {scan_id} not found")))?;

    if result.status.is_terminal() {
        state.scans.delete_scan(scan_id).await?;
        state.executor.progress().remove(scan_id);
        return Ok(Json(json!({ "scan_id": scan_id, "deleted": true })));
    }

    // Pending/running: cancel. Registering first covers scans still queued
    // behind the concurrency gate; the executor notices between pages.
    state.executor.cancellations().register(scan_id);
    state.executor.cancellations().cancel(scan_id);
    state
        .scans
        .update_status(scan_id, ScanStatus::Cancelled, None, None)
        .await?;
    tracing::info!(scan_id = %scan_id, "scan cancellation requested");
    Ok(Json(json!({ "scan_id": scan_id, "status": "cancelled" })))
}

// ---------------------------------------------------------------------------
// POST /scans/batch
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BatchScanDomain {
    pub domain: String,
    pub domain_config_id: String,
    #[serde(default)]
    pub params: Option<ScanParams>,
}

#[derive(Debug, Deserialize)]
pub struct BatchScanRequest {
    pub domains: Vec<BatchScanDomain>,
    #[serde(default = "default_scan_mode")]
    pub scan_mode: ScanMode,
}

pub async fn batch_scan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchScanRequest>,
) -> GatewayResult<impl IntoResponse> {
    if request.domains.is_empty() {
        return Err(GatewayError::InvalidRequest("domains must not be empty".into()));
    }
    if request.domains.len() > MAX_BATCH_DOMAINS {
        return Err(GatewayError::InvalidRequest(format!(
            "at most {MAX_BATCH_DOMAINS} domains per batch, got {}",
            request.domains.len()
        )));
    }
    for domain in &request.domains {
        validate_domain(&domain.domain)?;
    }

    let mut handles = Vec::with_capacity(request.domains.len());
    for entry in request.domains {
        let executor = Arc::clone(&state.executor);
        let semaphore = Arc::clone(&state.scan_semaphore);
        let scan_mode = request.scan_mode;

        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| "scan gate closed".to_string())?;
            let pending = executor
                .create_scan(
                    &entry.domain_config_id,
                    &entry.domain,
                    scan_mode,
                    entry.params.unwrap_or_default(),
                )
                .await
                .map_err(|e| e.to_string())?;
            let outcome = executor.execute(&pending).await.map_err(|e| e.to_string())?;
            Ok::<_, String>((entry.domain, outcome))
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    let mut successful = 0;
    let mut failed = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok((domain, outcome))) => {
                successful += 1;
                results.push(json!({
                    "domain": domain,
                    "scan_id": outcome.scan_id,
                    "status": outcome.status,
                    "total_cookies": outcome.total_cookies,
                    "page_count": outcome.page_count,
                }));
            }
            Ok(Err(message)) => {
                failed += 1;
                results.push(json!({ "status": "failed", "error": message }));
            }
            Err(join_error) => {
                failed += 1;
                results.push(json!({ "status": "failed", "error": join_error.to_string() }));
            }
        }
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "total_domains": results.len(),
            "successful": successful,
            "failed": failed,
            "results": results,
        })),
    ))
}
