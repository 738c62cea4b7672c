//! Store trait contracts.
//!
//! Trait definitions live here; concrete backends (SQLite, in-memory) live
//! in `cookiescan-foundation`. Callers that need to be generic over the
//! storage backend — the watcher, the coordinator, the gateway — depend only
//! on these traits.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::cookie::Classification;
use crate::model::execution::{ExecutionStatus, JobExecution};
use crate::model::scan::{ScanMode, ScanParams, ScanResult, ScanStatus};
use crate::model::schedule::{Frequency, Schedule, TimeConfig};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// All errors the store backends can surface.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Schedule store
// ---------------------------------------------------------------------------

/// Fields for creating a schedule. The store assigns the id and timestamps.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub domain_config_id: String,
    pub domain: String,
    pub scan_type: ScanMode,
    pub scan_params: ScanParams,
    pub frequency: Frequency,
    pub time_config: TimeConfig,
    pub enabled: bool,
    pub profile_id: Option<String>,
}

/// Dynamic partial update; `None` fields are left untouched.
/// Any successful update touches `updated_at`.
#[derive(Debug, Clone, Default)]
pub struct SchedulePatch {
    pub frequency: Option<Frequency>,
    pub time_config: Option<TimeConfig>,
    pub scan_type: Option<ScanMode>,
    pub scan_params: Option<ScanParams>,
    pub profile_id: Option<String>,
    pub enabled: Option<bool>,
    pub next_run: Option<DateTime<Utc>>,
}

impl SchedulePatch {
    pub fn is_empty(&self) -> bool {
        self.frequency.is_none()
            && self.time_config.is_none()
            && self.scan_type.is_none()
            && self.scan_params.is_none()
            && self.profile_id.is_none()
            && self.enabled.is_none()
            && self.next_run.is_none()
    }
}

/// One record pulled from the external schedule source.
#[derive(Debug, Clone)]
pub struct ExternalScheduleRecord {
    pub domain_config_id: String,
    pub domain: String,
    pub frequency: Frequency,
    pub time_config: TimeConfig,
    pub scan_params: ScanParams,
    pub scan_type: ScanMode,
    /// Records with this unset are ignored for the sync.
    pub allow_deep_scan: bool,
}

/// Outcome counters for one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Insert a new schedule, returning its assigned id.
    async fn create(&self, new: NewSchedule) -> StoreResult<Uuid>;

    async fn get_schedule(&self, schedule_id: Uuid) -> StoreResult<Option<Schedule>>;

    /// All schedules, ordered by domain then creation time.
    async fn list_schedules(&self, enabled_only: bool) -> StoreResult<Vec<Schedule>>;

    async fn list_by_domain_config_id(&self, domain_config_id: &str)
        -> StoreResult<Vec<Schedule>>;

    /// Apply a partial update. Returns false when the id is unknown or the
    /// patch is empty.
    async fn update(&self, schedule_id: Uuid, patch: SchedulePatch) -> StoreResult<bool>;

    /// Written by the coordinator after each run.
    async fn update_run_status(
        &self,
        schedule_id: Uuid,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
        status: &str,
    ) -> StoreResult<bool>;

    async fn delete_schedule(&self, schedule_id: Uuid) -> StoreResult<bool>;

    /// Upsert external records by `domain_config_id`: present and differing
    /// ⇒ update, absent ⇒ create. Never deletes schedules missing from
    /// `records`. Records without a domain or config id, or with
    /// `allow_deep_scan` unset, count as skipped.
    async fn sync_from_external(
        &self,
        records: &[ExternalScheduleRecord],
    ) -> StoreResult<SyncStats> {
        let mut stats = SyncStats::default();

        for record in records {
            if record.domain.is_empty() || record.domain_config_id.is_empty() {
                stats.skipped += 1;
                continue;
            }
            if !record.allow_deep_scan {
                stats.skipped += 1;
                continue;
            }

            let existing = self
                .list_by_domain_config_id(&record.domain_config_id)
                .await?;

            if let Some(current) = existing.first() {
                if current.frequency == record.frequency
                    && current.time_config == record.time_config
                    && current.scan_params == record.scan_params
                {
                    stats.skipped += 1;
                    continue;
                }
                let patch = SchedulePatch {
                    frequency: Some(record.frequency),
                    time_config: Some(record.time_config.clone()),
                    scan_params: Some(record.scan_params.clone()),
                    ..Default::default()
                };
                if self.update(current.schedule_id, patch).await? {
                    stats.updated += 1;
                } else {
                    stats.skipped += 1;
                }
            } else {
                self.create(NewSchedule {
                    domain_config_id: record.domain_config_id.clone(),
                    domain: record.domain.clone(),
                    scan_type: record.scan_type,
                    scan_params: record.scan_params.clone(),
                    frequency: record.frequency,
                    time_config: record.time_config.clone(),
                    enabled: true,
                    profile_id: None,
                })
                .await?;
                stats.created += 1;
            }
        }

        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Scan result store
// ---------------------------------------------------------------------------

/// Listing filter for scan results.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    pub domain: Option<String>,
    pub status: Option<ScanStatus>,
    pub scan_mode: Option<ScanMode>,
    pub limit: usize,
    pub offset: usize,
}

#[async_trait]
pub trait ScanResultStore: Send + Sync {
    /// Insert the initial `pending` row.
    async fn create_pending(&self, result: &ScanResult) -> StoreResult<()>;

    /// Transition the status (and optionally error/duration) of a scan.
    async fn update_status(
        &self,
        scan_id: Uuid,
        status: ScanStatus,
        error: Option<&str>,
        duration_seconds: Option<f64>,
    ) -> StoreResult<bool>;

    /// Persist a completed result: the result row plus its cookies in
    /// batches of at most `batch_size` rows, each batch in one transaction.
    async fn save_completed(&self, result: &ScanResult, batch_size: usize) -> StoreResult<()>;

    async fn get_scan(&self, scan_id: Uuid) -> StoreResult<Option<ScanResult>>;

    /// Filtered page of results plus the unfiltered-total for pagination.
    async fn list_scans(&self, filter: &ScanFilter) -> StoreResult<(Vec<ScanResult>, usize)>;

    async fn delete_scan(&self, scan_id: Uuid) -> StoreResult<bool>;
}

// ---------------------------------------------------------------------------
// Job execution store
// ---------------------------------------------------------------------------

/// Completion fields written exactly once per execution.
#[derive(Debug, Clone)]
pub struct ExecutionCompletion {
    pub status: ExecutionStatus,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub scan_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
}

#[async_trait]
pub trait JobExecutionStore: Send + Sync {
    /// Record the start of an execution.
    async fn start(&self, execution: &JobExecution) -> StoreResult<()>;

    /// Record completion. Returns false when the execution id is unknown.
    async fn complete(
        &self,
        execution_id: Uuid,
        completion: ExecutionCompletion,
    ) -> StoreResult<bool>;

    async fn get_execution(&self, execution_id: Uuid) -> StoreResult<Option<JobExecution>>;

    async fn list_by_schedule(
        &self,
        schedule_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<JobExecution>>;

    /// Retention: delete executions started before `cutoff`. Returns the
    /// number of rows removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

// ---------------------------------------------------------------------------
// Domain override store
// ---------------------------------------------------------------------------

/// Per-domain operator-prescribed classifications, keyed by cookie name.
/// Loaded lazily per `domain_config_id` before a scan's result is
/// classified; highest priority in the cascade.
#[async_trait]
pub trait OverrideStore: Send + Sync {
    async fn overrides_for(
        &self,
        domain_config_id: &str,
    ) -> StoreResult<HashMap<String, Classification>>;
}

/// Dynamic-dispatch aliases for sharing stores across components.
pub type DynScheduleStore = std::sync::Arc<dyn ScheduleStore>;
pub type DynScanResultStore = std::sync::Arc<dyn ScanResultStore>;
pub type DynJobExecutionStore = std::sync::Arc<dyn JobExecutionStore>;
pub type DynOverrideStore = std::sync::Arc<dyn OverrideStore>;
