//! In-memory storage backend.
//!
//! Thread-safe mirror of the SQLite backend for unit tests and development.
//! Keeps the same observable semantics: list ordering, sync upserts, patch
//! no-ops, purge cutoffs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use cookiescan_kernel::model::cookie::Classification;
use cookiescan_kernel::model::execution::JobExecution;
use cookiescan_kernel::model::scan::{ScanResult, ScanStatus};
use cookiescan_kernel::model::schedule::Schedule;
use cookiescan_kernel::store::{
    ExecutionCompletion, JobExecutionStore, NewSchedule, OverrideStore, ScanFilter,
    ScanResultStore, SchedulePatch, ScheduleStore, StoreResult,
};

/// In-memory store implementing all four kernel store traits.
#[derive(Default)]
pub struct InMemoryStore {
    schedules: Arc<RwLock<HashMap<Uuid, Schedule>>>,
    scans: Arc<RwLock<HashMap<Uuid, ScanResult>>>,
    executions: Arc<RwLock<HashMap<Uuid, JobExecution>>>,
    overrides: Arc<RwLock<HashMap<String, HashMap<String, Classification>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seed operator overrides for a domain config (test helper).
    pub async fn set_overrides(
        &self,
        domain_config_id: impl Into<String>,
        entries: HashMap<String, Classification>,
    ) {
        self.overrides
            .write()
            .await
            .insert(domain_config_id.into(), entries);
    }

    pub async fn schedule_count(&self) -> usize {
        self.schedules.read().await.len()
    }

    pub async fn scan_count(&self) -> usize {
        self.scans.read().await.len()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryStore {
    async fn create(&self, new: NewSchedule) -> StoreResult<Uuid> {
        let schedule_id = Uuid::new_v4();
        let now = Utc::now();
        let schedule = Schedule {
            schedule_id,
            domain_config_id: new.domain_config_id,
            domain: new.domain,
            scan_type: new.scan_type,
            scan_params: new.scan_params,
            frequency: new.frequency,
            time_config: new.time_config,
            enabled: new.enabled,
            profile_id: new.profile_id,
            last_run: None,
            next_run: None,
            last_status: None,
            created_at: now,
            updated_at: now,
        };
        self.schedules.write().await.insert(schedule_id, schedule);
        Ok(schedule_id)
    }

    async fn get_schedule(&self, schedule_id: Uuid) -> StoreResult<Option<Schedule>> {
        Ok(self.schedules.read().await.get(&schedule_id).cloned())
    }

    async fn list_schedules(&self, enabled_only: bool) -> StoreResult<Vec<Schedule>> {
        let mut out: Vec<Schedule> = self
            .schedules
            .read()
            .await
            .values()
            .filter(|s| !enabled_only || s.enabled)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.domain
                .cmp(&b.domain)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(out)
    }

    async fn list_by_domain_config_id(
        &self,
        domain_config_id: &str,
    ) -> StoreResult<Vec<Schedule>> {
        let mut out: Vec<Schedule> = self
            .schedules
            .read()
            .await
            .values()
            .filter(|s| s.domain_config_id == domain_config_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    async fn update(&self, schedule_id: Uuid, patch: SchedulePatch) -> StoreResult<bool> {
        if patch.is_empty() {
            return Ok(false);
        }
        let mut schedules = self.schedules.write().await;
        let Some(schedule) = schedules.get_mut(&schedule_id) else {
            return Ok(false);
        };
        if let Some(freq) = patch.frequency {
            schedule.frequency = freq;
        }
        if let Some(tc) = patch.time_config {
            schedule.time_config = tc;
        }
        if let Some(mode) = patch.scan_type {
            schedule.scan_type = mode;
        }
        if let Some(params) = patch.scan_params {
            schedule.scan_params = params;
        }
        if let Some(profile) = patch.profile_id {
            schedule.profile_id = Some(profile);
        }
        if let Some(enabled) = patch.enabled {
            schedule.enabled = enabled;
        }
        if let Some(next_run) = patch.next_run {
            schedule.next_run = Some(next_run);
        }
        schedule.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_run_status(
        &self,
        schedule_id: Uuid,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
        status: &str,
    ) -> StoreResult<bool> {
        let mut schedules = self.schedules.write().await;
        let Some(schedule) = schedules.get_mut(&schedule_id) else {
            return Ok(false);
        };
        schedule.last_run = Some(last_run);
        schedule.next_run = next_run;
        schedule.last_status = Some(status.to_string());
        schedule.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete_schedule(&self, schedule_id: Uuid) -> StoreResult<bool> {
        Ok(self.schedules.write().await.remove(&schedule_id).is_some())
    }
}

#[async_trait]
impl ScanResultStore for InMemoryStore {
    async fn create_pending(&self, result: &ScanResult) -> StoreResult<()> {
        self.scans
            .write()
            .await
            .insert(result.scan_id, result.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        scan_id: Uuid,
        status: ScanStatus,
        error: Option<&str>,
        duration_seconds: Option<f64>,
    ) -> StoreResult<bool> {
        let mut scans = self.scans.write().await;
        let Some(scan) = scans.get_mut(&scan_id) else {
            return Ok(false);
        };
        scan.status = status;
        if let Some(e) = error {
            scan.error = Some(e.to_string());
        }
        if duration_seconds.is_some() {
            scan.duration_seconds = duration_seconds;
        }
        scan.updated_at = Utc::now();
        Ok(true)
    }

    async fn save_completed(&self, result: &ScanResult, _batch_size: usize) -> StoreResult<()> {
        let mut stored = result.clone();
        stored.updated_at = Utc::now();
        self.scans.write().await.insert(result.scan_id, stored);
        Ok(())
    }

    async fn get_scan(&self, scan_id: Uuid) -> StoreResult<Option<ScanResult>> {
        Ok(self.scans.read().await.get(&scan_id).cloned())
    }

    async fn list_scans(&self, filter: &ScanFilter) -> StoreResult<(Vec<ScanResult>, usize)> {
        let scans = self.scans.read().await;
        let mut matching: Vec<ScanResult> = scans
            .values()
            .filter(|s| {
                filter.domain.as_deref().map_or(true, |d| s.domain == d)
                    && filter.status.map_or(true, |st| s.status == st)
                    && filter.scan_mode.map_or(true, |m| s.scan_mode == m)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp_utc.cmp(&a.timestamp_utc));

        let total = matching.len();
        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        let page = matching
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .collect();
        Ok((page, total))
    }

    async fn delete_scan(&self, scan_id: Uuid) -> StoreResult<bool> {
        Ok(self.scans.write().await.remove(&scan_id).is_some())
    }
}

#[async_trait]
impl JobExecutionStore for InMemoryStore {
    async fn start(&self, execution: &JobExecution) -> StoreResult<()> {
        self.executions
            .write()
            .await
            .insert(execution.execution_id, execution.clone());
        Ok(())
    }

    async fn complete(
        &self,
        execution_id: Uuid,
        completion: ExecutionCompletion,
    ) -> StoreResult<bool> {
        let mut executions = self.executions.write().await;
        let Some(execution) = executions.get_mut(&execution_id) else {
            return Ok(false);
        };
        execution.status = completion.status;
        execution.completed_at = Some(completion.completed_at);
        execution.duration_seconds = Some(completion.duration_seconds);
        execution.scan_id = completion.scan_id;
        execution.error_message = completion.error_message;
        execution.error_details = completion.error_details;
        Ok(true)
    }

    async fn get_execution(&self, execution_id: Uuid) -> StoreResult<Option<JobExecution>> {
        Ok(self.executions.read().await.get(&execution_id).cloned())
    }

    async fn list_by_schedule(
        &self,
        schedule_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<JobExecution>> {
        let executions = self.executions.read().await;
        let mut matching: Vec<JobExecution> = executions
            .values()
            .filter(|e| e.schedule_id == schedule_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        let limit = if limit == 0 { 50 } else { limit };
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut executions = self.executions.write().await;
        let before = executions.len();
        executions.retain(|_, e| e.started_at >= cutoff);
        Ok((before - executions.len()) as u64)
    }
}

#[async_trait]
impl OverrideStore for InMemoryStore {
    async fn overrides_for(
        &self,
        domain_config_id: &str,
    ) -> StoreResult<HashMap<String, Classification>> {
        Ok(self
            .overrides
            .read()
            .await
            .get(domain_config_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cookiescan_kernel::model::scan::{ScanMode, ScanParams};
    use cookiescan_kernel::model::schedule::{Frequency, TimeConfig};

    #[tokio::test]
    async fn create_read_delete_cycle() {
        let store = InMemoryStore::new();
        let id = store
            .create(NewSchedule {
                domain_config_id: "cfg".into(),
                domain: "https://example.test".into(),
                scan_type: ScanMode::Quick,
                scan_params: ScanParams::default(),
                frequency: Frequency::Hourly,
                time_config: TimeConfig::hourly(5),
                enabled: true,
                profile_id: None,
            })
            .await
            .unwrap();

        assert!(store.get_schedule(id).await.unwrap().is_some());
        assert!(store.delete_schedule(id).await.unwrap());
        assert!(store.get_schedule(id).await.unwrap().is_none());
        assert!(!store.delete_schedule(id).await.unwrap());
    }

    #[tokio::test]
    async fn disabled_schedules_are_filtered_from_enabled_listing() {
        let store = InMemoryStore::new();
        let id = store
            .create(NewSchedule {
                domain_config_id: "cfg".into(),
                domain: "https://example.test".into(),
                scan_type: ScanMode::Quick,
                scan_params: ScanParams::default(),
                frequency: Frequency::Hourly,
                time_config: TimeConfig::hourly(5),
                enabled: false,
                profile_id: None,
            })
            .await
            .unwrap();

        assert!(store.list_schedules(true).await.unwrap().is_empty());
        assert_eq!(store.list_schedules(false).await.unwrap().len(), 1);

        store
            .update(
                id,
                SchedulePatch {
                    enabled: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(store.list_schedules(true).await.unwrap().len(), 1);
    }
}
