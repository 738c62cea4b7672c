//! Schedule watcher: turns repository state into change events.
//!
//! Every tick the watcher reads all schedules (disabled included), hashes
//! the scheduling-relevant subset of each, and diffs against the previous
//! tick's map. A repository read failure yields an empty diff with the map
//! untouched — the watcher never crashes and never reports phantom
//! removals on a flaky read.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use cookiescan_kernel::store::DynScheduleStore;

/// One tick's worth of detected changes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScheduleChanges {
    pub added: Vec<Uuid>,
    pub modified: Vec<Uuid>,
    pub removed: Vec<Uuid>,
}

impl ScheduleChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

pub struct ScheduleWatcher {
    store: DynScheduleStore,
    fingerprints: Mutex<HashMap<Uuid, String>>,
    last_check: Mutex<Option<DateTime<Utc>>>,
}

impl ScheduleWatcher {
    pub fn new(store: DynScheduleStore) -> Self {
        Self {
            store,
            fingerprints: Mutex::new(HashMap::new()),
            last_check: Mutex::new(None),
        }
    }

    /// Seed the fingerprint map from current repository state so the first
    /// `check_once` call reports only real changes.
    pub async fn initialize(&self) -> usize {
        match self.store.list_schedules(false).await {
            Ok(schedules) => {
                let mut map = self.fingerprints.lock();
                map.clear();
                for schedule in &schedules {
                    map.insert(schedule.schedule_id, schedule.scheduling_fingerprint());
                }
                *self.last_check.lock() = Some(Utc::now());
                tracing::info!(count = schedules.len(), "schedule watcher initialized");
                schedules.len()
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to initialize schedule watcher");
                0
            }
        }
    }

    /// One diff pass. Never fails; a read error produces an empty diff.
    pub async fn check_once(&self) -> ScheduleChanges {
        let schedules = match self.store.list_schedules(false).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "error detecting schedule changes");
                return ScheduleChanges::default();
            }
        };

        let mut changes = ScheduleChanges::default();
        let mut current: HashMap<Uuid, String> = HashMap::with_capacity(schedules.len());

        {
            let previous = self.fingerprints.lock();
            for schedule in &schedules {
                let fingerprint = schedule.scheduling_fingerprint();
                match previous.get(&schedule.schedule_id) {
                    None => changes.added.push(schedule.schedule_id),
                    Some(old) if *old != fingerprint => {
                        changes.modified.push(schedule.schedule_id)
                    }
                    Some(_) => {}
                }
                current.insert(schedule.schedule_id, fingerprint);
            }
            for id in previous.keys() {
                if !current.contains_key(id) {
                    changes.removed.push(*id);
                }
            }
        }

        *self.fingerprints.lock() = current;
        *self.last_check.lock() = Some(Utc::now());

        if !changes.is_empty() {
            tracing::info!(
                added = changes.added.len(),
                modified = changes.modified.len(),
                removed = changes.removed.len(),
                "schedule changes detected"
            );
        }
        changes
    }

    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        *self.last_check.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cookiescan_foundation::persistence::memory::InMemoryStore;
    use cookiescan_kernel::model::scan::{ScanMode, ScanParams};
    use cookiescan_kernel::model::schedule::{Frequency, TimeConfig};
    use cookiescan_kernel::store::{NewSchedule, SchedulePatch, ScheduleStore};
    use std::sync::Arc;

    fn new_schedule(domain: &str) -> NewSchedule {
        NewSchedule {
            domain_config_id: domain.to_string(),
            domain: format!("https://{domain}"),
            scan_type: ScanMode::Quick,
            scan_params: ScanParams::default(),
            frequency: Frequency::Daily,
            time_config: TimeConfig::daily(9, 0),
            enabled: true,
            profile_id: None,
        }
    }

    #[tokio::test]
    async fn detects_added_modified_removed() {
        let store = InMemoryStore::shared();
        let watcher = ScheduleWatcher::new(store.clone());
        watcher.initialize().await;

        // Add.
        let id = store.create(new_schedule("a.test")).await.unwrap();
        let changes = watcher.check_once().await;
        assert_eq!(changes.added, vec![id]);
        assert!(changes.modified.is_empty());

        // No change => empty diff.
        assert!(watcher.check_once().await.is_empty());

        // Modify time config.
        store
            .update(
                id,
                SchedulePatch {
                    time_config: Some(TimeConfig::daily(10, 0)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let changes = watcher.check_once().await;
        assert_eq!(changes.modified, vec![id]);

        // Remove.
        store.delete_schedule(id).await.unwrap();
        let changes = watcher.check_once().await;
        assert_eq!(changes.removed, vec![id]);
    }

    #[tokio::test]
    async fn run_metadata_updates_do_not_count_as_modifications() {
        let store = InMemoryStore::shared();
        let watcher = ScheduleWatcher::new(store.clone());
        let id = store.create(new_schedule("a.test")).await.unwrap();
        watcher.initialize().await;

        store
            .update_run_status(id, Utc::now(), None, "success")
            .await
            .unwrap();
        assert!(watcher.check_once().await.is_empty());
    }

    #[tokio::test]
    async fn disabling_a_schedule_is_a_modification() {
        let store = InMemoryStore::shared();
        let watcher = ScheduleWatcher::new(store.clone());
        let id = store.create(new_schedule("a.test")).await.unwrap();
        watcher.initialize().await;

        store
            .update(
                id,
                SchedulePatch {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(watcher.check_once().await.modified, vec![id]);
    }

    /// A store wrapper whose list() can be made to fail.
    struct FlakyStore {
        inner: Arc<InMemoryStore>,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl ScheduleStore for FlakyStore {
        async fn create(&self, new: NewSchedule) -> cookiescan_kernel::store::StoreResult<Uuid> {
            self.inner.create(new).await
        }
        async fn get_schedule(
            &self,
            id: Uuid,
        ) -> cookiescan_kernel::store::StoreResult<Option<cookiescan_kernel::model::schedule::Schedule>>
        {
            self.inner.get_schedule(id).await
        }
        async fn list_schedules(
            &self,
            enabled_only: bool,
        ) -> cookiescan_kernel::store::StoreResult<Vec<cookiescan_kernel::model::schedule::Schedule>>
        {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(cookiescan_kernel::store::StoreError::Connection(
                    "connection reset".into(),
                ));
            }
            self.inner.list_schedules(enabled_only).await
        }
        async fn list_by_domain_config_id(
            &self,
            id: &str,
        ) -> cookiescan_kernel::store::StoreResult<Vec<cookiescan_kernel::model::schedule::Schedule>>
        {
            self.inner.list_by_domain_config_id(id).await
        }
        async fn update(
            &self,
            id: Uuid,
            patch: SchedulePatch,
        ) -> cookiescan_kernel::store::StoreResult<bool> {
            self.inner.update(id, patch).await
        }
        async fn update_run_status(
            &self,
            id: Uuid,
            last_run: DateTime<Utc>,
            next_run: Option<DateTime<Utc>>,
            status: &str,
        ) -> cookiescan_kernel::store::StoreResult<bool> {
            self.inner.update_run_status(id, last_run, next_run, status).await
        }
        async fn delete_schedule(&self, id: Uuid) -> cookiescan_kernel::store::StoreResult<bool> {
            self.inner.delete_schedule(id).await
        }
    }

    #[tokio::test]
    async fn read_errors_leave_the_map_untouched() {
        let inner = InMemoryStore::shared();
        let store = Arc::new(FlakyStore {
            inner: inner.clone(),
            fail: std::sync::atomic::AtomicBool::new(false),
        });
        let watcher = ScheduleWatcher::new(store.clone());
        let id = inner.create(new_schedule("a.test")).await.unwrap();
        watcher.initialize().await;

        // Failing read: empty diff, no phantom removal.
        store.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(watcher.check_once().await.is_empty());

        // Recovery: the schedule is still known, so still no diff.
        store.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        assert!(watcher.check_once().await.is_empty());

        // And a real delete is now reported exactly once.
        inner.delete_schedule(id).await.unwrap();
        assert_eq!(watcher.check_once().await.removed, vec![id]);
    }
}
