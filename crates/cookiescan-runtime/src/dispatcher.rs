//! Cron dispatcher: one trigger task per enabled schedule.
//!
//! Each installed schedule gets a tokio task that sleeps until the next
//! fire time and then hands the schedule to the [`ScanRunner`] on a bounded
//! worker pool. Policies:
//!
//! - **coalesce** — after every wake the next fire time is recomputed from
//!   the current instant, so a burst of missed fire times (sleep, downtime)
//!   collapses into at most one firing;
//! - **misfire grace** — a firing delayed beyond the grace window is
//!   dropped with a log;
//! - **in-flight cap** — a per-schedule semaphore of one; a tick that
//!   arrives while the previous run is still executing is skipped. Global
//!   mutual exclusion across replicas belongs to the distributed lock, not
//!   to this cap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{oneshot, RwLock, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use cookiescan_kernel::model::schedule::Schedule;
use cookiescan_kernel::store::DynScheduleStore;

use crate::trigger::{TriggerError, TriggerSpec};
use crate::watcher::ScheduleChanges;

/// Invoked once per accepted firing. Implemented by the scan coordinator;
/// tests substitute a recorder.
#[async_trait]
pub trait ScanRunner: Send + Sync {
    async fn run(&self, schedule: Schedule);
}

/// Dispatcher-wide trigger policies.
#[derive(Debug, Clone)]
pub struct TriggerPolicy {
    /// Firings delayed beyond this window are dropped.
    pub misfire_grace: Duration,
    /// Bounded worker pool for trigger invocations.
    pub max_workers: usize,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            misfire_grace: Duration::from_secs(300),
            max_workers: 5,
        }
    }
}

struct TriggerEntry {
    job_id: String,
    spec: TriggerSpec,
    cancel_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct CronDispatcher {
    runner: Arc<dyn ScanRunner>,
    workers: Arc<Semaphore>,
    policy: TriggerPolicy,
    entries: RwLock<HashMap<Uuid, TriggerEntry>>,
}

impl CronDispatcher {
    pub fn new(runner: Arc<dyn ScanRunner>, policy: TriggerPolicy) -> Self {
        let workers = Arc::new(Semaphore::new(policy.max_workers.max(1)));
        Self {
            runner,
            workers,
            policy,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Install (or reinstall) the trigger for a schedule. Disabled
    /// schedules get no trigger; any existing one is removed. Returns
    /// whether a trigger is now installed.
    pub async fn install(&self, schedule: &Schedule) -> Result<bool, TriggerError> {
        self.uninstall(schedule.schedule_id).await;

        if !schedule.enabled {
            tracing::debug!(schedule_id = %schedule.schedule_id, "schedule disabled; no trigger");
            return Ok(false);
        }

        let spec = TriggerSpec::from_schedule(schedule.frequency, &schedule.time_config)?;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = self.spawn_trigger_task(schedule.clone(), spec.clone(), cancel_rx);

        let entry = TriggerEntry {
            job_id: schedule.domain.clone(),
            spec,
            cancel_tx,
            task,
        };
        self.entries
            .write()
            .await
            .insert(schedule.schedule_id, entry);

        tracing::info!(
            schedule_id = %schedule.schedule_id,
            job_id = %schedule.domain,
            "installed trigger"
        );
        Ok(true)
    }

    /// Remove a schedule's trigger if present.
    pub async fn uninstall(&self, schedule_id: Uuid) -> bool {
        let Some(entry) = self.entries.write().await.remove(&schedule_id) else {
            return false;
        };
        if entry.cancel_tx.send(()).is_err() {
            // Task already gone, or wedged between polls; make sure.
            entry.task.abort();
        }
        tracing::info!(schedule_id = %schedule_id, job_id = %entry.job_id, "removed trigger");
        true
    }

    /// Apply a watcher diff: removed ⇒ uninstall; added/modified ⇒ reload
    /// from the repository and reinstall. Bad records are skipped with a
    /// log and never take the dispatcher down.
    pub async fn apply_changes(&self, changes: &ScheduleChanges, store: &DynScheduleStore) {
        for schedule_id in &changes.removed {
            self.uninstall(*schedule_id).await;
        }

        for schedule_id in changes.added.iter().chain(&changes.modified) {
            match store.get_schedule(*schedule_id).await {
                Ok(Some(schedule)) => {
                    if let Err(e) = self.install(&schedule).await {
                        tracing::warn!(
                            schedule_id = %schedule_id,
                            error = %e,
                            "skipping schedule with invalid trigger config"
                        );
                    }
                }
                Ok(None) => {
                    self.uninstall(*schedule_id).await;
                }
                Err(e) => {
                    tracing::error!(schedule_id = %schedule_id, error = %e, "failed to load schedule");
                }
            }
        }
    }

    /// Install triggers for every enabled schedule in the repository.
    /// Returns how many were installed.
    pub async fn sync_from_store(&self, store: &DynScheduleStore) -> usize {
        let schedules = match store.list_schedules(true).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to list schedules for trigger sync");
                return 0;
            }
        };

        let mut installed = 0;
        for schedule in &schedules {
            match self.install(schedule).await {
                Ok(true) => installed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        schedule_id = %schedule.schedule_id,
                        error = %e,
                        "skipping schedule with invalid trigger config"
                    );
                }
            }
        }
        tracing::info!(installed, "synced triggers from repository");
        installed
    }

    pub async fn has_trigger(&self, schedule_id: Uuid) -> bool {
        self.entries.read().await.contains_key(&schedule_id)
    }

    pub async fn trigger_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Next predicted fire time for a schedule's trigger.
    pub async fn next_run(&self, schedule_id: Uuid) -> Option<chrono::DateTime<Utc>> {
        let entries = self.entries.read().await;
        entries
            .get(&schedule_id)
            .and_then(|entry| entry.spec.next_after(Utc::now()))
    }

    /// Cancel every trigger (shutdown path).
    pub async fn shutdown(&self) {
        let mut entries = self.entries.write().await;
        for (_, entry) in entries.drain() {
            if entry.cancel_tx.send(()).is_err() {
                entry.task.abort();
            }
        }
    }

    fn spawn_trigger_task(
        &self,
        schedule: Schedule,
        spec: TriggerSpec,
        mut cancel_rx: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        let runner = Arc::clone(&self.runner);
        let workers = Arc::clone(&self.workers);
        let misfire_grace =
            chrono::Duration::from_std(self.policy.misfire_grace).unwrap_or_default();
        let inflight = Arc::new(Semaphore::new(1));

        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let Some(next) = spec.next_after(now) else {
                    tracing::warn!(schedule_id = %schedule.schedule_id, "trigger has no future fire times");
                    return;
                };
                let delay = (next - now).to_std().unwrap_or_default();

                tokio::select! {
                    _ = &mut cancel_rx => {
                        tracing::debug!(schedule_id = %schedule.schedule_id, "trigger cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                // Recomputing `next` from now() on the next loop pass
                // collapses any fire times missed while asleep: coalescing.
                let lateness = Utc::now() - next;
                if lateness > misfire_grace {
                    tracing::warn!(
                        schedule_id = %schedule.schedule_id,
                        late_seconds = lateness.num_seconds(),
                        "dropping misfired trigger"
                    );
                    continue;
                }

                let Ok(inflight_permit) = Arc::clone(&inflight).try_acquire_owned() else {
                    tracing::debug!(
                        schedule_id = %schedule.schedule_id,
                        "previous run still in flight; skipping tick"
                    );
                    continue;
                };

                let runner = Arc::clone(&runner);
                let workers = Arc::clone(&workers);
                let schedule = schedule.clone();
                tokio::spawn(async move {
                    let _inflight = inflight_permit;
                    let _worker = match workers.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };
                    runner.run(schedule).await;
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cookiescan_kernel::model::scan::{ScanMode, ScanParams};
    use cookiescan_kernel::model::schedule::{Frequency, TimeConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        runs: AtomicUsize,
        hold: Option<Duration>,
    }

    #[async_trait]
    impl ScanRunner for CountingRunner {
        async fn run(&self, _schedule: Schedule) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if let Some(hold) = self.hold {
                tokio::time::sleep(hold).await;
            }
        }
    }

    fn every_second_schedule(enabled: bool) -> Schedule {
        Schedule {
            schedule_id: Uuid::new_v4(),
            domain_config_id: "cfg".into(),
            domain: "https://example.test".into(),
            scan_type: ScanMode::Quick,
            scan_params: ScanParams::default(),
            frequency: Frequency::Custom,
            time_config: TimeConfig::custom("* * * * * *"),
            enabled,
            profile_id: None,
            last_run: None,
            next_run: None,
            last_status: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn dispatcher(hold: Option<Duration>) -> (CronDispatcher, Arc<CountingRunner>) {
        let runner = Arc::new(CountingRunner {
            runs: AtomicUsize::new(0),
            hold,
        });
        let dispatcher = CronDispatcher::new(runner.clone(), TriggerPolicy::default());
        (dispatcher, runner)
    }

    #[tokio::test]
    async fn enabled_schedule_fires() {
        let (dispatcher, runner) = dispatcher(None);
        let schedule = every_second_schedule(true);
        assert!(dispatcher.install(&schedule).await.unwrap());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(runner.runs.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn disabled_schedule_gets_no_trigger() {
        let (dispatcher, runner) = dispatcher(None);
        let schedule = every_second_schedule(false);
        assert!(!dispatcher.install(&schedule).await.unwrap());
        assert!(!dispatcher.has_trigger(schedule.schedule_id).await);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabling_removes_the_existing_trigger() {
        let (dispatcher, _runner) = dispatcher(None);
        let mut schedule = every_second_schedule(true);
        dispatcher.install(&schedule).await.unwrap();
        assert!(dispatcher.has_trigger(schedule.schedule_id).await);

        schedule.enabled = false;
        dispatcher.install(&schedule).await.unwrap();
        assert!(!dispatcher.has_trigger(schedule.schedule_id).await);
    }

    #[tokio::test]
    async fn uninstall_stops_firing() {
        let (dispatcher, runner) = dispatcher(None);
        let schedule = every_second_schedule(true);
        dispatcher.install(&schedule).await.unwrap();
        assert!(dispatcher.uninstall(schedule.schedule_id).await);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 0);
        // Second uninstall is a no-op.
        assert!(!dispatcher.uninstall(schedule.schedule_id).await);
    }

    #[tokio::test]
    async fn inflight_cap_skips_overlapping_ticks() {
        // The runner holds each run for 3 s while the trigger fires every
        // second; the per-schedule cap of one must swallow the overlap.
        let (dispatcher, runner) = dispatcher(Some(Duration::from_secs(3)));
        let schedule = every_second_schedule(true);
        dispatcher.install(&schedule).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2700)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_time_config_is_rejected_not_installed() {
        let (dispatcher, _runner) = dispatcher(None);
        let mut schedule = every_second_schedule(true);
        schedule.frequency = Frequency::Daily;
        schedule.time_config = TimeConfig::default();

        assert!(dispatcher.install(&schedule).await.is_err());
        assert!(!dispatcher.has_trigger(schedule.schedule_id).await);
    }

    #[tokio::test]
    async fn live_edits_flow_from_watcher_to_dispatcher() {
        use crate::watcher::ScheduleWatcher;
        use cookiescan_foundation::persistence::memory::InMemoryStore;
        use cookiescan_kernel::store::{
            DynScheduleStore, NewSchedule, SchedulePatch, ScheduleStore,
        };

        let store = InMemoryStore::shared();
        let dyn_store: DynScheduleStore = store.clone();
        let (dispatcher, _runner) = dispatcher(None);
        let watcher = ScheduleWatcher::new(dyn_store.clone());
        watcher.initialize().await;

        // Creation reaches the dispatcher on the next tick.
        let id = store
            .create(NewSchedule {
                domain_config_id: "cfg".into(),
                domain: "https://example.test".into(),
                scan_type: ScanMode::Quick,
                scan_params: ScanParams::default(),
                frequency: Frequency::Daily,
                time_config: TimeConfig::daily(9, 0),
                enabled: true,
                profile_id: None,
            })
            .await
            .unwrap();
        dispatcher
            .apply_changes(&watcher.check_once().await, &dyn_store)
            .await;
        assert!(dispatcher.has_trigger(id).await);
        let at_nine = dispatcher.next_run(id).await.unwrap();

        // An operator moves the daily fire time; the trigger is replaced
        // without a restart.
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
        dispatcher
            .apply_changes(&watcher.check_once().await, &dyn_store)
            .await;
        assert!(dispatcher.has_trigger(id).await);
        let at_ten = dispatcher.next_run(id).await.unwrap();
        assert_ne!(at_nine, at_ten);

        // Deletion uninstalls within one tick.
        store.delete_schedule(id).await.unwrap();
        dispatcher
            .apply_changes(&watcher.check_once().await, &dyn_store)
            .await;
        assert!(!dispatcher.has_trigger(id).await);
    }

    #[tokio::test]
    async fn next_run_is_reported_for_installed_triggers() {
        let (dispatcher, _runner) = dispatcher(None);
        let schedule = every_second_schedule(true);
        dispatcher.install(&schedule).await.unwrap();

        let next = dispatcher.next_run(schedule.schedule_id).await.unwrap();
        assert!(next > Utc::now() - chrono::Duration::seconds(1));
        assert!(next < Utc::now() + chrono::Duration::seconds(2));
    }
}
