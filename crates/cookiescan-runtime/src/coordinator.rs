//! Scan coordinator: one cron firing → one locked, audited scan run.
//!
//! Sequence per firing:
//!
//! 1. non-blocking distributed-lock acquire on the schedule id — a miss
//!    means another replica owns this firing and is silently skipped;
//! 2. insert a `started` job-execution row;
//! 3. delegate to the scan executor (panic-contained);
//! 4. complete the execution row with status, duration, and scan id;
//! 5. update the schedule's last run / next run / last status;
//! 6. release the lock on every exit path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use cookiescan_kernel::lock::{lock_key, DynDistributedLock};
use cookiescan_kernel::model::execution::{ExecutionStatus, JobExecution};
use cookiescan_kernel::model::scan::ScanStatus;
use cookiescan_kernel::model::schedule::Schedule;
use cookiescan_kernel::store::{DynJobExecutionStore, DynScheduleStore, ExecutionCompletion};

use crate::dispatcher::ScanRunner;
use crate::executor::{ScanExecutor, ScanOutcome};
use crate::trigger::TriggerSpec;

pub struct ScanCoordinator {
    lock: DynDistributedLock,
    schedules: DynScheduleStore,
    executions: DynJobExecutionStore,
    executor: Arc<ScanExecutor>,
    lock_ttl: Duration,
}

impl ScanCoordinator {
    pub fn new(
        lock: DynDistributedLock,
        schedules: DynScheduleStore,
        executions: DynJobExecutionStore,
        executor: Arc<ScanExecutor>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            lock,
            schedules,
            executions,
            executor,
            lock_ttl,
        }
    }

    pub async fn run_schedule(&self, schedule: Schedule) {
        let resource = lock_key(&schedule.schedule_id);

        let token = match self.lock.acquire(&resource, self.lock_ttl).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                // Expected under multi-replica deployment; not an error.
                tracing::info!(
                    schedule_id = %schedule.schedule_id,
                    domain = %schedule.domain,
                    "schedule already running on another instance; skipping"
                );
                return;
            }
            Err(e) => {
                tracing::error!(
                    schedule_id = %schedule.schedule_id,
                    error = %e,
                    "lock acquisition failed"
                );
                return;
            }
        };

        let execution = JobExecution::started(
            schedule.schedule_id,
            schedule.domain.clone(),
            schedule.domain.clone(),
            schedule.domain_config_id.clone(),
            Utc::now(),
        );
        if let Err(e) = self.executions.start(&execution).await {
            tracing::error!(
                schedule_id = %schedule.schedule_id,
                error = %e,
                "failed to record job start"
            );
        }

        tracing::info!(
            schedule_id = %schedule.schedule_id,
            domain = %schedule.domain,
            execution_id = %execution.execution_id,
            "starting scheduled scan"
        );
        let outcome = self.execute_guarded(&schedule).await;

        let now = Utc::now();
        let duration = (now - execution.started_at).num_milliseconds() as f64 / 1000.0;
        let (status, scan_id, error_message) = match &outcome {
            Ok(o) if o.status == ScanStatus::Cancelled => {
                (ExecutionStatus::Cancelled, Some(o.scan_id), None)
            }
            Ok(o) => (ExecutionStatus::Success, Some(o.scan_id), None),
            Err(message) => (ExecutionStatus::Failed, None, Some(message.clone())),
        };

        let completion = ExecutionCompletion {
            status,
            completed_at: now,
            duration_seconds: duration,
            scan_id,
            error_message: error_message.clone(),
            error_details: error_message
                .as_ref()
                .map(|m| serde_json::json!({ "error": m })),
        };
        if let Err(e) = self.executions.complete(execution.execution_id, completion).await {
            tracing::error!(
                execution_id = %execution.execution_id,
                error = %e,
                "failed to record job completion"
            );
        }

        let next_run = TriggerSpec::from_schedule(schedule.frequency, &schedule.time_config)
            .ok()
            .and_then(|spec| spec.next_after(now));
        if let Err(e) = self
            .schedules
            .update_run_status(schedule.schedule_id, now, next_run, status.as_str())
            .await
        {
            tracing::error!(
                schedule_id = %schedule.schedule_id,
                error = %e,
                "failed to update schedule run status"
            );
        }

        // Release on every exit path; a failed release leaves the TTL to
        // clean up.
        match self.lock.release(&resource, &token).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    schedule_id = %schedule.schedule_id,
                    "lock already released or taken over (TTL lapse?)"
                );
            }
            Err(e) => {
                tracing::error!(schedule_id = %schedule.schedule_id, error = %e, "lock release failed");
            }
        }
    }

    /// Run the executor inside its own task so a panic in the scan core is
    /// contained to this firing instead of taking the process down.
    async fn execute_guarded(&self, schedule: &Schedule) -> Result<ScanOutcome, String> {
        let executor = Arc::clone(&self.executor);
        let schedule = schedule.clone();

        let handle = tokio::spawn(async move {
            let pending = executor
                .create_scan(
                    &schedule.domain_config_id,
                    &schedule.domain,
                    schedule.scan_type,
                    schedule.scan_params.clone(),
                )
                .await?;
            executor.execute(&pending).await
        });

        match handle.await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(e.to_string()),
            Err(join_error) => Err(format!("scan executor panicked: {join_error}")),
        }
    }
}

#[async_trait]
impl ScanRunner for ScanCoordinator {
    async fn run(&self, schedule: Schedule) {
        self.run_schedule(schedule).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::pool::BrowserPool;
    use crate::executor::testing::{PageScript, ScriptedBrowser, ScriptedLauncher};
    use cookiescan_foundation::classifier::ClassifierContext;
    use cookiescan_foundation::locking::InMemoryLock;
    use cookiescan_foundation::persistence::memory::InMemoryStore;
    use cookiescan_kernel::classify::NoModel;
    use cookiescan_kernel::config::BrowserPoolConfig;
    use cookiescan_kernel::model::scan::{ScanMode, ScanParams};
    use cookiescan_kernel::store::ScanFilter;
    use cookiescan_kernel::model::schedule::{Frequency, TimeConfig};
    use cookiescan_kernel::progress::ProgressBus;
    use cookiescan_kernel::store::{JobExecutionStore, ScanResultStore};
    use std::collections::HashMap;
    use uuid::Uuid;

    async fn coordinator(
        store: Arc<InMemoryStore>,
        lock: Arc<InMemoryLock>,
    ) -> ScanCoordinator {
        let classifier = Arc::new(
            ClassifierContext::builder()
                .with_vendor_list(None)
                .model(Arc::new(NoModel))
                .override_store(store.clone())
                .build()
                .await,
        );
        let pool = BrowserPool::new(
            BrowserPoolConfig {
                pool_size: 2,
                ..BrowserPoolConfig::default()
            },
            ScriptedLauncher::new(ScriptedBrowser::single(
                "https://example.test",
                PageScript::default(),
            )),
        );
        let executor = Arc::new(ScanExecutor::new(
            store.clone(),
            classifier,
            ProgressBus::new(),
            pool,
        ));
        ScanCoordinator::new(
            lock,
            store.clone(),
            store.clone(),
            executor,
            Duration::from_secs(300),
        )
    }

    fn schedule() -> Schedule {
        let mut params = ScanParams::default();
        params.wait_strategy = cookiescan_kernel::model::scan::WaitStrategy::DomContentLoaded;
        Schedule {
            schedule_id: Uuid::new_v4(),
            domain_config_id: "cfg-1".into(),
            domain: "https://example.test".into(),
            scan_type: ScanMode::Quick,
            scan_params: params,
            frequency: Frequency::Daily,
            time_config: TimeConfig::daily(9, 0),
            enabled: true,
            profile_id: None,
            last_run: None,
            next_run: None,
            last_status: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn successful_run_records_execution_and_result() {
        let store = InMemoryStore::shared();
        let lock = Arc::new(InMemoryLock::new());
        let coordinator = coordinator(store.clone(), lock.clone()).await;
        let schedule = schedule();

        // Seed the schedule so run-status updates land somewhere.
        let schedule_id = schedule.schedule_id;
        coordinator.run_schedule(schedule.clone()).await;

        let executions = store.list_by_schedule(schedule_id, 10, 0).await.unwrap();
        assert_eq!(executions.len(), 1);
        let execution = &executions[0];
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert!(execution.duration_seconds.is_some());
        assert!(execution.scan_id.is_some());

        let (scans, _) = store.list_scans(&ScanFilter::default()).await.unwrap();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].status, ScanStatus::Success);

        // Lock was released: a second firing runs again.
        coordinator.run_schedule(schedule).await;
        let executions = store.list_by_schedule(schedule_id, 10, 0).await.unwrap();
        assert_eq!(executions.len(), 2);
    }

    #[tokio::test]
    async fn contended_firing_is_silently_skipped() {
        let store = InMemoryStore::shared();
        let lock = Arc::new(InMemoryLock::new());
        let coordinator = coordinator(store.clone(), lock.clone()).await;
        let schedule = schedule();

        // Another replica holds the lock.
        use cookiescan_kernel::lock::DistributedLock;
        let _held = lock
            .acquire(&lock_key(&schedule.schedule_id), Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        coordinator.run_schedule(schedule.clone()).await;

        // No execution row, no scan result.
        let executions = store
            .list_by_schedule(schedule.schedule_id, 10, 0)
            .await
            .unwrap();
        assert!(executions.is_empty());
        let (scans, _) = store.list_scans(&ScanFilter::default()).await.unwrap();
        assert!(scans.is_empty());
    }

    #[tokio::test]
    async fn simultaneous_firings_produce_exactly_one_execution() {
        let store = InMemoryStore::shared();
        let lock = Arc::new(InMemoryLock::new());
        let a = coordinator(store.clone(), lock.clone()).await;
        let b = coordinator(store.clone(), lock.clone()).await;
        let schedule = schedule();

        tokio::join!(
            a.run_schedule(schedule.clone()),
            b.run_schedule(schedule.clone())
        );

        let executions = store
            .list_by_schedule(schedule.schedule_id, 10, 0)
            .await
            .unwrap();
        assert_eq!(executions.len(), 1, "only one replica may reach the executor");
        let (scans, _) = store.list_scans(&ScanFilter::default()).await.unwrap();
        assert_eq!(scans.len(), 1);
    }

    #[tokio::test]
    async fn failed_run_records_failure_and_releases_lock() {
        let store = InMemoryStore::shared();
        let lock = Arc::new(InMemoryLock::new());
        let coordinator = coordinator(store.clone(), lock.clone()).await;

        let mut schedule = schedule();
        // Out-of-range wait budget fails scan creation.
        schedule.scan_params.wait_for_dynamic_content = 2;

        coordinator.run_schedule(schedule.clone()).await;

        let executions = store
            .list_by_schedule(schedule.schedule_id, 10, 0)
            .await
            .unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Failed);
        assert!(executions[0].error_message.is_some());

        // Lock released despite the failure.
        use cookiescan_kernel::lock::DistributedLock;
        let reacquired = lock
            .acquire(&lock_key(&schedule.schedule_id), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(reacquired.is_some());
    }
}
