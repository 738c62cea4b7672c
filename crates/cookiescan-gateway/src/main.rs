//! Service entry point: wires configuration, stores, classifier, browser
//! pool, scheduler, and the HTTP surface together.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cookiescan_foundation::classifier::ClassifierContext;
use cookiescan_foundation::locking::SqlLock;
use cookiescan_foundation::persistence::sqlite::SqliteStore;
use cookiescan_kernel::config::ServiceConfig;
use cookiescan_kernel::progress::ProgressBus;
use cookiescan_kernel::store::{
    DynJobExecutionStore, DynOverrideStore, DynScanResultStore, DynScheduleStore,
};
use cookiescan_runtime::browser::cdp::ChromiumLauncher;
use cookiescan_runtime::browser::pool::BrowserPool;
use cookiescan_runtime::coordinator::ScanCoordinator;
use cookiescan_runtime::dispatcher::{CronDispatcher, TriggerPolicy};
use cookiescan_runtime::executor::ScanExecutor;
use cookiescan_runtime::sync::{spawn_sync_loop, ScheduleSync};
use cookiescan_runtime::watcher::ScheduleWatcher;

use cookiescan_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServiceConfig::from_env();
    info!(database_url = %config.database_url, bind_addr = %config.bind_addr, "starting cookiescan");

    // Persistence + lock share one pool.
    let store = Arc::new(
        SqliteStore::connect(&config.database_url)
            .await
            .context("failed to connect to the database")?,
    );
    let lock = Arc::new(SqlLock::new(store.pool().clone()));

    let schedules: DynScheduleStore = store.clone();
    let scans: DynScanResultStore = store.clone();
    let executions: DynJobExecutionStore = store.clone();
    let overrides: DynOverrideStore = store.clone();

    // Classifier context: rules + GVL loaded once.
    let mut classifier_builder = ClassifierContext::builder()
        .gvl_source(config.gvl_url.clone(), &config.gvl_cache_path)
        .request_timeout(Duration::from_secs(config.request_timeout_seconds))
        .override_store(overrides);
    if let Some(rules_path) = &config.rules_path {
        classifier_builder = classifier_builder.rules_path(rules_path);
    }
    let classifier = Arc::new(classifier_builder.build().await);

    // Browser pool. A failed warm-up is not fatal; instances are created
    // on demand at the first scan.
    let browser_pool = BrowserPool::new(config.browser.clone(), Arc::new(ChromiumLauncher::new()));
    if let Err(e) = browser_pool.initialize().await {
        warn!(error = %e, "browser pool warm-up failed; instances will launch on demand");
    }

    let executor = Arc::new(ScanExecutor::new(
        scans.clone(),
        classifier,
        ProgressBus::new(),
        Arc::clone(&browser_pool),
    ));

    let coordinator = Arc::new(ScanCoordinator::new(
        lock,
        schedules.clone(),
        executions.clone(),
        Arc::clone(&executor),
        Duration::from_secs(config.lock_ttl_seconds),
    ));
    let dispatcher = Arc::new(CronDispatcher::new(
        coordinator,
        TriggerPolicy {
            misfire_grace: Duration::from_secs(config.misfire_grace_seconds),
            max_workers: config.max_workers,
        },
    ));

    // External schedule source: one sync at boot, then the periodic loop.
    let schedule_sync = match &config.schedule_source_url {
        Some(url) => {
            let sync = Arc::new(
                ScheduleSync::new(url.clone(), Duration::from_secs(config.request_timeout_seconds))
                    .context("failed to build schedule source client")?,
            );
            if let Err(e) = sync.run_once(&schedules).await {
                error!(error = %e, "initial external schedule sync failed");
            }
            spawn_sync_loop(
                Arc::clone(&sync),
                schedules.clone(),
                Duration::from_secs(config.sync_interval_seconds),
            );
            Some(sync)
        }
        None => None,
    };

    // Install triggers for everything currently enabled, then watch for
    // live edits.
    dispatcher.sync_from_store(&schedules).await;

    let watcher = Arc::new(ScheduleWatcher::new(schedules.clone()));
    watcher.initialize().await;
    {
        let watcher = Arc::clone(&watcher);
        let dispatcher = Arc::clone(&dispatcher);
        let schedules = schedules.clone();
        let interval = Duration::from_secs(config.schedule_check_interval_seconds.max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let changes = watcher.check_once().await;
                if !changes.is_empty() {
                    dispatcher.apply_changes(&changes, &schedules).await;
                }
            }
        });
    }

    // Job-execution retention.
    {
        let executions = executions.clone();
        let retention_days = config.execution_retention_days;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                let cutoff = Utc::now() - chrono::Duration::days(retention_days);
                match executions.purge_older_than(cutoff).await {
                    Ok(removed) if removed > 0 => {
                        info!(removed, "purged old job executions");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "job execution retention pass failed"),
                }
            }
        });
    }

    // Terminal progress snapshots are kept for late subscribers, then
    // collected.
    {
        let progress = executor.progress().clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                progress.gc(chrono::Duration::seconds(300), Utc::now());
            }
        });
    }

    let state = AppState::new(
        config,
        schedules,
        scans,
        executions,
        executor,
        dispatcher,
        browser_pool,
        schedule_sync,
    );
    cookiescan_gateway::server::serve(state)
        .await
        .context("http server failed")?;
    Ok(())
}
