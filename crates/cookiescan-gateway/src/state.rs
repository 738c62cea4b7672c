//! Shared application state injected into every handler.

use std::sync::Arc;

use tokio::sync::Semaphore;

use cookiescan_kernel::config::ServiceConfig;
use cookiescan_kernel::store::{DynJobExecutionStore, DynScanResultStore, DynScheduleStore};
use cookiescan_runtime::browser::pool::BrowserPool;
use cookiescan_runtime::dispatcher::CronDispatcher;
use cookiescan_runtime::executor::ScanExecutor;
use cookiescan_runtime::sync::ScheduleSync;

pub struct AppState {
    pub config: ServiceConfig,
    pub schedules: DynScheduleStore,
    pub scans: DynScanResultStore,
    pub executions: DynJobExecutionStore,
    pub executor: Arc<ScanExecutor>,
    pub dispatcher: Arc<CronDispatcher>,
    pub browser_pool: Arc<BrowserPool>,
    /// Gates API-triggered parallel scans, layered on top of the browser
    /// pool's own capacity.
    pub scan_semaphore: Arc<Semaphore>,
    /// Present only when an external schedule source is configured.
    pub schedule_sync: Option<Arc<ScheduleSync>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ServiceConfig,
        schedules: DynScheduleStore,
        scans: DynScanResultStore,
        executions: DynJobExecutionStore,
        executor: Arc<ScanExecutor>,
        dispatcher: Arc<CronDispatcher>,
        browser_pool: Arc<BrowserPool>,
        schedule_sync: Option<Arc<ScheduleSync>>,
    ) -> Arc<Self> {
        let scan_semaphore = Arc::new(Semaphore::new(config.max_scan_concurrency.max(1)));
        Arc::new(Self {
            config,
            schedules,
            scans,
            executions,
            executor,
            dispatcher,
            browser_pool,
            scan_semaphore,
            schedule_sync,
        })
    }
}
