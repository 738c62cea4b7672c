//! Scan executor.
//!
//! Performs one scan end to end: pulls a browser from the pool, crawls
//! pages per the scan mode, snapshots cookies around the consent click,
//! collects hashed web storage, emits progress, then hands everything to
//! the result writer for classification and batch persistence.
//!
//! # Modes
//!
//! - **quick** — root URL plus each `custom_pages` entry, no link
//!   following; `scan_depth` is ignored.
//! - **deep** — breadth-first crawl of internal links from the root, up to
//!   `scan_depth` and `max_pages`, then `custom_pages`.
//! - **realtime** — identical traversal to quick; the mode exists for
//!   clients subscribed to the live progress stream.
//!
//! # Cookie deduplication
//!
//! Observations are keyed by `(name, domain, path)`; the first observation
//! wins. A cookie whose first observation is in a post-consent-click
//! snapshot carries `set_after_accept = true`; one already present before
//! the click stays `false`.

pub mod cancel;
#[cfg(test)]
pub(crate) mod testing;
pub mod wait;
pub mod writer;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use url::Url;
use uuid::Uuid;

use cookiescan_foundation::classifier::ClassifierContext;
use cookiescan_kernel::browser::{BrowserError, BrowserSession, PageDriver, RawCookie};
use cookiescan_kernel::model::cookie::{cookie_duration, hash_value, party_type, ObservedCookie};
use cookiescan_kernel::model::scan::{
    ScanParams, ScanParamsError, ScanProgress, ScanResult, ScanStatus,
};
use cookiescan_kernel::progress::ProgressBus;
use cookiescan_kernel::store::{DynScanResultStore, StoreError};

use crate::browser::pool::BrowserPool;
use crate::retry::{retry_with_policy, RetryConfig};
use cancel::{CancelFlag, CancellationRegistry};
use writer::{ResultDraft, ResultWriter};

/// Hard per-navigation budget.
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Pause after a successful consent click before re-snapshotting, giving
/// consent-triggered scripts time to set their cookies.
const POST_CLICK_WAIT: Duration = Duration::from_secs(2);

/// Step size and dwell for the lazy-load scroll pass.
const SCROLL_STEP: f64 = 800.0;
const SCROLL_DWELL: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    InvalidParams(#[from] ScanParamsError),

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("scan cancelled")]
    Cancelled,
}

/// What one execution produced, as the coordinator sees it.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub scan_id: Uuid,
    pub status: ScanStatus,
    pub total_cookies: usize,
    pub page_count: usize,
    pub duration_seconds: f64,
}

/// Raw crawl output before classification.
#[derive(Default)]
struct CrawlState {
    visited: HashSet<String>,
    pages: Vec<String>,
    cookie_keys: HashSet<(String, String, String)>,
    cookies: Vec<ObservedCookie>,
    storages: cookiescan_kernel::model::scan::StorageSnapshot,
}

impl CrawlState {
    /// Merge a snapshot. First observation wins; `after_accept` fixes the
    /// `set_after_accept` flag at first-observation time.
    fn record_cookies(&mut self, raws: Vec<RawCookie>, root_url: &str, after_accept: bool) {
        let now = Utc::now();
        for raw in raws {
            let key = (raw.name.clone(), raw.domain.clone(), raw.path.clone());
            if self.cookie_keys.contains(&key) {
                continue;
            }
            self.cookie_keys.insert(key);
            self.cookies.push(ObservedCookie {
                cookie_type: party_type(Some(&raw.domain), root_url),
                hashed_value: hash_value(&raw.value),
                cookie_duration: cookie_duration(raw.expires, now),
                size: raw.value.len(),
                name: raw.name,
                domain: raw.domain,
                path: raw.path,
                http_only: raw.http_only,
                secure: raw.secure,
                same_site: raw.same_site,
                set_after_accept: after_accept,
            });
        }
    }
}

pub struct ScanExecutor {
    results: DynScanResultStore,
    writer: ResultWriter,
    progress: ProgressBus,
    cancellations: CancellationRegistry,
    pool: Arc<BrowserPool>,
}

impl ScanExecutor {
    pub fn new(
        results: DynScanResultStore,
        classifier: Arc<ClassifierContext>,
        progress: ProgressBus,
        pool: Arc<BrowserPool>,
    ) -> Self {
        Self {
            writer: ResultWriter::new(Arc::clone(&results), classifier),
            results,
            progress,
            cancellations: CancellationRegistry::new(),
            pool,
        }
    }

    pub fn progress(&self) -> &ProgressBus {
        &self.progress
    }

    pub fn cancellations(&self) -> &CancellationRegistry {
        &self.cancellations
    }

    /// Validate parameters and insert the initial `pending` row.
    pub async fn create_scan(
        &self,
        domain_config_id: &str,
        domain: &str,
        scan_mode: cookiescan_kernel::model::scan::ScanMode,
        params: ScanParams,
    ) -> Result<ScanResult, ScanError> {
        params.validate()?;
        let result = ScanResult::pending(
            Uuid::new_v4(),
            domain_config_id,
            domain,
            scan_mode,
            params,
            Utc::now(),
        );
        self.results.create_pending(&result).await?;
        // Queued scans are visible to progress subscribers immediately.
        self.publish(result.scan_id, ScanStatus::Pending, None, 0, 0, 0.0, None);
        Ok(result)
    }

    /// Execute a pending scan to its terminal state. The terminal status is
    /// always written to the store and published on the progress bus before
    /// this returns.
    pub async fn execute(&self, pending: &ScanResult) -> Result<ScanOutcome, ScanError> {
        let scan_id = pending.scan_id;
        let flag = self.cancellations.register(scan_id);
        let started = Instant::now();

        if let Err(e) = self
            .results
            .update_status(scan_id, ScanStatus::Running, None, None)
            .await
        {
            tracing::error!(scan_id = %scan_id, error = %e, "failed to mark scan running");
        }
        self.progress.publish(ScanProgress::starting(scan_id, Utc::now()));

        let crawl = self.run_crawl(pending, &flag).await;
        let duration = started.elapsed().as_secs_f64();
        self.cancellations.clear(scan_id);

        match crawl {
            Ok(state) => {
                let draft = ResultDraft {
                    scan_id,
                    domain_config_id: pending.domain_config_id.clone(),
                    domain: pending.domain.clone(),
                    scan_mode: pending.scan_mode,
                    params: pending.params.clone(),
                    started_at: pending.timestamp_utc,
                    duration_seconds: duration,
                    pages_visited: state.pages,
                    cookies: state.cookies,
                    storages: state.storages,
                };
                let result = self.writer.persist_success(draft).await.map_err(|e| {
                    tracing::error!(scan_id = %scan_id, error = %e, "failed to persist scan result");
                    ScanError::Store(e)
                })?;

                self.publish(
                    scan_id,
                    ScanStatus::Success,
                    None,
                    result.page_count,
                    result.total_cookies,
                    100.0,
                    None,
                );
                Ok(ScanOutcome {
                    scan_id,
                    status: ScanStatus::Success,
                    total_cookies: result.total_cookies,
                    page_count: result.page_count,
                    duration_seconds: duration,
                })
            }
            Err(ScanError::Cancelled) => {
                tracing::info!(scan_id = %scan_id, "scan cancelled");
                let _ = self
                    .results
                    .update_status(scan_id, ScanStatus::Cancelled, None, Some(duration))
                    .await;
                self.publish(scan_id, ScanStatus::Cancelled, None, 0, 0, 0.0, None);
                Ok(ScanOutcome {
                    scan_id,
                    status: ScanStatus::Cancelled,
                    total_cookies: 0,
                    page_count: 0,
                    duration_seconds: duration,
                })
            }
            Err(e) => {
                tracing::error!(scan_id = %scan_id, error = %e, "scan failed");
                let _ = self
                    .results
                    .update_status(scan_id, ScanStatus::Failed, Some(&e.to_string()), Some(duration))
                    .await;
                self.publish(
                    scan_id,
                    ScanStatus::Failed,
                    None,
                    0,
                    0,
                    0.0,
                    Some(e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Acquire a browser and crawl; whole-crawl browser failures retry with
    /// the standard backoff before failing the scan.
    async fn run_crawl(
        &self,
        pending: &ScanResult,
        flag: &CancelFlag,
    ) -> Result<CrawlState, ScanError> {
        let config = RetryConfig::navigation(pending.params.max_retries);
        retry_with_policy(
            &config,
            |e: &ScanError| matches!(e, ScanError::Browser(_)),
            || async {
                let guard = self.pool.acquire().await.map_err(ScanError::Browser)?;
                let outcome = self.crawl_with_session(&guard, pending, flag).await;
                self.pool.release(guard).await;
                outcome
            },
        )
        .await
    }

    async fn crawl_with_session(
        &self,
        session: &dyn BrowserSession,
        pending: &ScanResult,
        flag: &CancelFlag,
    ) -> Result<CrawlState, ScanError> {
        let params = &pending.params;
        let page = session
            .open_page(&params.user_agent, params.viewport)
            .await?;

        let mut state = CrawlState::default();
        let root_url = pending.domain.clone();
        let root = Url::parse(&root_url)
            .map_err(|e| ScanError::Browser(BrowserError::Navigation(e.to_string())))?;

        match pending.scan_mode {
            cookiescan_kernel::model::scan::ScanMode::Quick
            | cookiescan_kernel::model::scan::ScanMode::Realtime => {
                self.crawl_flat(page.as_ref(), &mut state, pending, &root, flag)
                    .await?;
            }
            cookiescan_kernel::model::scan::ScanMode::Deep => {
                self.crawl_deep(page.as_ref(), &mut state, pending, &root, flag)
                    .await?;
            }
        }

        Ok(state)
    }

    /// Quick/realtime traversal: root plus custom pages, no link following.
    async fn crawl_flat(
        &self,
        page: &dyn PageDriver,
        state: &mut CrawlState,
        pending: &ScanResult,
        root: &Url,
        flag: &CancelFlag,
    ) -> Result<(), ScanError> {
        let params = &pending.params;
        let planned = 1 + params.custom_pages.len();

        let mut targets = vec![pending.domain.clone()];
        for custom in &params.custom_pages {
            if let Some(url) = resolve_custom_page(root, custom) {
                targets.push(url);
            }
        }

        for (done, url) in targets.into_iter().enumerate() {
            if flag.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            let percent = (done as f64 / planned as f64) * 100.0;
            self.visit_page(page, state, pending, &url, false, percent)
                .await?;
        }
        Ok(())
    }

    /// Deep traversal: breadth-first over internal links, then custom pages.
    async fn crawl_deep(
        &self,
        page: &dyn PageDriver,
        state: &mut CrawlState,
        pending: &ScanResult,
        root: &Url,
        flag: &CancelFlag,
    ) -> Result<(), ScanError> {
        let params = &pending.params;
        let mut queue: VecDeque<(String, u32)> = VecDeque::new();
        queue.push_back((pending.domain.clone(), 0));

        while let Some((url, depth)) = queue.pop_front() {
            if flag.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            if state.visited.contains(&url) {
                continue;
            }
            if let Some(max_pages) = params.max_pages {
                if state.pages.len() >= max_pages as usize {
                    tracing::info!(
                        scan_id = %pending.scan_id,
                        max_pages,
                        "page limit reached; stopping crawl"
                    );
                    break;
                }
            }

            let follow = depth < params.scan_depth;
            let percent = match params.max_pages {
                Some(max_pages) => {
                    ((state.pages.len() as f64 / max_pages as f64) * 100.0).min(99.0)
                }
                None => (state.pages.len() as f64 * 10.0).min(95.0),
            };
            let links = self
                .visit_page(page, state, pending, &url, follow, percent)
                .await?;

            for link in links {
                if !is_internal(root, &link) {
                    continue;
                }
                if let Some(absolute) = resolve_link(root, &link) {
                    if !state.visited.contains(&absolute) {
                        queue.push_back((absolute, depth + 1));
                    }
                }
            }
        }

        // Custom pages after the crawl, exempt from the page cap.
        for custom in &params.custom_pages {
            if flag.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            if let Some(url) = resolve_custom_page(root, custom) {
                self.visit_page(page, state, pending, &url, false, 99.0)
                    .await?;
            }
        }
        Ok(())
    }

    /// One page visit: navigate (with retry), wait, snapshot cookies around
    /// the consent click, scroll for lazy-loaded cookies, collect storage,
    /// and report progress. Navigation failures after retry exhaustion skip
    /// the page rather than failing the scan; returned links are unfiltered.
    async fn visit_page(
        &self,
        page: &dyn PageDriver,
        state: &mut CrawlState,
        pending: &ScanResult,
        url: &str,
        collect_links: bool,
        percent: f64,
    ) -> Result<Vec<String>, ScanError> {
        if state.visited.contains(url) {
            return Ok(Vec::new());
        }
        let params = &pending.params;
        let root_url = &pending.domain;

        self.publish(
            pending.scan_id,
            ScanStatus::Running,
            Some(url.to_string()),
            state.pages.len(),
            state.cookies.len(),
            percent,
            None,
        );

        tracing::info!(scan_id = %pending.scan_id, url, "visiting page");
        let navigation = retry_with_policy(
            &RetryConfig::navigation(params.max_retries),
            BrowserError::is_transient,
            || page.navigate(url, NAVIGATION_TIMEOUT),
        )
        .await;
        if let Err(e) = navigation {
            if e.is_transient() {
                tracing::warn!(scan_id = %pending.scan_id, url, error = %e, "giving up on page after retries");
                return Ok(Vec::new());
            }
            return Err(e.into());
        }

        wait::wait_for_content(
            page,
            params.wait_strategy,
            Duration::from_secs(params.wait_for_dynamic_content),
            url,
        )
        .await;

        // Pre-consent snapshot.
        match page.cookies().await {
            Ok(raws) => state.record_cookies(raws, root_url, false),
            Err(e) => tracing::warn!(url, error = %e, "cookie snapshot failed"),
        }

        // Consent click. Banner quirks are expected; every failure here is
        // swallowed.
        let mut accepted = false;
        match page.click_if_visible(&params.accept_selector).await {
            Ok(true) => {
                accepted = true;
                tracing::info!(scan_id = %pending.scan_id, url, "cookie banner accepted");
                tokio::time::sleep(POST_CLICK_WAIT).await;
                if let Ok(raws) = page.cookies().await {
                    state.record_cookies(raws, root_url, true);
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::debug!(url, error = %e, "consent click failed");
            }
        }

        // Step-scroll to trigger lazy-loaded cookies, re-snapshotting after
        // each step. Pages that block evaluation are left alone.
        if let Ok(height) = page.scroll_height().await {
            let mut offset = 0.0;
            while offset < height {
                if page.scroll_to(offset).await.is_err() {
                    break;
                }
                tokio::time::sleep(SCROLL_DWELL).await;
                if let Ok(raws) = page.cookies().await {
                    state.record_cookies(raws, root_url, accepted);
                }
                offset += SCROLL_STEP;
            }
        }

        // Final snapshot after all interactions.
        if let Ok(raws) = page.cookies().await {
            state.record_cookies(raws, root_url, accepted);
        }

        match page.hashed_storage().await {
            Ok(snapshot) => state.storages.merge(snapshot),
            Err(e) => tracing::warn!(url, error = %e, "storage collection failed"),
        }

        state.visited.insert(url.to_string());
        state.pages.push(url.to_string());

        self.publish(
            pending.scan_id,
            ScanStatus::Running,
            Some(url.to_string()),
            state.pages.len(),
            state.cookies.len(),
            percent,
            None,
        );

        if collect_links {
            match page.links().await {
                Ok(links) => Ok(links),
                Err(e) => {
                    tracing::warn!(url, error = %e, "link extraction failed");
                    Ok(Vec::new())
                }
            }
        } else {
            Ok(Vec::new())
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn publish(
        &self,
        scan_id: Uuid,
        status: ScanStatus,
        current_page: Option<String>,
        pages_visited: usize,
        cookies_found: usize,
        progress_percentage: f64,
        message: Option<String>,
    ) {
        self.progress.publish(ScanProgress {
            scan_id,
            status,
            current_page,
            pages_visited,
            cookies_found,
            progress_percentage,
            message,
            timestamp: Utc::now(),
        });
    }
}

// ---------------------------------------------------------------------------
// URL helpers
// ---------------------------------------------------------------------------

fn resolve_custom_page(root: &Url, custom: &str) -> Option<String> {
    if custom.starts_with("http://") || custom.starts_with("https://") {
        Some(custom.to_string())
    } else {
        root.join(custom).ok().map(|u| u.to_string())
    }
}

fn resolve_link(root: &Url, link: &str) -> Option<String> {
    root.join(link).ok().map(|u| u.to_string())
}

/// Internal means the link has no authority of its own or shares the
/// root's host and port.
fn is_internal(root: &Url, link: &str) -> bool {
    match Url::parse(link) {
        Ok(url) => url.host_str() == root.host_str() && url.port() == root.port(),
        Err(url::ParseError::RelativeUrlWithoutBase) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{raw_cookie, PageScript, ScriptedBrowser, ScriptedLauncher};
    use super::*;
    use cookiescan_foundation::classifier::ClassifierContext;
    use cookiescan_foundation::persistence::memory::InMemoryStore;
    use cookiescan_kernel::classify::NoModel;
    use cookiescan_kernel::config::BrowserPoolConfig;
    use cookiescan_kernel::model::cookie::{CookieType, Source};
    use cookiescan_kernel::model::scan::ScanMode;
    use cookiescan_kernel::store::ScanResultStore;
    use std::collections::HashMap;


    fn fast_params() -> ScanParams {
        // Event-based wait returns immediately from the scripted driver.
        let mut params = ScanParams::default();
        params.wait_strategy = cookiescan_kernel::model::scan::WaitStrategy::DomContentLoaded;
        params
    }

    async fn executor_with(
        scripts: HashMap<String, PageScript>,
    ) -> (ScanExecutor, Arc<InMemoryStore>) {
        let store = InMemoryStore::shared();
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
                pool_size: 1,
                ..BrowserPoolConfig::default()
            },
            ScriptedLauncher::new(ScriptedBrowser::new(scripts)),
        );
        let executor = ScanExecutor::new(store.clone(), classifier, ProgressBus::new(), pool);
        (executor, store)
    }

    #[tokio::test]
    async fn quick_scan_single_page_with_clean_banner() {
        let root = "https://example.test";
        let script = PageScript {
            cookies_before: vec![raw_cookie("sid", ".example.test", "abc")],
            cookies_after_accept: vec![raw_cookie("_ga", ".example.test", "xyz")],
            accept_visible: true,
            ..Default::default()
        };
        let (executor, store) = executor_with(HashMap::from([(root.to_string(), script)])).await;

        let pending = executor
            .create_scan("cfg-1", root, ScanMode::Quick, fast_params())
            .await
            .unwrap();
        let outcome = executor.execute(&pending).await.unwrap();

        assert_eq!(outcome.status, ScanStatus::Success);
        assert_eq!(outcome.page_count, 1);
        assert_eq!(outcome.total_cookies, 2);

        let result = store.get_scan(pending.scan_id).await.unwrap().unwrap();
        assert_eq!(result.pages_visited, vec![root.to_string()]);
        assert_eq!(result.total_cookies, result.cookies.len());

        let sid = result
            .cookies
            .iter()
            .find(|c| c.observed.name == "sid")
            .unwrap();
        assert!(!sid.observed.set_after_accept);
        assert_eq!(sid.observed.cookie_type, CookieType::FirstParty);
        assert_eq!(sid.observed.hashed_value, hash_value("abc"));

        let ga = result
            .cookies
            .iter()
            .find(|c| c.observed.name == "_ga")
            .unwrap();
        assert!(ga.observed.set_after_accept);
        assert_eq!(ga.classification.category.as_str(), "Analytics");
        assert_eq!(ga.classification.source, Source::RulesJson);
    }

    #[tokio::test]
    async fn deep_scan_follows_internal_links_only() {
        let root = "https://a.test";
        let scripts = HashMap::from([
            (
                root.to_string(),
                PageScript {
                    links: vec![
                        "https://a.test/p1".to_string(),
                        "https://a.test/p2".to_string(),
                        "https://b.test/x".to_string(),
                    ],
                    ..Default::default()
                },
            ),
            ("https://a.test/p1".to_string(), PageScript::default()),
            ("https://a.test/p2".to_string(), PageScript::default()),
        ]);
        let (executor, store) = executor_with(scripts).await;

        let mut params = fast_params();
        params.scan_depth = 1;
        params.max_pages = Some(10);
        let pending = executor
            .create_scan("cfg-1", root, ScanMode::Deep, params)
            .await
            .unwrap();
        let outcome = executor.execute(&pending).await.unwrap();

        assert_eq!(outcome.page_count, 3);
        let result = store.get_scan(pending.scan_id).await.unwrap().unwrap();
        assert_eq!(
            result.pages_visited,
            vec![
                "https://a.test".to_string(),
                "https://a.test/p1".to_string(),
                "https://a.test/p2".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn deep_scan_depth_zero_visits_root_and_custom_pages_only() {
        let root = "https://a.test";
        let scripts = HashMap::from([
            (
                root.to_string(),
                PageScript {
                    links: vec!["https://a.test/p1".to_string()],
                    ..Default::default()
                },
            ),
            ("https://a.test/about".to_string(), PageScript::default()),
        ]);
        let (executor, _store) = executor_with(scripts).await;

        let mut params = fast_params();
        params.scan_depth = 0;
        params.custom_pages = vec!["/about".to_string()];
        let pending = executor
            .create_scan("cfg-1", root, ScanMode::Deep, params)
            .await
            .unwrap();
        let outcome = executor.execute(&pending).await.unwrap();

        // Exactly 1 + |custom_pages| visits: the linked page is ignored.
        assert_eq!(outcome.page_count, 2);
    }

    #[tokio::test]
    async fn deep_scan_respects_max_pages() {
        let root = "https://a.test";
        let mut scripts = HashMap::new();
        scripts.insert(
            root.to_string(),
            PageScript {
                links: (1..10).map(|i| format!("https://a.test/p{i}")).collect(),
                ..Default::default()
            },
        );
        for i in 1..10 {
            scripts.insert(format!("https://a.test/p{i}"), PageScript::default());
        }
        let (executor, _store) = executor_with(scripts).await;

        let mut params = fast_params();
        params.scan_depth = 2;
        params.max_pages = Some(3);
        let pending = executor
            .create_scan("cfg-1", root, ScanMode::Deep, params)
            .await
            .unwrap();
        let outcome = executor.execute(&pending).await.unwrap();
        assert_eq!(outcome.page_count, 3);
    }

    #[tokio::test]
    async fn unreachable_page_is_skipped_after_retries() {
        let root = "https://a.test";
        let script = PageScript {
            fail_navigations: 10,
            ..Default::default()
        };
        let (executor, store) = executor_with(HashMap::from([(root.to_string(), script)])).await;

        let mut params = fast_params();
        params.max_retries = 0;
        let pending = executor
            .create_scan("cfg-1", root, ScanMode::Quick, params)
            .await
            .unwrap();
        let outcome = executor.execute(&pending).await.unwrap();

        // The page is skipped; the scan itself completes.
        assert_eq!(outcome.status, ScanStatus::Success);
        assert_eq!(outcome.page_count, 0);
        let result = store.get_scan(pending.scan_id).await.unwrap().unwrap();
        assert_eq!(result.status, ScanStatus::Success);
    }

    #[tokio::test]
    async fn cancelled_before_start_terminates_without_pages() {
        let root = "https://a.test";
        let (executor, store) =
            executor_with(HashMap::from([(root.to_string(), PageScript::default())])).await;

        let pending = executor
            .create_scan("cfg-1", root, ScanMode::Quick, fast_params())
            .await
            .unwrap();
        executor.cancellations().register(pending.scan_id);
        executor.cancellations().cancel(pending.scan_id);

        let outcome = executor.execute(&pending).await.unwrap();
        assert_eq!(outcome.status, ScanStatus::Cancelled);

        let result = store.get_scan(pending.scan_id).await.unwrap().unwrap();
        assert_eq!(result.status, ScanStatus::Cancelled);
        assert!(result.duration_seconds.is_some());
        // No partial cookie data from the aborted run.
        assert!(result.cookies.is_empty());
    }

    #[tokio::test]
    async fn progress_reaches_terminal_snapshot() {
        let root = "https://a.test";
        let (executor, _store) =
            executor_with(HashMap::from([(root.to_string(), PageScript::default())])).await;

        let pending = executor
            .create_scan("cfg-1", root, ScanMode::Realtime, fast_params())
            .await
            .unwrap();
        executor.execute(&pending).await.unwrap();

        let latest = executor.progress().latest(pending.scan_id).unwrap();
        assert_eq!(latest.status, ScanStatus::Success);
        assert_eq!(latest.progress_percentage, 100.0);
        assert_eq!(latest.pages_visited, 1);
    }

    #[tokio::test]
    async fn storage_values_are_hashed() {
        let root = "https://a.test";
        let script = PageScript {
            local_storage: vec![("user_token".to_string(), "plaintext-secret".to_string())],
            ..Default::default()
        };
        let (executor, store) = executor_with(HashMap::from([(root.to_string(), script)])).await;

        let pending = executor
            .create_scan("cfg-1", root, ScanMode::Quick, fast_params())
            .await
            .unwrap();
        executor.execute(&pending).await.unwrap();

        let result = store.get_scan(pending.scan_id).await.unwrap().unwrap();
        assert_eq!(
            result.storages.local_storage["user_token"],
            hash_value("plaintext-secret")
        );
    }

    #[tokio::test]
    async fn invalid_params_are_rejected_at_creation() {
        let (executor, _store) = executor_with(HashMap::new()).await;
        let mut params = ScanParams::default();
        params.wait_for_dynamic_content = 2;

        let result = executor
            .create_scan("cfg-1", "https://a.test", ScanMode::Quick, params)
            .await;
        assert!(matches!(result, Err(ScanError::InvalidParams(_))));
    }

    #[test]
    fn internal_link_detection() {
        let root = Url::parse("https://a.test").unwrap();
        assert!(is_internal(&root, "https://a.test/p1"));
        assert!(is_internal(&root, "/relative"));
        assert!(!is_internal(&root, "https://b.test/x"));
    }
}
