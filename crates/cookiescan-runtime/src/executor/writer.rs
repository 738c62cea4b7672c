//! Result writer: classification + batch persistence.
//!
//! Takes the raw crawl output, runs every observed cookie through the
//! classifier cascade, and persists the finished result row plus its
//! cookies in bounded batches.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use cookiescan_foundation::classifier::ClassifierContext;
use cookiescan_foundation::persistence::COOKIE_BATCH_SIZE;
use cookiescan_kernel::model::cookie::{Cookie, ObservedCookie};
use cookiescan_kernel::model::scan::{
    ScanMode, ScanParams, ScanResult, ScanStatus, StorageSnapshot,
};
use cookiescan_kernel::store::{DynScanResultStore, StoreResult};

/// Everything a finished crawl produced, before classification.
pub struct ResultDraft {
    pub scan_id: Uuid,
    pub domain_config_id: String,
    pub domain: String,
    pub scan_mode: ScanMode,
    pub params: ScanParams,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub pages_visited: Vec<String>,
    pub cookies: Vec<ObservedCookie>,
    pub storages: StorageSnapshot,
}

pub struct ResultWriter {
    results: DynScanResultStore,
    classifier: Arc<ClassifierContext>,
}

impl ResultWriter {
    pub fn new(results: DynScanResultStore, classifier: Arc<ClassifierContext>) -> Self {
        Self { results, classifier }
    }

    pub fn classifier(&self) -> &Arc<ClassifierContext> {
        &self.classifier
    }

    /// Classify the draft's cookies and persist the completed result.
    pub async fn persist_success(&self, draft: ResultDraft) -> StoreResult<ScanResult> {
        // Overrides are loaded once per domain before classification.
        self.classifier.prepare_domain(&draft.domain_config_id).await;

        let mut cookies = Vec::with_capacity(draft.cookies.len());
        for observed in draft.cookies {
            let classification = self
                .classifier
                .classify(&draft.domain_config_id, &observed)
                .await;
            cookies.push(Cookie {
                observed,
                classification,
            });
        }

        let now = Utc::now();
        let mut result = ScanResult {
            scan_id: draft.scan_id,
            domain_config_id: draft.domain_config_id,
            domain: draft.domain,
            scan_mode: draft.scan_mode,
            status: ScanStatus::Success,
            timestamp_utc: draft.started_at,
            duration_seconds: Some(draft.duration_seconds),
            pages_visited: draft.pages_visited,
            cookies,
            storages: draft.storages,
            total_cookies: 0,
            page_count: 0,
            error: None,
            params: draft.params,
            created_at: draft.started_at,
            updated_at: now,
        };
        result.finalize_counts();

        self.results
            .save_completed(&result, COOKIE_BATCH_SIZE)
            .await?;

        tracing::info!(
            scan_id = %result.scan_id,
            domain = %result.domain,
            pages = result.page_count,
            cookies = result.total_cookies,
            "scan result persisted"
        );
        Ok(result)
    }
}
