//! External schedule source sync.
//!
//! Pull-model reconciliation: fetch the source's schedule records, map them
//! onto the repository's wire shape, and upsert by `domain_config_id`.
//! Records the source marks `allow_deep_scan = false` are ignored; nothing
//! is ever deleted by a sync.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use cookiescan_kernel::model::scan::{ScanMode, ScanParams};
use cookiescan_kernel::model::schedule::{Frequency, TimeConfig};
use cookiescan_kernel::store::{DynScheduleStore, ExternalScheduleRecord, SyncStats};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("schedule source request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Store(#[from] cookiescan_kernel::store::StoreError),
}

// -- wire shapes ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SourcePayload {
    #[serde(default)]
    data: Vec<SourceRecord>,
}

#[derive(Debug, Deserialize)]
struct SourceRecord {
    domain_config_id: String,
    #[serde(default)]
    data: SourceRecordData,
}

#[derive(Debug, Default, Deserialize)]
struct SourceRecordData {
    #[serde(default)]
    domain: String,
    #[serde(default)]
    schedule: SourceSchedule,
    #[serde(rename = "maxPages")]
    max_pages: Option<u32>,
    #[serde(rename = "scanDepth")]
    scan_depth: Option<u32>,
    #[serde(rename = "maxRetries")]
    max_retries: Option<u32>,
    #[serde(rename = "customPages", default)]
    custom_pages: Vec<String>,
    #[serde(default)]
    allow_deep_scan: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SourceSchedule {
    #[serde(default)]
    frequency: String,
    #[serde(default)]
    time: TimeConfig,
}

/// Map one wire record. `None` means the record is structurally unusable
/// (unknown frequency) and counts as skipped.
fn to_record(source: SourceRecord) -> Option<ExternalScheduleRecord> {
    let frequency = Frequency::parse(&source.data.frequency_str())?;

    let mut params = ScanParams::default();
    if let Some(max_pages) = source.data.max_pages {
        params.max_pages = Some(max_pages);
    }
    if let Some(depth) = source.data.scan_depth {
        params.scan_depth = depth;
    }
    if let Some(retries) = source.data.max_retries {
        params.max_retries = retries;
    }
    params.custom_pages = source.data.custom_pages.clone();

    Some(ExternalScheduleRecord {
        domain_config_id: source.domain_config_id,
        domain: source.data.domain,
        frequency,
        time_config: source.data.schedule.time,
        scan_params: params,
        scan_type: ScanMode::Deep,
        allow_deep_scan: source.data.allow_deep_scan,
    })
}

impl SourceRecordData {
    fn frequency_str(&self) -> String {
        self.schedule.frequency.clone()
    }
}

// -- client -----------------------------------------------------------------

pub struct ScheduleSync {
    client: reqwest::Client,
    url: String,
}

impl ScheduleSync {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Fetch, map, and upsert once. Unparseable records count as skipped.
    pub async fn run_once(&self, store: &DynScheduleStore) -> Result<SyncStats, SyncError> {
        let payload: SourcePayload = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let total = payload.data.len();
        let records: Vec<ExternalScheduleRecord> =
            payload.data.into_iter().filter_map(to_record).collect();
        let unparseable = total - records.len();

        let mut stats = store.sync_from_external(&records).await?;
        stats.skipped += unparseable;

        tracing::info!(
            created = stats.created,
            updated = stats.updated,
            skipped = stats.skipped,
            "external schedule sync completed"
        );
        Ok(stats)
    }
}

/// Periodic sync loop. Failures are logged; the loop never stops.
pub fn spawn_sync_loop(
    sync: Arc<ScheduleSync>,
    store: DynScheduleStore,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if let Err(e) = sync.run_once(&store).await {
                tracing::error!(error = %e, "failed to sync schedules from external source");
            }
        }
    })
}
