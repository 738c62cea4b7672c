//! Scan parameters, results, and progress snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::cookie::Cookie;

// ---------------------------------------------------------------------------
// Modes & statuses
// ---------------------------------------------------------------------------

/// How a scan traverses the target site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Root URL plus `custom_pages`, no link following.
    Quick,
    /// Recursive internal-link crawl bounded by `scan_depth` / `max_pages`.
    Deep,
    /// Same traversal as quick; intended for live progress subscribers.
    Realtime,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Deep => "deep",
            Self::Realtime => "realtime",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "quick" => Some(Self::Quick),
            "deep" => Some(Self::Deep),
            "realtime" => Some(Self::Realtime),
            _ => None,
        }
    }
}

/// Scan lifecycle state. `Success`, `Failed`, and `Cancelled` are terminal;
/// once a result leaves `Running` it must not mutate again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// How the executor waits for dynamic content after navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WaitStrategy {
    #[default]
    Timeout,
    NetworkIdle,
    DomContentLoaded,
    Load,
    /// DOMContentLoaded on half the budget, then network idle on the other
    /// half, falling back to a short fixed sleep on timeout.
    Combined,
}

impl WaitStrategy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "timeout" => Some(Self::Timeout),
            "networkidle" => Some(Self::NetworkIdle),
            "domcontentloaded" => Some(Self::DomContentLoaded),
            "load" => Some(Self::Load),
            "combined" => Some(Self::Combined),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ScanParams
// ---------------------------------------------------------------------------

/// Browser viewport dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1366,
            height: 768,
        }
    }
}

pub const DEFAULT_ACCEPT_SELECTOR: &str = r#"button[data-role="accept"]"#;
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

pub const MAX_CUSTOM_PAGES: usize = 50;
pub const MAX_SCAN_DEPTH: u32 = 10;
pub const MAX_SCAN_RETRIES: u32 = 5;
pub const MIN_WAIT_SECONDS: u64 = 5;
pub const MAX_WAIT_SECONDS: u64 = 60;

/// Parameters applied to one scan run. A snapshot of these is persisted with
/// every [`ScanResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanParams {
    /// Deep-scan page cap. Ignored in quick/realtime mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
    /// Link-following depth, 0–10. 0 means no link following.
    pub scan_depth: u32,
    /// Per-page navigation retries, 0–5.
    pub max_retries: u32,
    /// Extra paths or absolute URLs to visit, at most 50.
    pub custom_pages: Vec<String>,
    /// CSS selector used to locate the consent button.
    pub accept_selector: String,
    /// Wait budget for dynamic content, 5–60 s.
    pub wait_for_dynamic_content: u64,
    pub wait_strategy: WaitStrategy,
    pub viewport: Viewport,
    pub user_agent: String,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            max_pages: None,
            scan_depth: 0,
            max_retries: 3,
            custom_pages: Vec::new(),
            accept_selector: DEFAULT_ACCEPT_SELECTOR.to_string(),
            wait_for_dynamic_content: MIN_WAIT_SECONDS,
            wait_strategy: WaitStrategy::Timeout,
            viewport: Viewport::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Validation failures for [`ScanParams`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScanParamsError {
    #[error("max_pages must be positive")]
    ZeroMaxPages,

    #[error("scan_depth {0} exceeds the maximum of {MAX_SCAN_DEPTH}")]
    DepthOutOfRange(u32),

    #[error("max_retries {0} exceeds the maximum of {MAX_SCAN_RETRIES}")]
    RetriesOutOfRange(u32),

    #[error("custom_pages holds {0} entries, more than the limit of {MAX_CUSTOM_PAGES}")]
    TooManyCustomPages(usize),

    #[error("wait_for_dynamic_content must be within [{MIN_WAIT_SECONDS}, {MAX_WAIT_SECONDS}] seconds, got {0}")]
    WaitOutOfRange(u64),
}

impl ScanParams {
    /// Check every boundary constraint. Called at schedule creation/update
    /// and before any API-triggered scan starts.
    pub fn validate(&self) -> Result<(), ScanParamsError> {
        if let Some(mp) = self.max_pages {
            if mp == 0 {
                return Err(ScanParamsError::ZeroMaxPages);
            }
        }
        if self.scan_depth > MAX_SCAN_DEPTH {
            return Err(ScanParamsError::DepthOutOfRange(self.scan_depth));
        }
        if self.max_retries > MAX_SCAN_RETRIES {
            return Err(ScanParamsError::RetriesOutOfRange(self.max_retries));
        }
        if self.custom_pages.len() > MAX_CUSTOM_PAGES {
            return Err(ScanParamsError::TooManyCustomPages(self.custom_pages.len()));
        }
        if self.wait_for_dynamic_content < MIN_WAIT_SECONDS
            || self.wait_for_dynamic_content > MAX_WAIT_SECONDS
        {
            return Err(ScanParamsError::WaitOutOfRange(self.wait_for_dynamic_content));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Storage snapshot
// ---------------------------------------------------------------------------

/// Hashed web-storage state collected during a scan.
///
/// Keys are storage keys; values are SHA-256 hex digests of the raw values.
/// Raw values never appear in this type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    #[serde(rename = "localStorage")]
    pub local_storage: BTreeMap<String, String>,
    #[serde(rename = "sessionStorage")]
    pub session_storage: BTreeMap<String, String>,
}

impl StorageSnapshot {
    /// Merge another snapshot into this one (later pages win on key clash).
    pub fn merge(&mut self, other: StorageSnapshot) {
        self.local_storage.extend(other.local_storage);
        self.session_storage.extend(other.session_storage);
    }
}

// ---------------------------------------------------------------------------
// ScanResult
// ---------------------------------------------------------------------------

/// The persisted outcome of one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: Uuid,
    pub domain_config_id: String,
    pub domain: String,
    pub scan_mode: ScanMode,
    pub status: ScanStatus,
    pub timestamp_utc: DateTime<Utc>,
    pub duration_seconds: Option<f64>,
    /// Ordered, deduplicated sequence of visited URLs.
    pub pages_visited: Vec<String>,
    pub cookies: Vec<Cookie>,
    pub storages: StorageSnapshot,
    /// Derived; must equal `cookies.len()`.
    pub total_cookies: usize,
    /// Derived; must equal `pages_visited.len()`.
    pub page_count: usize,
    pub error: Option<String>,
    /// Snapshot of the parameters this scan ran with.
    pub params: ScanParams,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanResult {
    /// A fresh `pending` record with no collected data yet.
    pub fn pending(
        scan_id: Uuid,
        domain_config_id: impl Into<String>,
        domain: impl Into<String>,
        scan_mode: ScanMode,
        params: ScanParams,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            scan_id,
            domain_config_id: domain_config_id.into(),
            domain: domain.into(),
            scan_mode,
            status: ScanStatus::Pending,
            timestamp_utc: now,
            duration_seconds: None,
            pages_visited: Vec::new(),
            cookies: Vec::new(),
            storages: StorageSnapshot::default(),
            total_cookies: 0,
            page_count: 0,
            error: None,
            params,
            created_at: now,
            updated_at: now,
        }
    }

    /// Recompute the derived counters from the collections.
    pub fn finalize_counts(&mut self) {
        self.total_cookies = self.cookies.len();
        self.page_count = self.pages_visited.len();
    }
}

// ---------------------------------------------------------------------------
// ScanProgress
// ---------------------------------------------------------------------------

/// A point-in-time progress snapshot published on the progress bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub scan_id: Uuid,
    pub status: ScanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_page: Option<String>,
    pub pages_visited: usize,
    pub cookies_found: usize,
    pub progress_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ScanProgress {
    pub fn starting(scan_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            scan_id,
            status: ScanStatus::Running,
            current_page: None,
            pages_visited: 0,
            cookies_found: 0,
            progress_percentage: 0.0,
            message: None,
            timestamp: now,
        }
    }
}
