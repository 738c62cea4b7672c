//! Browser driver contract.
//!
//! The executor never talks CDP directly; it drives pages through
//! [`PageDriver`], and acquires pages through [`BrowserSession`]. The
//! concrete chromiumoxide adapter lives in `cookiescan-runtime`; tests use a
//! scripted fake. Raw cookie values cross this boundary (the executor needs
//! them for hashing and sizing) but web-storage values do not — drivers hash
//! storage in place and return only digests.

use std::time::Duration;

use async_trait::async_trait;

use crate::model::scan::{StorageSnapshot, Viewport};

/// A cookie exactly as the browser reported it. The `value` field never
/// leaves the executor's page-visit scope.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCookie {
    pub name: String,
    pub domain: String,
    pub path: String,
    pub value: String,
    /// Unix-seconds expiry; `None` or `-1` means a session cookie.
    pub expires: Option<f64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("navigation timed out after {0:?}")]
    NavigationTimeout(Duration),

    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("browser session error: {0}")]
    Session(String),
}

impl BrowserError {
    /// Whether retrying the same operation can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Navigation(_) | Self::NavigationTimeout(_))
    }
}

/// One open page in an isolated browser context.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate, bounded by `timeout`.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Wait for DOMContentLoaded; `Ok(false)` means the budget elapsed first.
    async fn wait_dom_content_loaded(&self, timeout: Duration) -> Result<bool, BrowserError>;

    /// Wait for the full load event, capped at `timeout`.
    async fn wait_load(&self, timeout: Duration) -> Result<bool, BrowserError>;

    /// Wait until there have been no in-flight requests for ≥ 500 ms,
    /// capped at `timeout`.
    async fn wait_network_idle(&self, timeout: Duration) -> Result<bool, BrowserError>;

    /// Snapshot all cookies visible to the page's context.
    async fn cookies(&self) -> Result<Vec<RawCookie>, BrowserError>;

    /// Click the first element matching `selector` if it exists and is
    /// visible. Returns whether a click happened.
    async fn click_if_visible(&self, selector: &str) -> Result<bool, BrowserError>;

    /// localStorage + sessionStorage with every value already hashed.
    async fn hashed_storage(&self) -> Result<StorageSnapshot, BrowserError>;

    /// All anchor hrefs on the page.
    async fn links(&self) -> Result<Vec<String>, BrowserError>;

    /// Total scroll height of the document body.
    async fn scroll_height(&self) -> Result<f64, BrowserError>;

    /// Scroll the window to the given vertical offset.
    async fn scroll_to(&self, y: f64) -> Result<(), BrowserError>;
}

/// Source of pages for one scan. Implemented by the browser pool's
/// acquisition guard; every page opened here is closed when the guard is
/// released.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn open_page(
        &self,
        user_agent: &str,
        viewport: Viewport,
    ) -> Result<Box<dyn PageDriver>, BrowserError>;
}
