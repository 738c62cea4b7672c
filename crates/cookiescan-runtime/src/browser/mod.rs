//! Browser instance management.
//!
//! [`pool::BrowserPool`] amortises browser startup across scans; the
//! chromiumoxide adapter in [`cdp`] supplies real instances, while tests
//! plug in scripted launchers.

pub mod cdp;
pub mod pool;

use async_trait::async_trait;
use std::sync::Arc;

use cookiescan_kernel::browser::{BrowserError, PageDriver};
use cookiescan_kernel::model::scan::Viewport;

/// One live browser process.
#[async_trait]
pub trait BrowserInstance: Send + Sync {
    /// Open a page in a fresh context configured with the caller's user
    /// agent and viewport, stealth patches applied.
    async fn open_page(
        &self,
        user_agent: &str,
        viewport: Viewport,
    ) -> Result<Box<dyn PageDriver>, BrowserError>;

    /// Close every page opened since the last release.
    async fn close_open_pages(&self);

    /// Probe liveness with a trivial navigation.
    async fn health_check(&self) -> bool;

    /// Tear the instance down.
    async fn close(&self);
}

/// Launches browser instances for the pool.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn BrowserInstance>, BrowserError>;
}
