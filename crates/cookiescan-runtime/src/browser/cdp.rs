//! chromiumoxide adapter: drives headless Chromium over CDP.
//!
//! Implements the kernel's [`PageDriver`] for real pages. Every context is
//! initialised with the stealth patches the scanner has always shipped
//! (hide `navigator.webdriver`, fake plugins/languages, provide a `chrome`
//! global) plus the caller's user agent and viewport.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::CookieSameSite;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;

use cookiescan_kernel::browser::{BrowserError, PageDriver, RawCookie};
use cookiescan_kernel::model::cookie::hash_value;
use cookiescan_kernel::model::scan::{StorageSnapshot, Viewport};

use super::{BrowserInstance, BrowserLauncher};

const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
window.chrome = { runtime: {} };
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
"#;

const LAUNCH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-http2",
    "--disable-dev-shm-usage",
    "--no-sandbox",
];

fn berr(e: impl std::fmt::Display) -> BrowserError {
    BrowserError::Session(e.to_string())
}

pub(crate) fn map_same_site(same_site: Option<CookieSameSite>) -> Option<String> {
    same_site.map(|s| {
        match s {
            CookieSameSite::Strict => "Strict",
            CookieSameSite::Lax => "Lax",
            CookieSameSite::None => "None",
        }
        .to_string()
    })
}

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

/// Launches headless Chromium instances for the pool.
#[derive(Default)]
pub struct ChromiumLauncher;

impl ChromiumLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserInstance>, BrowserError> {
        let config = BrowserConfig::builder()
            .args(LAUNCH_ARGS.to_vec())
            .build()
            .map_err(BrowserError::Session)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(berr)?;

        // The handler must be polled for the lifetime of the browser; its
        // termination means the browser connection is gone.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Arc::new(CdpBrowser {
            browser: Mutex::new(browser),
            open_pages: Mutex::new(Vec::new()),
            handler_task,
        }))
    }
}

// ---------------------------------------------------------------------------
// Instance
// ---------------------------------------------------------------------------

pub struct CdpBrowser {
    browser: Mutex<Browser>,
    open_pages: Mutex<Vec<Page>>,
    handler_task: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl BrowserInstance for CdpBrowser {
    async fn open_page(
        &self,
        user_agent: &str,
        viewport: Viewport,
    ) -> Result<Box<dyn PageDriver>, BrowserError> {
        let page = {
            let browser = self.browser.lock().await;
            browser.new_page("about:blank").await.map_err(berr)?
        };

        page.execute(
            AddScriptToEvaluateOnNewDocumentParams::builder()
                .source(STEALTH_SCRIPT)
                .build()
                .map_err(BrowserError::Session)?,
        )
        .await
        .map_err(berr)?;

        page.set_user_agent(user_agent).await.map_err(berr)?;

        page.execute(
            SetDeviceMetricsOverrideParams::builder()
                .width(viewport.width as i64)
                .height(viewport.height as i64)
                .device_scale_factor(1.0)
                .mobile(false)
                .build()
                .map_err(BrowserError::Session)?,
        )
        .await
        .map_err(berr)?;

        self.open_pages.lock().await.push(page.clone());
        Ok(Box::new(CdpPage { page }))
    }

    async fn close_open_pages(&self) {
        let pages: Vec<Page> = self.open_pages.lock().await.drain(..).collect();
        for page in pages {
            if let Err(e) = page.close().await {
                tracing::warn!(error = %e, "failed to close page");
            }
        }
    }

    async fn health_check(&self) -> bool {
        let page = {
            let browser = self.browser.lock().await;
            match browser.new_page("about:blank").await {
                Ok(page) => page,
                Err(_) => return false,
            }
        };
        let healthy = page.goto("about:blank").await.is_ok();
        let _ = page.close().await;
        healthy
    }

    async fn close(&self) {
        self.close_open_pages().await;
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            tracing::warn!(error = %e, "failed to close browser");
        }
        self.handler_task.abort();
    }
}

// ---------------------------------------------------------------------------
// Page driver
// ---------------------------------------------------------------------------

struct CdpPage {
    page: Page,
}

impl CdpPage {
    async fn eval<T: serde::de::DeserializeOwned>(&self, expr: &str) -> Result<T, BrowserError> {
        self.page
            .evaluate(expr)
            .await
            .map_err(|e| BrowserError::Evaluation(e.to_string()))?
            .into_value()
            .map_err(|e| BrowserError::Evaluation(e.to_string()))
    }

    async fn ready_state(&self) -> Result<String, BrowserError> {
        self.eval("document.readyState").await
    }

    /// Poll until `predicate(readyState)` holds or the budget elapses.
    async fn wait_ready_state(
        &self,
        timeout: Duration,
        predicate: impl Fn(&str) -> bool,
    ) -> Result<bool, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&self.ready_state().await?) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        let navigation = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| BrowserError::Navigation(e.to_string()))?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|e| BrowserError::Navigation(e.to_string()))?;
            Ok(())
        };
        match tokio::time::timeout(timeout, navigation).await {
            Ok(result) => result,
            Err(_) => Err(BrowserError::NavigationTimeout(timeout)),
        }
    }

    async fn wait_dom_content_loaded(&self, timeout: Duration) -> Result<bool, BrowserError> {
        self.wait_ready_state(timeout, |state| state == "interactive" || state == "complete")
            .await
    }

    async fn wait_load(&self, timeout: Duration) -> Result<bool, BrowserError> {
        self.wait_ready_state(timeout, |state| state == "complete").await
    }

    async fn wait_network_idle(&self, timeout: Duration) -> Result<bool, BrowserError> {
        // CDP exposes no direct network-idle signal; treat a stable
        // resource-entry count held for 500 ms as idle.
        let deadline = Instant::now() + timeout;
        let mut last_count: i64 = -1;
        let mut stable_since = Instant::now();

        loop {
            let count: i64 = self
                .eval("performance.getEntriesByType('resource').length")
                .await?;
            if count == last_count {
                if stable_since.elapsed() >= Duration::from_millis(500) {
                    return Ok(true);
                }
            } else {
                last_count = count;
                stable_since = Instant::now();
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn cookies(&self) -> Result<Vec<RawCookie>, BrowserError> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| BrowserError::Evaluation(e.to_string()))?;

        Ok(cookies
            .into_iter()
            .map(|c| RawCookie {
                name: c.name,
                domain: c.domain,
                path: c.path,
                value: c.value,
                expires: if c.expires < 0.0 { None } else { Some(c.expires) },
                http_only: c.http_only,
                secure: c.secure,
                same_site: map_same_site(c.same_site),
            })
            .collect())
    }

    async fn click_if_visible(&self, selector: &str) -> Result<bool, BrowserError> {
        let escaped = serde_json::to_string(selector)
            .map_err(|e| BrowserError::Evaluation(e.to_string()))?;
        let expr = format!(
            r#"(() => {{
                const el = document.querySelector({escaped});
                if (!el) return false;
                const style = window.getComputedStyle(el);
                const visible = el.offsetParent !== null
                    && style.visibility !== 'hidden'
                    && style.display !== 'none';
                if (!visible) return false;
                el.click();
                return true;
            }})()"#
        );
        self.eval(&expr).await
    }

    async fn hashed_storage(&self) -> Result<StorageSnapshot, BrowserError> {
        // Raw values are hashed here, before anything crosses back into the
        // executor.
        let raw: serde_json::Value = self
            .eval(
                r#"(() => {
                    const dump = (s) => {
                        const out = {};
                        for (let i = 0; i < s.length; i++) {
                            const k = s.key(i);
                            out[k] = s.getItem(k);
                        }
                        return out;
                    };
                    let local = {};
                    let session = {};
                    try { local = dump(localStorage); } catch (e) {}
                    try { session = dump(sessionStorage); } catch (e) {}
                    return { local, session };
                })()"#,
            )
            .await?;

        let mut snapshot = StorageSnapshot::default();
        if let Some(local) = raw.get("local").and_then(|v| v.as_object()) {
            for (key, value) in local {
                if let Some(raw_value) = value.as_str() {
                    snapshot
                        .local_storage
                        .insert(key.clone(), hash_value(raw_value));
                }
            }
        }
        if let Some(session) = raw.get("session").and_then(|v| v.as_object()) {
            for (key, value) in session {
                if let Some(raw_value) = value.as_str() {
                    snapshot
                        .session_storage
                        .insert(key.clone(), hash_value(raw_value));
                }
            }
        }
        Ok(snapshot)
    }

    async fn links(&self) -> Result<Vec<String>, BrowserError> {
        self.eval("Array.from(document.querySelectorAll('a')).map(a => a.href)")
            .await
    }

    async fn scroll_height(&self) -> Result<f64, BrowserError> {
        self.eval("document.body.scrollHeight").await
    }

    async fn scroll_to(&self, y: f64) -> Result<(), BrowserError> {
        let _: bool = self.eval(&format!("(window.scrollTo(0, {y}), true)")).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_site_maps_to_attribute_strings() {
        assert_eq!(map_same_site(Some(CookieSameSite::Strict)), Some("Strict".into()));
        assert_eq!(map_same_site(Some(CookieSameSite::Lax)), Some("Lax".into()));
        assert_eq!(map_same_site(Some(CookieSameSite::None)), Some("None".into()));
        assert_eq!(map_same_site(None), None);
    }
}
