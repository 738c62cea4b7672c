//! Scripted browser fakes for executor and wait-strategy tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

use cookiescan_kernel::browser::{BrowserError, BrowserSession, PageDriver, RawCookie};
use cookiescan_kernel::model::cookie::hash_value;
use cookiescan_kernel::model::scan::{StorageSnapshot, Viewport};

use crate::browser::{BrowserInstance, BrowserLauncher};

/// What a scripted page serves for one URL.
#[derive(Clone, Default)]
pub struct PageScript {
    /// Cookies visible before any consent click.
    pub cookies_before: Vec<RawCookie>,
    /// Additional cookies that appear only after the consent click.
    pub cookies_after_accept: Vec<RawCookie>,
    /// Whether the accept button exists and is visible.
    pub accept_visible: bool,
    /// Anchor hrefs on the page.
    pub links: Vec<String>,
    /// Raw localStorage entries; the driver hashes them like the real one.
    pub local_storage: Vec<(String, String)>,
    pub session_storage: Vec<(String, String)>,
    /// Fail this many navigation attempts before succeeding.
    pub fail_navigations: u32,
}

pub fn raw_cookie(name: &str, domain: &str, value: &str) -> RawCookie {
    RawCookie {
        name: name.to_string(),
        domain: domain.to_string(),
        path: "/".to_string(),
        value: value.to_string(),
        expires: None,
        http_only: false,
        secure: false,
        same_site: None,
    }
}

/// A fake browser serving scripted pages by URL. Implements both the
/// pool-facing [`BrowserInstance`] and the executor-facing
/// [`BrowserSession`].
pub struct ScriptedBrowser {
    scripts: Arc<HashMap<String, PageScript>>,
}

impl ScriptedBrowser {
    pub fn new(scripts: HashMap<String, PageScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Arc::new(scripts),
        })
    }

    pub fn single(url: &str, script: PageScript) -> Arc<Self> {
        Self::new(HashMap::from([(url.to_string(), script)]))
    }
}

#[async_trait]
impl BrowserSession for ScriptedBrowser {
    async fn open_page(
        &self,
        _user_agent: &str,
        _viewport: Viewport,
    ) -> Result<Box<dyn PageDriver>, BrowserError> {
        Ok(Box::new(ScriptedPage {
            scripts: Arc::clone(&self.scripts),
            state: Mutex::new(PageState::default()),
        }))
    }
}

#[async_trait]
impl BrowserInstance for ScriptedBrowser {
    async fn open_page(
        &self,
        user_agent: &str,
        viewport: Viewport,
    ) -> Result<Box<dyn PageDriver>, BrowserError> {
        BrowserSession::open_page(self, user_agent, viewport).await
    }

    async fn close_open_pages(&self) {}

    async fn health_check(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

/// Launcher handing out clones of one scripted browser.
pub struct ScriptedLauncher {
    browser: Arc<ScriptedBrowser>,
}

impl ScriptedLauncher {
    pub fn new(browser: Arc<ScriptedBrowser>) -> Arc<Self> {
        Arc::new(Self { browser })
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserInstance>, BrowserError> {
        Ok(Arc::clone(&self.browser) as Arc<dyn BrowserInstance>)
    }
}

#[derive(Default)]
struct PageState {
    current_url: Option<String>,
    clicked: bool,
    attempts: HashMap<String, u32>,
}

struct ScriptedPage {
    scripts: Arc<HashMap<String, PageScript>>,
    state: Mutex<PageState>,
}

impl ScriptedPage {
    fn script_for(&self, url: &str) -> PageScript {
        self.scripts.get(url).cloned().unwrap_or_default()
    }

    fn current_script(&self) -> Option<(String, PageScript, bool)> {
        let state = self.state.lock();
        state
            .current_url
            .as_ref()
            .map(|url| (url.clone(), self.script_for(url), state.clicked))
    }
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        let script = self.script_for(url);
        let mut state = self.state.lock();
        let attempts = state.attempts.entry(url.to_string()).or_insert(0);
        *attempts += 1;
        if *attempts <= script.fail_navigations {
            return Err(BrowserError::Navigation(format!(
                "scripted failure {attempts} for {url}"
            )));
        }
        state.current_url = Some(url.to_string());
        state.clicked = false;
        Ok(())
    }

    async fn wait_dom_content_loaded(&self, _timeout: Duration) -> Result<bool, BrowserError> {
        Ok(true)
    }

    async fn wait_load(&self, _timeout: Duration) -> Result<bool, BrowserError> {
        Ok(true)
    }

    async fn wait_network_idle(&self, _timeout: Duration) -> Result<bool, BrowserError> {
        Ok(true)
    }

    async fn cookies(&self) -> Result<Vec<RawCookie>, BrowserError> {
        let Some((_, script, clicked)) = self.current_script() else {
            return Ok(Vec::new());
        };
        let mut cookies = script.cookies_before.clone();
        if clicked {
            cookies.extend(script.cookies_after_accept.clone());
        }
        Ok(cookies)
    }

    async fn click_if_visible(&self, _selector: &str) -> Result<bool, BrowserError> {
        let Some((_, script, _)) = self.current_script() else {
            return Ok(false);
        };
        if script.accept_visible {
            self.state.lock().clicked = true;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn hashed_storage(&self) -> Result<StorageSnapshot, BrowserError> {
        let Some((_, script, _)) = self.current_script() else {
            return Ok(StorageSnapshot::default());
        };
        let mut snapshot = StorageSnapshot::default();
        for (key, value) in &script.local_storage {
            snapshot.local_storage.insert(key.clone(), hash_value(value));
        }
        for (key, value) in &script.session_storage {
            snapshot
                .session_storage
                .insert(key.clone(), hash_value(value));
        }
        Ok(snapshot)
    }

    async fn links(&self) -> Result<Vec<String>, BrowserError> {
        Ok(self
            .current_script()
            .map(|(_, script, _)| script.links)
            .unwrap_or_default())
    }

    async fn scroll_height(&self) -> Result<f64, BrowserError> {
        Ok(0.0)
    }

    async fn scroll_to(&self, _y: f64) -> Result<(), BrowserError> {
        Ok(())
    }
}
