//! Wait strategies for dynamic content.
//!
//! One contract: wait on a page with a bounded budget and report whether
//! the condition was reached. The returned value is informational; a wait
//! that times out never aborts the scan.

use std::time::Duration;

use cookiescan_kernel::browser::PageDriver;
use cookiescan_kernel::model::scan::WaitStrategy;

/// Run the configured strategy against a freshly navigated page.
pub async fn wait_for_content(
    page: &dyn PageDriver,
    strategy: WaitStrategy,
    timeout: Duration,
    url: &str,
) -> bool {
    let reached = match strategy {
        WaitStrategy::Timeout => {
            tokio::time::sleep(timeout).await;
            Ok(true)
        }
        WaitStrategy::DomContentLoaded => page.wait_dom_content_loaded(timeout).await,
        WaitStrategy::NetworkIdle => page.wait_network_idle(timeout).await,
        WaitStrategy::Load => page.wait_load(timeout).await,
        WaitStrategy::Combined => return wait_combined(page, timeout, url).await,
    };

    match reached {
        Ok(true) => true,
        Ok(false) => {
            tracing::warn!(url, strategy = ?strategy, "wait strategy timed out");
            false
        }
        Err(e) => {
            tracing::warn!(url, strategy = ?strategy, error = %e, "wait strategy failed");
            false
        }
    }
}

/// DOMContentLoaded on half the budget, then network idle on the other
/// half; a short fixed sleep covers the timeout path.
async fn wait_combined(page: &dyn PageDriver, timeout: Duration, url: &str) -> bool {
    let half = timeout / 2;

    let dom = page.wait_dom_content_loaded(half).await.unwrap_or(false);
    let idle = if dom {
        page.wait_network_idle(half).await.unwrap_or(false)
    } else {
        false
    };

    if dom && idle {
        return true;
    }

    tracing::warn!(url, "combined wait timed out; falling back to fixed sleep");
    let fallback = timeout / 4;
    if !fallback.is_zero() {
        tokio::time::sleep(fallback).await;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{PageScript, ScriptedBrowser};
    use cookiescan_kernel::browser::BrowserSession;
    use cookiescan_kernel::model::scan::Viewport;
    use std::time::Instant;

    async fn page() -> Box<dyn PageDriver> {
        let browser = ScriptedBrowser::single("https://example.test", PageScript::default());
        browser
            .open_page("ua", Viewport::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn timeout_strategy_sleeps_the_full_budget() {
        let page = page().await;
        let start = Instant::now();
        let ok = wait_for_content(
            page.as_ref(),
            WaitStrategy::Timeout,
            Duration::from_millis(120),
            "https://example.test",
        )
        .await;
        assert!(ok);
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn event_strategies_return_the_drivers_answer() {
        let page = page().await;
        for strategy in [
            WaitStrategy::DomContentLoaded,
            WaitStrategy::NetworkIdle,
            WaitStrategy::Load,
        ] {
            assert!(
                wait_for_content(
                    page.as_ref(),
                    strategy,
                    Duration::from_millis(50),
                    "https://example.test"
                )
                .await
            );
        }
    }

    #[tokio::test]
    async fn combined_succeeds_when_both_phases_succeed() {
        let page = page().await;
        assert!(
            wait_for_content(
                page.as_ref(),
                WaitStrategy::Combined,
                Duration::from_millis(100),
                "https://example.test"
            )
            .await
        );
    }
}
