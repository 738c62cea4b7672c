//! Service configuration, environment-driven.
//!
//! Every field has a production default and a `COOKIESCAN_*` environment
//! override; one `ServiceConfig` is built at startup and threaded through
//! the binary.

use serde::{Deserialize, Serialize};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Browser pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserPoolConfig {
    /// 1–10 instances.
    pub pool_size: usize,
    /// Recycle instances older than this many seconds.
    pub max_age_seconds: u64,
    /// Recycle instances idle longer than this many seconds.
    pub max_idle_seconds: u64,
    /// Recycle instances after this many uses.
    pub max_uses_per_instance: u32,
    /// Seconds between background health probes.
    pub health_check_interval_seconds: u64,
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            max_age_seconds: 3600,
            max_idle_seconds: 300,
            max_uses_per_instance: 100,
            health_check_interval_seconds: 60,
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// sqlx database URL.
    pub database_url: String,
    /// HTTP bind address for the gateway.
    pub bind_addr: String,
    /// Worker cap for concurrent trigger invocations.
    pub max_workers: usize,
    /// Semaphore cap for API-triggered parallel scans.
    pub max_scan_concurrency: usize,
    /// Watcher tick, seconds.
    pub schedule_check_interval_seconds: u64,
    /// External schedule source URL; sync is disabled when unset.
    pub schedule_source_url: Option<String>,
    /// External sync cadence, seconds.
    pub sync_interval_seconds: u64,
    /// Trigger firings delayed beyond this window are dropped.
    pub misfire_grace_seconds: u64,
    /// Distributed lock TTL, seconds. Should exceed the p95 scan duration.
    pub lock_ttl_seconds: u64,
    /// Outbound HTTP timeout, seconds.
    pub request_timeout_seconds: u64,
    /// IAB Global Vendor List source.
    pub gvl_url: String,
    /// Local GVL cache path.
    pub gvl_cache_path: String,
    /// Optional path to a classification rules document; the embedded
    /// default rule set is used when unset.
    pub rules_path: Option<String>,
    /// Job-execution retention window, days.
    pub execution_retention_days: i64,
    pub browser: BrowserPoolConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://cookiescan.db?mode=rwc".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            max_workers: 5,
            max_scan_concurrency: 10,
            schedule_check_interval_seconds: 60,
            schedule_source_url: None,
            sync_interval_seconds: 300,
            misfire_grace_seconds: 300,
            lock_ttl_seconds: 300,
            request_timeout_seconds: 10,
            gvl_url: "https://vendor-list.consensu.org/v3/vendor-list.json".to_string(),
            gvl_cache_path: "iab_gvl.json".to_string(),
            rules_path: None,
            execution_retention_days: 30,
            browser: BrowserPoolConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Build from the environment, falling back to defaults field by field.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env_opt("COOKIESCAN_DATABASE_URL").unwrap_or(defaults.database_url),
            bind_addr: env_opt("COOKIESCAN_BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_workers: env_or("COOKIESCAN_MAX_WORKERS", defaults.max_workers),
            max_scan_concurrency: env_or(
                "COOKIESCAN_MAX_SCAN_CONCURRENCY",
                defaults.max_scan_concurrency,
            ),
            schedule_check_interval_seconds: env_or(
                "COOKIESCAN_SCHEDULE_CHECK_INTERVAL",
                defaults.schedule_check_interval_seconds,
            ),
            schedule_source_url: env_opt("COOKIESCAN_SCHEDULE_SOURCE_URL"),
            sync_interval_seconds: env_or(
                "COOKIESCAN_SYNC_INTERVAL",
                defaults.sync_interval_seconds,
            ),
            misfire_grace_seconds: env_or(
                "COOKIESCAN_MISFIRE_GRACE",
                defaults.misfire_grace_seconds,
            ),
            lock_ttl_seconds: env_or("COOKIESCAN_LOCK_TTL", defaults.lock_ttl_seconds),
            request_timeout_seconds: env_or(
                "COOKIESCAN_REQUEST_TIMEOUT",
                defaults.request_timeout_seconds,
            ),
            gvl_url: env_opt("COOKIESCAN_GVL_URL").unwrap_or(defaults.gvl_url),
            gvl_cache_path: env_opt("COOKIESCAN_GVL_CACHE_PATH").unwrap_or(defaults.gvl_cache_path),
            rules_path: env_opt("COOKIESCAN_RULES_PATH"),
            execution_retention_days: env_or(
                "COOKIESCAN_EXECUTION_RETENTION_DAYS",
                defaults.execution_retention_days,
            ),
            browser: BrowserPoolConfig {
                pool_size: env_or("COOKIESCAN_BROWSER_POOL_SIZE", defaults.browser.pool_size),
                max_age_seconds: env_or(
                    "COOKIESCAN_BROWSER_MAX_AGE",
                    defaults.browser.max_age_seconds,
                ),
                max_idle_seconds: env_or(
                    "COOKIESCAN_BROWSER_MAX_IDLE",
                    defaults.browser.max_idle_seconds,
                ),
                max_uses_per_instance: env_or(
                    "COOKIESCAN_BROWSER_MAX_USES",
                    defaults.browser.max_uses_per_instance,
                ),
                health_check_interval_seconds: env_or(
                    "COOKIESCAN_BROWSER_HEALTH_INTERVAL",
                    defaults.browser.health_check_interval_seconds,
                ),
            },
        }
    }
}
