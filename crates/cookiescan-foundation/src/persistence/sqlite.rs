//! SQLite storage backend.
//!
//! Production persistence over `sqlx`. Conventions, shared with every other
//! table in this service:
//!
//! - timestamps are RFC 3339 `TEXT` in UTC;
//! - JSON-shaped columns (`scan_params`, `time_config`, `pages_visited`,
//!   `storages`, `iab_purposes`, `metadata`, `error_details`) are serialized
//!   `TEXT`;
//! - ids are `TEXT` UUIDs.
//!
//! Schema bootstrap runs at connect time with `CREATE TABLE IF NOT EXISTS`;
//! there is no separate migration step for a fresh database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use cookiescan_kernel::model::cookie::{Classification, Cookie, CookieCategory, CookieType, ObservedCookie, Source};
use cookiescan_kernel::model::execution::{ExecutionStatus, JobExecution};
use cookiescan_kernel::model::scan::{ScanMode, ScanResult, ScanStatus, StorageSnapshot};
use cookiescan_kernel::model::schedule::{Frequency, Schedule};
use cookiescan_kernel::store::{
    ExecutionCompletion, JobExecutionStore, NewSchedule, OverrideStore, ScanFilter,
    ScanResultStore, SchedulePatch, ScheduleStore, StoreError, StoreResult,
};

const DEFAULT_LIST_LIMIT: usize = 50;

/// SQLite-backed store implementing all four kernel store traits.
pub struct SqliteStore {
    pool: SqlitePool,
}

fn qerr(e: sqlx::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn serr(e: impl std::fmt::Display) -> StoreError {
    StoreError::Serialization(e.to_string())
}

fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn parse_time(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(serr)
}

fn parse_opt_time(raw: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    raw.map(|s| parse_time(&s)).transpose()
}

/// A bind value for dynamically-built statements.
enum Bind {
    Text(String),
    Int(i64),
}

impl SqliteStore {
    /// Connect and bootstrap the schema.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        Self::connect_with_options(database_url, 5).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
    ) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// A private in-memory database, for tests.
    pub async fn in_memory() -> StoreResult<Self> {
        // A single connection keeps the :memory: database alive and shared.
        Self::connect_with_options("sqlite::memory:", 1).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS schedules (
                schedule_id TEXT PRIMARY KEY,
                domain_config_id TEXT NOT NULL,
                domain TEXT NOT NULL,
                scan_type TEXT NOT NULL,
                scan_params TEXT NOT NULL,
                frequency TEXT NOT NULL,
                time_config TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                profile_id TEXT,
                next_run TEXT,
                last_run TEXT,
                last_status TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_schedules_domain_config
                ON schedules(domain_config_id)",
            r#"
            CREATE TABLE IF NOT EXISTS scan_results (
                scan_id TEXT PRIMARY KEY,
                domain_config_id TEXT NOT NULL,
                domain TEXT NOT NULL,
                scan_mode TEXT NOT NULL,
                timestamp_utc TEXT NOT NULL,
                status TEXT NOT NULL,
                duration_seconds REAL,
                total_cookies INTEGER NOT NULL DEFAULT 0,
                page_count INTEGER NOT NULL DEFAULT 0,
                pages_visited TEXT NOT NULL DEFAULT '[]',
                storages TEXT NOT NULL DEFAULT '{}',
                error TEXT,
                params TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS cookies (
                cookie_id TEXT PRIMARY KEY,
                scan_id TEXT NOT NULL REFERENCES scan_results(scan_id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                domain TEXT NOT NULL,
                path TEXT NOT NULL,
                hashed_value TEXT NOT NULL,
                cookie_duration TEXT NOT NULL,
                size INTEGER NOT NULL,
                http_only INTEGER NOT NULL,
                secure INTEGER NOT NULL,
                same_site TEXT,
                category TEXT NOT NULL,
                vendor TEXT NOT NULL,
                cookie_type TEXT NOT NULL,
                set_after_accept INTEGER NOT NULL,
                iab_purposes TEXT NOT NULL DEFAULT '[]',
                description TEXT NOT NULL DEFAULT '',
                source TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}'
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_cookies_scan ON cookies(scan_id)",
            r#"
            CREATE TABLE IF NOT EXISTS job_executions (
                execution_id TEXT PRIMARY KEY,
                schedule_id TEXT NOT NULL,
                job_id TEXT NOT NULL,
                domain TEXT NOT NULL,
                domain_config_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                duration_seconds REAL,
                scan_id TEXT,
                error_message TEXT,
                error_details TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_executions_schedule
                ON job_executions(schedule_id)",
            r#"
            CREATE TABLE IF NOT EXISTS scheduler_locks (
                resource_key TEXT PRIMARY KEY,
                token TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS cookie_overrides (
                domain_config_id TEXT NOT NULL,
                cookie_name TEXT NOT NULL,
                category TEXT NOT NULL,
                vendor TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                iab_purposes TEXT NOT NULL DEFAULT '[]',
                PRIMARY KEY (domain_config_id, cookie_name)
            )
            "#,
        ];

        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await.map_err(qerr)?;
        }
        Ok(())
    }

    // -- row parsing --------------------------------------------------------

    fn parse_schedule_row(row: &SqliteRow) -> StoreResult<Schedule> {
        let schedule_id: String = row.try_get("schedule_id").map_err(qerr)?;
        let scan_type: String = row.try_get("scan_type").map_err(qerr)?;
        let scan_params: String = row.try_get("scan_params").map_err(qerr)?;
        let frequency: String = row.try_get("frequency").map_err(qerr)?;
        let time_config: String = row.try_get("time_config").map_err(qerr)?;
        let enabled: i64 = row.try_get("enabled").map_err(qerr)?;
        let created_at: String = row.try_get("created_at").map_err(qerr)?;
        let updated_at: String = row.try_get("updated_at").map_err(qerr)?;

        Ok(Schedule {
            schedule_id: Uuid::parse_str(&schedule_id).map_err(serr)?,
            domain_config_id: row.try_get("domain_config_id").map_err(qerr)?,
            domain: row.try_get("domain").map_err(qerr)?,
            scan_type: ScanMode::parse(&scan_type)
                .ok_or_else(|| serr(format!("bad scan_type '{scan_type}'")))?,
            scan_params: serde_json::from_str(&scan_params).map_err(serr)?,
            frequency: Frequency::parse(&frequency)
                .ok_or_else(|| serr(format!("bad frequency '{frequency}'")))?,
            time_config: serde_json::from_str(&time_config).map_err(serr)?,
            enabled: enabled != 0,
            profile_id: row.try_get("profile_id").map_err(qerr)?,
            next_run: parse_opt_time(row.try_get("next_run").map_err(qerr)?)?,
            last_run: parse_opt_time(row.try_get("last_run").map_err(qerr)?)?,
            last_status: row.try_get("last_status").map_err(qerr)?,
            created_at: parse_time(&created_at)?,
            updated_at: parse_time(&updated_at)?,
        })
    }

    fn parse_scan_row(row: &SqliteRow) -> StoreResult<ScanResult> {
        let scan_id: String = row.try_get("scan_id").map_err(qerr)?;
        let scan_mode: String = row.try_get("scan_mode").map_err(qerr)?;
        let status: String = row.try_get("status").map_err(qerr)?;
        let pages_visited: String = row.try_get("pages_visited").map_err(qerr)?;
        let storages: String = row.try_get("storages").map_err(qerr)?;
        let params: String = row.try_get("params").map_err(qerr)?;
        let timestamp_utc: String = row.try_get("timestamp_utc").map_err(qerr)?;
        let created_at: String = row.try_get("created_at").map_err(qerr)?;
        let updated_at: String = row.try_get("updated_at").map_err(qerr)?;
        let total_cookies: i64 = row.try_get("total_cookies").map_err(qerr)?;
        let page_count: i64 = row.try_get("page_count").map_err(qerr)?;

        let storages: StorageSnapshot = if storages == "{}" {
            StorageSnapshot::default()
        } else {
            serde_json::from_str(&storages).map_err(serr)?
        };

        Ok(ScanResult {
            scan_id: Uuid::parse_str(&scan_id).map_err(serr)?,
            domain_config_id: row.try_get("domain_config_id").map_err(qerr)?,
            domain: row.try_get("domain").map_err(qerr)?,
            scan_mode: ScanMode::parse(&scan_mode)
                .ok_or_else(|| serr(format!("bad scan_mode '{scan_mode}'")))?,
            status: ScanStatus::parse(&status)
                .ok_or_else(|| serr(format!("bad status '{status}'")))?,
            timestamp_utc: parse_time(&timestamp_utc)?,
            duration_seconds: row.try_get("duration_seconds").map_err(qerr)?,
            pages_visited: serde_json::from_str(&pages_visited).map_err(serr)?,
            cookies: Vec::new(), // attached separately by `get`
            storages,
            total_cookies: total_cookies as usize,
            page_count: page_count as usize,
            error: row.try_get("error").map_err(qerr)?,
            params: serde_json::from_str(&params).map_err(serr)?,
            created_at: parse_time(&created_at)?,
            updated_at: parse_time(&updated_at)?,
        })
    }

    fn parse_cookie_row(row: &SqliteRow) -> StoreResult<Cookie> {
        let category: String = row.try_get("category").map_err(qerr)?;
        let source: String = row.try_get("source").map_err(qerr)?;
        let cookie_type: String = row.try_get("cookie_type").map_err(qerr)?;
        let iab_purposes: String = row.try_get("iab_purposes").map_err(qerr)?;
        let metadata: String = row.try_get("metadata").map_err(qerr)?;
        let size: i64 = row.try_get("size").map_err(qerr)?;
        let http_only: i64 = row.try_get("http_only").map_err(qerr)?;
        let secure: i64 = row.try_get("secure").map_err(qerr)?;
        let set_after_accept: i64 = row.try_get("set_after_accept").map_err(qerr)?;

        let metadata: serde_json::Value = serde_json::from_str(&metadata).map_err(serr)?;
        let cookie_type = match cookie_type.as_str() {
            "First Party" => CookieType::FirstParty,
            "Third Party" => CookieType::ThirdParty,
            _ => CookieType::Unknown,
        };

        Ok(Cookie {
            observed: ObservedCookie {
                name: row.try_get("name").map_err(qerr)?,
                domain: row.try_get("domain").map_err(qerr)?,
                path: row.try_get("path").map_err(qerr)?,
                hashed_value: row.try_get("hashed_value").map_err(qerr)?,
                cookie_duration: row.try_get("cookie_duration").map_err(qerr)?,
                size: size as usize,
                http_only: http_only != 0,
                secure: secure != 0,
                same_site: row.try_get("same_site").map_err(qerr)?,
                cookie_type,
                set_after_accept: set_after_accept != 0,
            },
            classification: Classification {
                category: CookieCategory::parse(&category).unwrap_or(CookieCategory::Unknown),
                vendor: row.try_get("vendor").map_err(qerr)?,
                description: row.try_get("description").map_err(qerr)?,
                iab_purposes: serde_json::from_str(&iab_purposes).map_err(serr)?,
                source: Source::parse(&source).unwrap_or(Source::Fallback),
                ml_confidence: metadata.get("ml_confidence").and_then(|v| v.as_f64()),
                ml_probabilities: metadata
                    .get("ml_probabilities")
                    .and_then(|v| serde_json::from_value(v.clone()).ok()),
                classification_evidence: metadata
                    .get("classification_evidence")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default(),
                requires_review: metadata
                    .get("requires_review")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            },
        })
    }

    fn parse_execution_row(row: &SqliteRow) -> StoreResult<JobExecution> {
        let execution_id: String = row.try_get("execution_id").map_err(qerr)?;
        let schedule_id: String = row.try_get("schedule_id").map_err(qerr)?;
        let status: String = row.try_get("status").map_err(qerr)?;
        let started_at: String = row.try_get("started_at").map_err(qerr)?;
        let scan_id: Option<String> = row.try_get("scan_id").map_err(qerr)?;
        let error_details: Option<String> = row.try_get("error_details").map_err(qerr)?;
        let metadata: String = row.try_get("metadata").map_err(qerr)?;

        Ok(JobExecution {
            execution_id: Uuid::parse_str(&execution_id).map_err(serr)?,
            schedule_id: Uuid::parse_str(&schedule_id).map_err(serr)?,
            job_id: row.try_get("job_id").map_err(qerr)?,
            domain: row.try_get("domain").map_err(qerr)?,
            domain_config_id: row.try_get("domain_config_id").map_err(qerr)?,
            status: ExecutionStatus::parse(&status)
                .ok_or_else(|| serr(format!("bad execution status '{status}'")))?,
            started_at: parse_time(&started_at)?,
            completed_at: parse_opt_time(row.try_get("completed_at").map_err(qerr)?)?,
            duration_seconds: row.try_get("duration_seconds").map_err(qerr)?,
            scan_id: scan_id
                .map(|s| Uuid::parse_str(&s).map_err(serr))
                .transpose()?,
            error_message: row.try_get("error_message").map_err(qerr)?,
            error_details: error_details
                .map(|s| serde_json::from_str(&s).map_err(serr))
                .transpose()?,
            metadata: serde_json::from_str(&metadata).map_err(serr)?,
        })
    }

    fn cookie_metadata(c: &Classification) -> serde_json::Value {
        serde_json::json!({
            "ml_confidence": c.ml_confidence,
            "ml_probabilities": c.ml_probabilities,
            "classification_evidence": c.classification_evidence,
            "requires_review": c.requires_review,
        })
    }
}

// ---------------------------------------------------------------------------
// ScheduleStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn create(&self, new: NewSchedule) -> StoreResult<Uuid> {
        let schedule_id = Uuid::new_v4();
        let now = fmt_time(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO schedules (
                schedule_id, domain_config_id, domain, scan_type, scan_params,
                frequency, time_config, enabled, profile_id, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(schedule_id.to_string())
        .bind(&new.domain_config_id)
        .bind(&new.domain)
        .bind(new.scan_type.as_str())
        .bind(serde_json::to_string(&new.scan_params).map_err(serr)?)
        .bind(new.frequency.as_str())
        .bind(serde_json::to_string(&new.time_config).map_err(serr)?)
        .bind(new.enabled as i64)
        .bind(&new.profile_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(qerr)?;

        tracing::info!(schedule_id = %schedule_id, domain = %new.domain, "created schedule");
        Ok(schedule_id)
    }

    async fn get_schedule(&self, schedule_id: Uuid) -> StoreResult<Option<Schedule>> {
        let row = sqlx::query("SELECT * FROM schedules WHERE schedule_id = ?")
            .bind(schedule_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(qerr)?;
        row.as_ref().map(Self::parse_schedule_row).transpose()
    }

    async fn list_schedules(&self, enabled_only: bool) -> StoreResult<Vec<Schedule>> {
        let sql = if enabled_only {
            "SELECT * FROM schedules WHERE enabled = 1 ORDER BY domain, created_at"
        } else {
            "SELECT * FROM schedules ORDER BY domain, created_at"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await.map_err(qerr)?;
        rows.iter().map(Self::parse_schedule_row).collect()
    }

    async fn list_by_domain_config_id(
        &self,
        domain_config_id: &str,
    ) -> StoreResult<Vec<Schedule>> {
        let rows =
            sqlx::query("SELECT * FROM schedules WHERE domain_config_id = ? ORDER BY created_at")
                .bind(domain_config_id)
                .fetch_all(&self.pool)
                .await
                .map_err(qerr)?;
        rows.iter().map(Self::parse_schedule_row).collect()
    }

    async fn update(&self, schedule_id: Uuid, patch: SchedulePatch) -> StoreResult<bool> {
        if patch.is_empty() {
            tracing::warn!(schedule_id = %schedule_id, "empty patch; nothing to update");
            return Ok(false);
        }

        let mut sets: Vec<&str> = Vec::new();
        let mut binds: Vec<Bind> = Vec::new();

        if let Some(freq) = patch.frequency {
            sets.push("frequency = ?");
            binds.push(Bind::Text(freq.as_str().to_string()));
        }
        if let Some(tc) = &patch.time_config {
            sets.push("time_config = ?");
            binds.push(Bind::Text(serde_json::to_string(tc).map_err(serr)?));
        }
        if let Some(mode) = patch.scan_type {
            sets.push("scan_type = ?");
            binds.push(Bind::Text(mode.as_str().to_string()));
        }
        if let Some(params) = &patch.scan_params {
            sets.push("scan_params = ?");
            binds.push(Bind::Text(serde_json::to_string(params).map_err(serr)?));
        }
        if let Some(profile) = &patch.profile_id {
            sets.push("profile_id = ?");
            binds.push(Bind::Text(profile.clone()));
        }
        if let Some(enabled) = patch.enabled {
            sets.push("enabled = ?");
            binds.push(Bind::Int(enabled as i64));
        }
        if let Some(next_run) = patch.next_run {
            sets.push("next_run = ?");
            binds.push(Bind::Text(fmt_time(next_run)));
        }
        sets.push("updated_at = ?");
        binds.push(Bind::Text(fmt_time(Utc::now())));

        let sql = format!(
            "UPDATE schedules SET {} WHERE schedule_id = ?",
            sets.join(", ")
        );
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = match bind {
                Bind::Text(v) => query.bind(v),
                Bind::Int(v) => query.bind(v),
            };
        }
        let result = query
            .bind(schedule_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(qerr)?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_run_status(
        &self,
        schedule_id: Uuid,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
        status: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE schedules
             SET last_run = ?, next_run = ?, last_status = ?, updated_at = ?
             WHERE schedule_id = ?",
        )
        .bind(fmt_time(last_run))
        .bind(next_run.map(fmt_time))
        .bind(status)
        .bind(fmt_time(Utc::now()))
        .bind(schedule_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(qerr)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_schedule(&self, schedule_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE schedule_id = ?")
            .bind(schedule_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(qerr)?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// ScanResultStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ScanResultStore for SqliteStore {
    async fn create_pending(&self, result: &ScanResult) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_results (
                scan_id, domain_config_id, domain, scan_mode, timestamp_utc,
                status, params, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(result.scan_id.to_string())
        .bind(&result.domain_config_id)
        .bind(&result.domain)
        .bind(result.scan_mode.as_str())
        .bind(fmt_time(result.timestamp_utc))
        .bind(result.status.as_str())
        .bind(serde_json::to_string(&result.params).map_err(serr)?)
        .bind(fmt_time(result.created_at))
        .bind(fmt_time(result.updated_at))
        .execute(&self.pool)
        .await
        .map_err(qerr)?;
        Ok(())
    }

    async fn update_status(
        &self,
        scan_id: Uuid,
        status: ScanStatus,
        error: Option<&str>,
        duration_seconds: Option<f64>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE scan_results
             SET status = ?, error = COALESCE(?, error),
                 duration_seconds = COALESCE(?, duration_seconds), updated_at = ?
             WHERE scan_id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(duration_seconds)
        .bind(fmt_time(Utc::now()))
        .bind(scan_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(qerr)?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_completed(&self, result: &ScanResult, batch_size: usize) -> StoreResult<()> {
        let batch_size = batch_size.max(1);

        sqlx::query(
            "UPDATE scan_results
             SET status = ?, duration_seconds = ?, total_cookies = ?, page_count = ?,
                 pages_visited = ?, storages = ?, error = ?, updated_at = ?
             WHERE scan_id = ?",
        )
        .bind(result.status.as_str())
        .bind(result.duration_seconds)
        .bind(result.total_cookies as i64)
        .bind(result.page_count as i64)
        .bind(serde_json::to_string(&result.pages_visited).map_err(serr)?)
        .bind(serde_json::to_string(&result.storages).map_err(serr)?)
        .bind(&result.error)
        .bind(fmt_time(Utc::now()))
        .bind(result.scan_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(qerr)?;

        // Re-persisting a result replaces its cookie set.
        sqlx::query("DELETE FROM cookies WHERE scan_id = ?")
            .bind(result.scan_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(qerr)?;

        for chunk in result.cookies.chunks(batch_size) {
            let mut tx = self.pool.begin().await.map_err(qerr)?;
            for cookie in chunk {
                let cookie_type = match cookie.observed.cookie_type {
                    CookieType::FirstParty => "First Party",
                    CookieType::ThirdParty => "Third Party",
                    CookieType::Unknown => "unknown",
                };
                sqlx::query(
                    r#"
                    INSERT INTO cookies (
                        cookie_id, scan_id, name, domain, path, hashed_value,
                        cookie_duration, size, http_only, secure, same_site,
                        category, vendor, cookie_type, set_after_accept,
                        iab_purposes, description, source, metadata
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(result.scan_id.to_string())
                .bind(&cookie.observed.name)
                .bind(&cookie.observed.domain)
                .bind(&cookie.observed.path)
                .bind(&cookie.observed.hashed_value)
                .bind(&cookie.observed.cookie_duration)
                .bind(cookie.observed.size as i64)
                .bind(cookie.observed.http_only as i64)
                .bind(cookie.observed.secure as i64)
                .bind(&cookie.observed.same_site)
                .bind(cookie.classification.category.as_str())
                .bind(&cookie.classification.vendor)
                .bind(cookie_type)
                .bind(cookie.observed.set_after_accept as i64)
                .bind(serde_json::to_string(&cookie.classification.iab_purposes).map_err(serr)?)
                .bind(&cookie.classification.description)
                .bind(cookie.classification.source.as_str())
                .bind(Self::cookie_metadata(&cookie.classification).to_string())
                .execute(&mut *tx)
                .await
                .map_err(qerr)?;
            }
            tx.commit().await.map_err(qerr)?;
        }

        tracing::debug!(
            scan_id = %result.scan_id,
            cookies = result.cookies.len(),
            "persisted scan result"
        );
        Ok(())
    }

    async fn get_scan(&self, scan_id: Uuid) -> StoreResult<Option<ScanResult>> {
        let row = sqlx::query("SELECT * FROM scan_results WHERE scan_id = ?")
            .bind(scan_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(qerr)?;

        let Some(row) = row else { return Ok(None) };
        let mut result = Self::parse_scan_row(&row)?;

        let cookie_rows = sqlx::query("SELECT * FROM cookies WHERE scan_id = ? ORDER BY name")
            .bind(scan_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(qerr)?;
        result.cookies = cookie_rows
            .iter()
            .map(Self::parse_cookie_row)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Some(result))
    }

    async fn list_scans(&self, filter: &ScanFilter) -> StoreResult<(Vec<ScanResult>, usize)> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut binds: Vec<String> = Vec::new();

        if let Some(domain) = &filter.domain {
            clauses.push("domain = ?");
            binds.push(domain.clone());
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            binds.push(status.as_str().to_string());
        }
        if let Some(mode) = filter.scan_mode {
            clauses.push("scan_mode = ?");
            binds.push(mode.as_str().to_string());
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) AS n FROM scan_results{where_clause}");
        let mut count_query = sqlx::query(&count_sql);
        for bind in &binds {
            count_query = count_query.bind(bind);
        }
        let total: i64 = count_query
            .fetch_one(&self.pool)
            .await
            .map_err(qerr)?
            .try_get("n")
            .map_err(qerr)?;

        let limit = if filter.limit == 0 {
            DEFAULT_LIST_LIMIT
        } else {
            filter.limit
        };
        let list_sql = format!(
            "SELECT * FROM scan_results{where_clause}
             ORDER BY timestamp_utc DESC LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query(&list_sql);
        for bind in &binds {
            list_query = list_query.bind(bind);
        }
        let rows = list_query
            .bind(limit as i64)
            .bind(filter.offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(qerr)?;

        let results = rows
            .iter()
            .map(Self::parse_scan_row)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((results, total as usize))
    }

    async fn delete_scan(&self, scan_id: Uuid) -> StoreResult<bool> {
        sqlx::query("DELETE FROM cookies WHERE scan_id = ?")
            .bind(scan_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(qerr)?;
        let result = sqlx::query("DELETE FROM scan_results WHERE scan_id = ?")
            .bind(scan_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(qerr)?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// JobExecutionStore
// ---------------------------------------------------------------------------

#[async_trait]
impl JobExecutionStore for SqliteStore {
    async fn start(&self, execution: &JobExecution) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO job_executions (
                execution_id, schedule_id, job_id, domain, domain_config_id,
                status, started_at, metadata
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution.execution_id.to_string())
        .bind(execution.schedule_id.to_string())
        .bind(&execution.job_id)
        .bind(&execution.domain)
        .bind(&execution.domain_config_id)
        .bind(execution.status.as_str())
        .bind(fmt_time(execution.started_at))
        .bind(execution.metadata.to_string())
        .execute(&self.pool)
        .await
        .map_err(qerr)?;
        Ok(())
    }

    async fn complete(
        &self,
        execution_id: Uuid,
        completion: ExecutionCompletion,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE job_executions
             SET status = ?, completed_at = ?, duration_seconds = ?,
                 scan_id = ?, error_message = ?, error_details = ?
             WHERE execution_id = ?",
        )
        .bind(completion.status.as_str())
        .bind(fmt_time(completion.completed_at))
        .bind(completion.duration_seconds)
        .bind(completion.scan_id.map(|id| id.to_string()))
        .bind(&completion.error_message)
        .bind(
            completion
                .error_details
                .as_ref()
                .map(|details| details.to_string()),
        )
        .bind(execution_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(qerr)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_execution(&self, execution_id: Uuid) -> StoreResult<Option<JobExecution>> {
        let row = sqlx::query("SELECT * FROM job_executions WHERE execution_id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(qerr)?;
        row.as_ref().map(Self::parse_execution_row).transpose()
    }

    async fn list_by_schedule(
        &self,
        schedule_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<JobExecution>> {
        let limit = if limit == 0 { DEFAULT_LIST_LIMIT } else { limit };
        let rows = sqlx::query(
            "SELECT * FROM job_executions WHERE schedule_id = ?
             ORDER BY started_at DESC LIMIT ? OFFSET ?",
        )
        .bind(schedule_id.to_string())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(qerr)?;
        rows.iter().map(Self::parse_execution_row).collect()
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM job_executions WHERE started_at < ?")
            .bind(fmt_time(cutoff))
            .execute(&self.pool)
            .await
            .map_err(qerr)?;
        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// OverrideStore
// ---------------------------------------------------------------------------

#[async_trait]
impl OverrideStore for SqliteStore {
    async fn overrides_for(
        &self,
        domain_config_id: &str,
    ) -> StoreResult<HashMap<String, Classification>> {
        let rows = sqlx::query("SELECT * FROM cookie_overrides WHERE domain_config_id = ?")
            .bind(domain_config_id)
            .fetch_all(&self.pool)
            .await
            .map_err(qerr)?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("cookie_name").map_err(qerr)?;
            let category: String = row.try_get("category").map_err(qerr)?;
            let iab_purposes: String = row.try_get("iab_purposes").map_err(qerr)?;
            map.insert(
                name,
                Classification {
                    category: CookieCategory::parse(&category).unwrap_or(CookieCategory::Unknown),
                    vendor: row.try_get("vendor").map_err(qerr)?,
                    description: row.try_get("description").map_err(qerr)?,
                    iab_purposes: serde_json::from_str(&iab_purposes).map_err(serr)?,
                    source: Source::Db,
                    ml_confidence: None,
                    ml_probabilities: None,
                    classification_evidence: vec![
                        "Database override (highest priority)".to_string()
                    ],
                    requires_review: false,
                },
            );
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cookiescan_kernel::model::scan::ScanParams;
    use cookiescan_kernel::model::schedule::TimeConfig;

    fn new_schedule(domain: &str, config_id: &str) -> NewSchedule {
        NewSchedule {
            domain_config_id: config_id.to_string(),
            domain: domain.to_string(),
            scan_type: ScanMode::Deep,
            scan_params: ScanParams::default(),
            frequency: Frequency::Daily,
            time_config: TimeConfig::daily(9, 0),
            enabled: true,
            profile_id: None,
        }
    }

    #[tokio::test]
    async fn schedule_create_then_get_round_trips() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store
            .create(new_schedule("https://example.test", "cfg-1"))
            .await
            .unwrap();

        let loaded = store.get_schedule(id).await.unwrap().unwrap();
        assert_eq!(loaded.domain, "https://example.test");
        assert_eq!(loaded.frequency, Frequency::Daily);
        assert_eq!(loaded.time_config, TimeConfig::daily(9, 0));
        assert!(loaded.enabled);
        assert!(loaded.last_run.is_none());
    }

    #[tokio::test]
    async fn list_orders_by_domain_then_created_at() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create(new_schedule("https://b.test", "b")).await.unwrap();
        store.create(new_schedule("https://a.test", "a")).await.unwrap();

        let all = store.list_schedules(false).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].domain, "https://a.test");
    }

    #[tokio::test]
    async fn partial_update_touches_updated_at() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store
            .create(new_schedule("https://example.test", "cfg-1"))
            .await
            .unwrap();
        let before = store.get_schedule(id).await.unwrap().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let patch = SchedulePatch {
            time_config: Some(TimeConfig::daily(10, 0)),
            ..Default::default()
        };
        assert!(store.update(id, patch).await.unwrap());

        let after = store.get_schedule(id).await.unwrap().unwrap();
        assert_eq!(after.time_config, TimeConfig::daily(10, 0));
        assert_eq!(after.frequency, Frequency::Daily);
        assert!(after.updated_at > before.updated_at);
    }

    #[tokio::test]
    async fn empty_patch_is_a_noop() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store
            .create(new_schedule("https://example.test", "cfg-1"))
            .await
            .unwrap();
        assert!(!store.update(id, SchedulePatch::default()).await.unwrap());
    }

    #[tokio::test]
    async fn sync_is_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        let records = vec![cookiescan_kernel::store::ExternalScheduleRecord {
            domain_config_id: "cfg-1".to_string(),
            domain: "https://example.test".to_string(),
            frequency: Frequency::Weekly,
            time_config: TimeConfig::weekly("mon", 9, 0),
            scan_params: ScanParams::default(),
            scan_type: ScanMode::Deep,
            allow_deep_scan: true,
        }];

        let first = store.sync_from_external(&records).await.unwrap();
        assert_eq!(first.created, 1);

        let second = store.sync_from_external(&records).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.skipped, 1);
    }

    #[tokio::test]
    async fn sync_skips_records_without_deep_scan_permission() {
        let store = SqliteStore::in_memory().await.unwrap();
        let records = vec![cookiescan_kernel::store::ExternalScheduleRecord {
            domain_config_id: "cfg-1".to_string(),
            domain: "https://example.test".to_string(),
            frequency: Frequency::Daily,
            time_config: TimeConfig::daily(9, 0),
            scan_params: ScanParams::default(),
            scan_type: ScanMode::Deep,
            allow_deep_scan: false,
        }];
        let stats = store.sync_from_external(&records).await.unwrap();
        assert_eq!(stats, cookiescan_kernel::store::SyncStats { created: 0, updated: 0, skipped: 1 });
        assert!(store.list_schedules(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scan_result_round_trips_with_cookies() {
        use cookiescan_kernel::model::cookie::*;

        let store = SqliteStore::in_memory().await.unwrap();
        let mut result = ScanResult::pending(
            Uuid::new_v4(),
            "cfg-1",
            "https://example.test",
            ScanMode::Quick,
            ScanParams::default(),
            Utc::now(),
        );
        store.create_pending(&result).await.unwrap();

        result.status = ScanStatus::Success;
        result.duration_seconds = Some(12.5);
        result.pages_visited = vec!["https://example.test".to_string()];
        result.cookies = vec![Cookie {
            observed: ObservedCookie {
                name: "sid".into(),
                domain: ".example.test".into(),
                path: "/".into(),
                hashed_value: hash_value("abc"),
                cookie_duration: "Session".into(),
                size: 3,
                http_only: true,
                secure: true,
                same_site: Some("Lax".into()),
                cookie_type: CookieType::FirstParty,
                set_after_accept: false,
            },
            classification: Classification::fallback(),
        }];
        result.finalize_counts();
        store.save_completed(&result, 1000).await.unwrap();

        let loaded = store.get_scan(result.scan_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ScanStatus::Success);
        assert_eq!(loaded.total_cookies, 1);
        assert_eq!(loaded.cookies.len(), 1);
        let cookie = &loaded.cookies[0];
        assert_eq!(cookie.observed.name, "sid");
        assert_eq!(cookie.observed.hashed_value, hash_value("abc"));
        assert_eq!(cookie.classification.source, Source::Fallback);
        assert!(cookie.classification.requires_review);
    }

    #[tokio::test]
    async fn cookie_rows_never_contain_the_raw_value() {
        use cookiescan_kernel::model::cookie::*;

        let store = SqliteStore::in_memory().await.unwrap();
        let raw_value = "super-secret-session-value";
        let mut result = ScanResult::pending(
            Uuid::new_v4(),
            "cfg-1",
            "https://example.test",
            ScanMode::Quick,
            ScanParams::default(),
            Utc::now(),
        );
        store.create_pending(&result).await.unwrap();
        result.status = ScanStatus::Success;
        result.cookies = vec![Cookie {
            observed: ObservedCookie {
                name: "sid".into(),
                domain: ".example.test".into(),
                path: "/".into(),
                hashed_value: hash_value(raw_value),
                cookie_duration: "Session".into(),
                size: raw_value.len(),
                http_only: false,
                secure: false,
                same_site: None,
                cookie_type: CookieType::FirstParty,
                set_after_accept: true,
            },
            classification: Classification::fallback(),
        }];
        result.finalize_counts();
        store.save_completed(&result, 1000).await.unwrap();

        // Scan every column of the row for the raw value.
        let row = sqlx::query("SELECT * FROM cookies LIMIT 1")
            .fetch_one(store.pool())
            .await
            .unwrap();
        for idx in 0..row.len() {
            if let Ok(text) = row.try_get::<String, _>(idx) {
                assert!(
                    !text.contains(raw_value),
                    "raw cookie value leaked into column {idx}"
                );
            }
        }
    }

    #[tokio::test]
    async fn execution_start_complete_cycle() {
        let store = SqliteStore::in_memory().await.unwrap();
        let schedule_id = Uuid::new_v4();
        let execution =
            JobExecution::started(schedule_id, "example.test", "https://example.test", "cfg", Utc::now());
        store.start(&execution).await.unwrap();

        let done = store
            .complete(
                execution.execution_id,
                ExecutionCompletion {
                    status: ExecutionStatus::Success,
                    completed_at: Utc::now(),
                    duration_seconds: 42.0,
                    scan_id: Some(Uuid::new_v4()),
                    error_message: None,
                    error_details: None,
                },
            )
            .await
            .unwrap();
        assert!(done);

        let loaded = store.get_execution(execution.execution_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Success);
        assert_eq!(loaded.duration_seconds, Some(42.0));
        assert!(loaded.scan_id.is_some());

        let by_schedule = store.list_by_schedule(schedule_id, 10, 0).await.unwrap();
        assert_eq!(by_schedule.len(), 1);
    }

    #[tokio::test]
    async fn purge_respects_cutoff() {
        let store = SqliteStore::in_memory().await.unwrap();
        let old = JobExecution {
            started_at: Utc::now() - chrono::Duration::days(60),
            ..JobExecution::started(Uuid::new_v4(), "a", "https://a.test", "cfg", Utc::now())
        };
        let fresh =
            JobExecution::started(Uuid::new_v4(), "b", "https://b.test", "cfg", Utc::now());
        store.start(&old).await.unwrap();
        store.start(&fresh).await.unwrap();

        let removed = store
            .purge_older_than(Utc::now() - chrono::Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_execution(old.execution_id).await.unwrap().is_none());
        assert!(store.get_execution(fresh.execution_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn overrides_load_per_domain_config() {
        let store = SqliteStore::in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO cookie_overrides (domain_config_id, cookie_name, category, vendor)
             VALUES ('cfg-1', '_ga', 'Analytics', 'Google Analytics')",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let overrides = store.overrides_for("cfg-1").await.unwrap();
        let entry = overrides.get("_ga").unwrap();
        assert_eq!(entry.category, CookieCategory::Analytics);
        assert_eq!(entry.source, Source::Db);
        assert!(!entry.requires_review);

        assert!(store.overrides_for("cfg-2").await.unwrap().is_empty());
    }
}
