//! Distributed lock backends.
//!
//! [`SqlLock`] rides on the same ACID store as the rest of the service: a
//! `scheduler_locks` table where set-if-absent is a single conditional
//! upsert (new key, or takeover of an expired holder) and release is a
//! compare-and-delete on the holder token. [`InMemoryLock`] mirrors the
//! semantics for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use cookiescan_kernel::lock::{DistributedLock, LockError, LockToken};

fn lerr(e: sqlx::Error) -> LockError {
    LockError::Backend(e.to_string())
}

// ---------------------------------------------------------------------------
// SqlLock
// ---------------------------------------------------------------------------

/// SQL-backed distributed lock. Shares a pool with [`super::SqliteStore`].
pub struct SqlLock {
    pool: SqlitePool,
}

impl SqlLock {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DistributedLock for SqlLock {
    async fn acquire(&self, resource: &str, ttl: Duration) -> Result<Option<LockToken>, LockError> {
        let token = LockToken::generate();
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_default();

        // One atomic statement: insert a fresh lock, or take over a holder
        // whose TTL has lapsed. A live holder leaves rows_affected at 0.
        let result = sqlx::query(
            r#"
            INSERT INTO scheduler_locks (resource_key, token, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(resource_key) DO UPDATE
                SET token = excluded.token, expires_at = excluded.expires_at
                WHERE scheduler_locks.expires_at < ?
            "#,
        )
        .bind(resource)
        .bind(token.as_str())
        .bind(expires_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(lerr)?;

        if result.rows_affected() > 0 {
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    async fn release(&self, resource: &str, token: &LockToken) -> Result<bool, LockError> {
        let result = sqlx::query("DELETE FROM scheduler_locks WHERE resource_key = ? AND token = ?")
            .bind(resource)
            .bind(token.as_str())
            .execute(&self.pool)
            .await
            .map_err(lerr)?;
        Ok(result.rows_affected() > 0)
    }

    async fn extend(
        &self,
        resource: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        let result = sqlx::query(
            "UPDATE scheduler_locks SET expires_at = ? WHERE resource_key = ? AND token = ?",
        )
        .bind(expires_at.to_rfc3339())
        .bind(resource)
        .bind(token.as_str())
        .execute(&self.pool)
        .await
        .map_err(lerr)?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// InMemoryLock
// ---------------------------------------------------------------------------

/// Process-local lock with the same token/TTL semantics.
#[derive(Default)]
pub struct InMemoryLock {
    held: Arc<Mutex<HashMap<String, (String, DateTime<Utc>)>>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn acquire(&self, resource: &str, ttl: Duration) -> Result<Option<LockToken>, LockError> {
        let now = Utc::now();
        let mut held = self.held.lock().expect("lock map poisoned");

        if let Some((_, expires_at)) = held.get(resource) {
            if *expires_at > now {
                return Ok(None);
            }
        }

        let token = LockToken::generate();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_default();
        held.insert(resource.to_string(), (token.as_str().to_string(), expires_at));
        Ok(Some(token))
    }

    async fn release(&self, resource: &str, token: &LockToken) -> Result<bool, LockError> {
        let mut held = self.held.lock().expect("lock map poisoned");
        match held.get(resource) {
            Some((holder, _)) if holder == token.as_str() => {
                held.remove(resource);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend(
        &self,
        resource: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let mut held = self.held.lock().expect("lock map poisoned");
        match held.get_mut(resource) {
            Some((holder, expires_at)) if holder == token.as_str() => {
                *expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
