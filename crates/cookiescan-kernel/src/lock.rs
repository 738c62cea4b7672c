//! Distributed lock contract.
//!
//! At most one service replica may run any given schedule at once. The lock
//! is the only authority for "is this schedule already running anywhere?" —
//! the dispatcher's per-schedule in-flight cap is a local optimisation, not
//! a safety property.
//!
//! Safety comes from two rules every backend must honour:
//!
//! - locks auto-expire after their TTL, so a crashed holder cannot wedge a
//!   schedule forever;
//! - release is compare-and-delete on the holder token, so a slow replica
//!   cannot release a lock another replica has since taken.

use std::time::Duration;

use async_trait::async_trait;

/// Key under which a schedule's lock lives in the backing store.
pub fn lock_key(schedule_id: &uuid::Uuid) -> String {
    format!("scheduler:lock:{schedule_id}")
}

/// Opaque 128-bit holder token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rehydrate a token from its stored form.
    pub fn from_string(raw: String) -> Self {
        Self(raw)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to take the lock. Returns the holder token on success, `None`
    /// when some replica already holds it. Never blocks.
    async fn acquire(&self, resource: &str, ttl: Duration) -> Result<Option<LockToken>, LockError>;

    /// Release only if `token` still matches the current holder
    /// (compare-and-delete). Returns whether a release happened.
    async fn release(&self, resource: &str, token: &LockToken) -> Result<bool, LockError>;

    /// Renew the TTL if `token` still matches the holder. Idempotent.
    async fn extend(
        &self,
        resource: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, LockError>;

    /// Blocking acquire: poll until the lock frees up or `wait` elapses.
    async fn acquire_blocking(
        &self,
        resource: &str,
        ttl: Duration,
        wait: Duration,
    ) -> Result<Option<LockToken>, LockError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(token) = self.acquire(resource, ttl).await? {
                return Ok(Some(token));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}

pub type DynDistributedLock = std::sync::Arc<dyn DistributedLock>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_128_bit_hex_and_unique() {
        let a = LockToken::generate();
        let b = LockToken::generate();
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn lock_keys_carry_the_schedule_id() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(lock_key(&id), format!("scheduler:lock:{id}"));
    }
}
