//! Retry policies and async retry helper.

use std::future::Future;
use std::time::Duration;

/// Delay strategy between retry attempts.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Same delay every attempt.
    Fixed { delay_ms: u64 },
    /// Exponential backoff: `base_ms * 2^attempt`, capped at `max_ms`.
    ExponentialBackoff { base_ms: u64, max_ms: u64 },
}

impl RetryPolicy {
    /// The navigation backoff used throughout the scanner: doubling from
    /// one second, capped at 60 s.
    pub fn navigation() -> Self {
        RetryPolicy::ExponentialBackoff {
            base_ms: 1_000,
            max_ms: 60_000,
        }
    }

    /// Returns the sleep duration before the given retry attempt (0-indexed).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let ms = match self {
            RetryPolicy::Fixed { delay_ms } => *delay_ms,
            RetryPolicy::ExponentialBackoff { base_ms, max_ms } => 1u64
                .checked_shl(attempt as u32)
                .and_then(|s| base_ms.checked_mul(s))
                .unwrap_or(*max_ms)
                .min(*max_ms),
        };
        Duration::from_millis(ms)
    }
}

/// How many attempts to make and which [`RetryPolicy`] to use.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetryConfig {
    /// Total attempts (1 = no retry).
    pub max_attempts: usize,
    pub policy: RetryPolicy,
}

impl RetryConfig {
    /// `max_retries` retries on top of the initial attempt.
    pub fn navigation(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries as usize + 1,
            policy: RetryPolicy::navigation(),
        }
    }
}

/// Retry `f` up to `config.max_attempts` times, sleeping per policy between
/// attempts. Non-retryable errors short-circuit.
pub async fn retry_with_policy<F, Fut, T, E>(
    config: &RetryConfig,
    is_retryable: impl Fn(&E) -> bool,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            tokio::time::sleep(config.policy.delay_for(attempt - 1)).await;
        }
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !is_retryable(&e) {
                    return Err(e);
                }
                last_err = Some(e);
            }
        }
    }

    Err(last_err.expect("at least one attempt was made"))
}
