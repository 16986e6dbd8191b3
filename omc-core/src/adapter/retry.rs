//! Retry policy for adapter calls: exponential backoff with jitter,
//! capped by `max_attempts` and `max_total_wait`.
//!
//! Delay doubles each attempt with a jitter multiplier applied on top,
//! driven by `AdapterError::is_retryable` rather than a generic retry
//! count, and sleeps asynchronously (`tokio::time::sleep`).

use super::errors::AdapterError;
use crate::config::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// `delay = min(base * 2^(attempt-1), max_delay) * uniform[0.8, 1.2)`,
/// overridden by a `Retry-After` hint when present and numeric.
fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(32));
    let capped = exp.min(max_ms);
    let jitter = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_secs_f64(capped as f64 / 1000.0 * jitter)
}

/// Outcome of a retried call: either the last success, or the last
/// error after attempts/budget were exhausted.
pub type RetryResult<T> = Result<T, AdapterError>;

/// Run `call` up to `cfg.max_attempts` times, retrying only on
/// `AdapterError::is_retryable` errors and stopping early once the
/// cumulative wait would exceed `cfg.total_cap_ms`.
pub async fn execute<T, F, Fut>(cfg: &RetryConfig, mut call: F) -> RetryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RetryResult<T>>,
{
    let mut total_waited_ms: u64 = 0;
    let mut last_err: Option<AdapterError> = None;

    for attempt in 1..=cfg.max_attempts {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt == cfg.max_attempts {
                    return Err(err);
                }
                let delay = match err.retry_after_ms() {
                    Some(ms) => Duration::from_millis(ms),
                    None => backoff_delay(attempt, cfg.base_ms, cfg.max_ms),
                };
                if total_waited_ms + delay.as_millis() as u64 > cfg.total_cap_ms {
                    return Err(err);
                }
                total_waited_ms += delay.as_millis() as u64;
                last_err = Some(err);
                tokio::time::sleep(delay).await;
            }
        }
    }

    // Unreachable when max_attempts >= 1 (the loop above always returns),
    // but kept for defensive completeness if max_attempts is ever 0.
    Err(last_err.unwrap_or(AdapterError::Malformed { detail: "retry loop exited with no attempts".into() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cfg() -> RetryConfig {
        RetryConfig { max_attempts: 4, base_ms: 1, max_ms: 10, total_cap_ms: 1_000 }
    }

    #[tokio::test]
    async fn succeeds_on_first_try_without_retry() {
        let calls = AtomicU32::new(0);
        let result: RetryResult<i32> = execute(&cfg(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_retryable_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result: RetryResult<i32> = execute(&cfg(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AdapterError::Network { detail: "timeout".into() })
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable_errors() {
        let calls = AtomicU32::new(0);
        let result: RetryResult<i32> = execute(&cfg(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AdapterError::Client { status: 400, detail: "bad request".into() }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: RetryResult<i32> = execute(&cfg(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AdapterError::Server { status: 503, detail: "".into() }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), cfg().max_attempts);
    }

    #[tokio::test]
    async fn retry_after_hint_is_honored_as_the_delay() {
        // A huge Retry-After should exceed the total cap and abort early
        // rather than sleeping for the full hinted duration.
        let small_cap = RetryConfig { max_attempts: 3, base_ms: 1, max_ms: 10, total_cap_ms: 5 };
        let calls = AtomicU32::new(0);
        let result: RetryResult<i32> = execute(&small_cap, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AdapterError::RateLimit { retry_after_ms: Some(10_000) }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
