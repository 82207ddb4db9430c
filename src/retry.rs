//! Generic exponential-backoff-with-jitter retry wrapper (spec §5).
//!
//! Retryability is pluggable via the `Retryable` trait; network/server/429
//! errors are retryable by default (`Error::retryable_by_default`). Retries
//! abort immediately on a cancellation signal.

use crate::common::error::{Error, Result};
use crate::config::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Decides whether a given error is worth retrying. The default impl below
/// defers to `Error::retryable_by_default`; callers may substitute their
/// own classification (e.g. "retry only on 5xx, not 4xx").
pub trait Retryable {
    fn is_retryable(&self, err: &Error) -> bool;
}

/// The spec's default classification: network/server/timeout/rate-limit
/// errors are retryable, policy/programmer errors are not.
pub struct DefaultRetryable;

impl Retryable for DefaultRetryable {
    fn is_retryable(&self, err: &Error) -> bool {
        err.retryable_by_default()
    }
}

fn backoff_delay(cfg: &RetryConfig, attempt: u32) -> Duration {
    let base = cfg.initial_delay_ms as f64 * cfg.multiplier.powi(attempt as i32);
    let capped = base.min(cfg.max_delay_ms as f64);
    let jitter_span = capped * cfg.jitter;
    let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
    Duration::from_millis((capped + jitter).max(0.0) as u64)
}

/// Retries `op` up to `cfg.max_attempts` times with exponential backoff and
/// jitter, using `classifier` to decide whether a given failure should be
/// retried. Aborts immediately (without sleeping) if `cancel` is triggered.
pub async fn retry_with_backoff<F, Fut, T, R>(
    cfg: &RetryConfig,
    classifier: &R,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Retryable,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::internal("retry aborted: cancelled"));
        }
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                let retryable = classifier.is_retryable(&err);
                if !retryable || attempt + 1 >= cfg.max_attempts {
                    return Err(err);
                }
                let delay = backoff_delay(cfg, attempt);
                debug!(attempt, ?delay, "retrying after backoff");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(Error::internal("retry aborted: cancelled"));
                    }
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_without_retry() {
        let cfg = RetryConfig {
            initial_delay_ms: 1,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&cfg, &DefaultRetryable, &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Error>(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_retryable_error_then_succeeds() {
        let cfg = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&cfg, &DefaultRetryable, &cancel, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::connection("transient"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let cfg = RetryConfig::default();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(&cfg, &DefaultRetryable, &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::pool_exhausted("no capacity")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_max_attempts() {
        let cfg = RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(&cfg, &DefaultRetryable, &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::connection("always fails")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_before_retry() {
        let cfg = RetryConfig {
            max_attempts: 10,
            initial_delay_ms: 1000,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> =
            retry_with_backoff(&cfg, &DefaultRetryable, &cancel, || async {
                Err(Error::connection("x"))
            })
            .await;
        assert!(result.is_err());
    }
}
