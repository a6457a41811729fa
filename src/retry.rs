//! Bounded exponential-backoff retry harness, dispatching on whether an
//! error is classified transient. The match engine's optimistic-lock retry
//! and the identity verifier's HTTP retry both build on this.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::{AppError, RetryExhausted};

/// Runs `op` up to `cfg.max_retries + 1` times total, waiting
/// `initial_delay * multiplier^attempt` (with full jitter) between
/// attempts, as long as the returned error is transient per
/// `AppError::is_transient`. `cancel` lets a caller abort promptly between
/// attempts instead of sleeping out a doomed retry.
pub async fn retry<T, F, Fut>(
    cfg: RetryConfig,
    cancel: &tokio_util::sync::CancellationToken,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let start = Instant::now();
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < cfg.max_retries => {
                let delay = backoff_delay(cfg, attempt);
                attempt += 1;
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(RetryExhausted {
                            attempts: attempt,
                            elapsed: start.elapsed(),
                            source: err,
                        });
                    }
                }
            }
            Err(err) => {
                return Err(RetryExhausted {
                    attempts: attempt + 1,
                    elapsed: start.elapsed(),
                    source: err,
                });
            }
        }
    }
}

fn backoff_delay(cfg: RetryConfig, attempt: u32) -> Duration {
    let base = cfg.initial_delay.as_secs_f64() * cfg.multiplier.powi(attempt as i32);
    let jittered = rand::thread_rng().gen_range(0.0..=base);
    Duration::from_secs_f64(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_cfg() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn succeeds_immediately_without_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let cancel = tokio_util::sync::CancellationToken::new();
        let result = retry(fast_cfg(), &cancel, || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let cancel = tokio_util::sync::CancellationToken::new();
        let result = retry(fast_cfg(), &cancel, || {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(AppError::OptimisticConflict)
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_after_max_retries_and_reports_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let cancel = tokio_util::sync::CancellationToken::new();
        let result = retry(fast_cfg(), &cancel, || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AppError::OptimisticConflict)
            }
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.attempts, 4); // initial + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn never_retries_non_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let cancel = tokio_util::sync::CancellationToken::new();
        let result = retry(fast_cfg(), &cancel, || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AppError::InvalidArgument("bad".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_retrying_promptly() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let cancel = tokio_util::sync::CancellationToken::new();
        let cancel_for_op = cancel.clone();
        let result = retry(
            RetryConfig {
                max_retries: 10,
                initial_delay: Duration::from_secs(3600),
                multiplier: 1.0,
            },
            &cancel,
            move || {
                let calls = calls2.clone();
                let cancel = cancel_for_op.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        cancel.cancel();
                    }
                    Err::<(), _>(AppError::OptimisticConflict)
                }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
