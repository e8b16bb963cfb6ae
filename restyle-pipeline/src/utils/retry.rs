//! Bounded retry with exponential backoff
//!
//! Used by the fetch stage for transient transport errors.

use crate::models::PipelineError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry policy for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    /// Delay before attempt `attempt + 1` (attempt is 1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Run `operation` until it succeeds, fails non-retryably, or attempts run out
///
/// **Algorithm:**
/// 1. Attempt operation (passing the 1-based attempt number)
/// 2. If successful, return result
/// 3. If the error is retryable and attempts remain: log WARN, back off, retry
/// 4. Otherwise return the error
///
/// The backoff sleep is raced against `cancel`; cancellation returns
/// `PipelineError::Cancelled` immediately.
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, PipelineError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying operation");
        }

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_retryable() {
                    return Err(err);
                }

                if attempt >= policy.max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Operation failed: retry attempts exhausted"
                    );
                    return Err(err);
                }

                let backoff = policy.backoff_for(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient failure, will retry after backoff"
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(500), Duration::from_millis(1500));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(1500));
        assert_eq!(policy.backoff_for(30), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let result = retry_with_backoff("test_op", fast_policy(3), &CancellationToken::new(), |_| async {
            Ok::<_, PipelineError>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retries_download_errors_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff("test_op", fast_policy(3), &CancellationToken::new(), |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(PipelineError::download("connection reset"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> =
            retry_with_backoff("test_op", fast_policy(2), &CancellationToken::new(), |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(PipelineError::download("503")) }
            })
            .await;

        assert!(matches!(result, Err(PipelineError::Download { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> =
            retry_with_backoff("test_op", fast_policy(5), &CancellationToken::new(), |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(PipelineError::invalid_reference("404")) }
            })
            .await;

        assert!(matches!(result, Err(PipelineError::InvalidReference { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(3, Duration::from_secs(30), Duration::from_secs(30));
        let trigger = cancel.clone();

        let result: Result<(), _> = retry_with_backoff("test_op", policy, &cancel, |_| {
            trigger.cancel();
            async { Err(PipelineError::download("reset")) }
        })
        .await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }
}
