use std::time::Duration;

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Bounded exponential backoff for one chunk.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Wait before the `retry`-th re-attempt (1-based): `base * 2^(retry-1)`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

/// Runs `attempt` under the retry policy. Retryable failures increment
/// `retries` (the chunk's counter, carried across calls) and back off
/// exponentially; fatal failures and exhaustion propagate immediately.
/// Cancellation is checked before every attempt and before every backoff
/// wait, and never consumes retry budget.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    retries: &mut u32,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_fatal() => {
                warn!("fatal error, not retrying: {err}");
                return Err(err);
            }
            Err(err) => err,
        };

        *retries += 1;
        if *retries >= policy.max_retries {
            warn!("retry budget exhausted after {} attempts: {err}", *retries);
            return Err(err);
        }

        let delay = policy.delay_for(*retries);
        debug!("attempt {} failed ({err}), retrying in {delay:?}", *retries);
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn retryable() -> Error {
        Error::Api {
            code: ErrorCode::NetworkError,
            message: "connection reset".into(),
        }
    }

    fn fatal() -> Error {
        Error::Api {
            code: ErrorCode::QuotaExceeded,
            message: "quota exceeded".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_backoff() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let mut retries = 0;

        let start = Instant::now();
        let attempts_in = Arc::clone(&attempts);
        let result = with_retry(&policy, &cancel, &mut retries, move || {
            let attempts = Arc::clone(&attempts_in);
            async move {
                match attempts.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(retryable()),
                    _ => Ok(42),
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(retries, 2);
        // 1s after the first failure, 2s after the second.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn each_backoff_doubles_until_budget_exhausted() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let mut retries = 0;

        let start = Instant::now();
        let result: Result<()> =
            with_retry(&policy, &cancel, &mut retries, || async { Err(retryable()) }).await;

        assert!(matches!(result, Err(Error::Api { code: ErrorCode::NetworkError, .. })));
        assert_eq!(retries, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_is_never_retried() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let mut retries = 0;

        let start = Instant::now();
        let attempts_in = Arc::clone(&attempts);
        let result: Result<()> = with_retry(&policy, &cancel, &mut retries, move || {
            let attempts = Arc::clone(&attempts_in);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(fatal())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Api { code: ErrorCode::QuotaExceeded, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(retries, 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn cancelled_token_prevents_any_attempt() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let attempts = Arc::new(AtomicU32::new(0));
        let mut retries = 0;

        let attempts_in = Arc::clone(&attempts);
        let result: Result<()> = with_retry(&policy, &cancel, &mut retries, move || {
            let attempts = Arc::clone(&attempts_in);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_stops_retrying() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let mut retries = 0;

        let cancel_in = cancel.clone();
        let result: Result<()> = with_retry(&policy, &cancel, &mut retries, move || {
            let cancel = cancel_in.clone();
            async move {
                // Fail once, then cancel while the wrapper is backing off.
                cancel.cancel();
                Err(retryable())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(retries, 1);
    }

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }
}
