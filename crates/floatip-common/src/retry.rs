//! Fixed-backoff retry for transient host lookups.

use std::future::Future;
use std::time::Duration;

use crate::error::{FipError, FipResult};

/// Retry policy: a fixed number of attempts with a fixed delay between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub attempts: u32,
    /// Delay between two attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Runs `f` until it succeeds, returns a non-retryable error, or the
    /// attempts are exhausted. The last error is returned.
    pub async fn run<T, F, Fut>(&self, what: &str, mut f: F) -> FipResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FipResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut last_error: Option<FipError> = None;

        for attempt in 1..=attempts {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::debug!(
                        operation = what,
                        attempt,
                        attempts,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    last_error = Some(e);
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| FipError::internal("retry attempts exhausted")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = fast(3)
            .run("list", || {
                c.fetch_add(1, Ordering::Relaxed);
                async { Ok::<_, FipError>(7) }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = fast(3)
            .run("list", || {
                let n = c.fetch_add(1, Ordering::Relaxed);
                async move {
                    if n < 2 {
                        Err(FipError::interface("eth0", "not yet"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: FipResult<()> = fast(3)
            .run("list", || {
                c.fetch_add(1, Ordering::Relaxed);
                async { Err(FipError::interface("eth9", "Cannot find device")) }
            })
            .await;
        assert!(matches!(result, Err(FipError::Interface { .. })));
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: FipResult<()> = fast(5)
            .run("list", || {
                c.fetch_add(1, Ordering::Relaxed);
                async { Err(FipError::internal("bug")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_between_attempts() {
        let policy = RetryPolicy::default();
        let start = tokio::time::Instant::now();
        let _: FipResult<()> = policy
            .run("list", || async { Err(FipError::interface("eth0", "down")) })
            .await;
        // Three attempts, two sleeps of two seconds.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(4));
        assert!(elapsed < Duration::from_secs(5));
    }
}
