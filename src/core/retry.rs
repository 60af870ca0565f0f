//! Retry-as-combinator (spec §9: "Exceptions as control flow... replaced by
//! explicit result types; retry policy is a combinator over a fallible
//! operation with `max_attempts`, `base_delay`, `cap`").
//!
//! Grounded on the teacher's `embeddings::openai::embed_with_retry_internal`
//! exponential-backoff loop, generalized into a standalone combinator shared
//! by C3 (Embedder) and C10 (LLM Client), both of which retry on transport/5xx
//! failures up to 3 attempts with base 4s / cap 10s backoff per spec §4.3/§4.10.

use std::time::Duration;

/// Whether a failed attempt should be retried. 4xx-style validation failures
/// are not retryable and should surface immediately (spec §4.10/§7).
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, cap: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            cap,
        }
    }

    /// Spec-default policy for both the Embedder and the LLM Client: 3
    /// attempts, base 4s, cap 10s.
    pub fn spec_default() -> Self {
        Self::new(3, Duration::from_secs(4), Duration::from_secs(10))
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let doubled = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        doubled.min(self.cap)
    }

    /// Run `operation` (retried by invoking the async closure anew each
    /// attempt), retrying on `Retryable` errors until `max_attempts` is
    /// exhausted. Non-retryable errors are returned immediately.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < self.max_attempts && err.is_retryable() => {
                    tokio::time::sleep(self.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct FlakyError {
        retryable: bool,
    }
    impl Retryable for FlakyError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_secs(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(10)); // would be 16, capped
    }

    #[tokio::test]
    async fn retries_retryable_errors_until_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let attempts = AtomicU32::new(0);
        let result: Result<u32, FlakyError> = policy
            .run(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(FlakyError { retryable: true })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable_errors() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let attempts = AtomicU32::new(0);
        let result: Result<u32, FlakyError> = policy
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err(FlakyError { retryable: false }) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let attempts = AtomicU32::new(0);
        let result: Result<u32, FlakyError> = policy
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err(FlakyError { retryable: true }) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
