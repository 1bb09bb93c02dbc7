//! Bounded retries with doubling backoff.

use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use tracing::warn;

/// Upper bound on a single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// How often, and how patiently, to repeat a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: NonZeroU32,
    backoff: Duration,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` attempts in total, sleeping
    /// `backoff` before the first retry and doubling after each one.
    #[must_use]
    pub const fn new(max_attempts: NonZeroU32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// A single attempt, no retries.
    #[must_use]
    pub const fn once() -> Self {
        Self::new(NonZeroU32::MIN, Duration::ZERO)
    }

    /// Total attempts allowed.
    #[must_use]
    pub const fn max_attempts(self) -> u32 {
        self.max_attempts.get()
    }

    /// Base backoff.
    #[must_use]
    pub const fn backoff(self) -> Duration {
        self.backoff
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Runs `operation` until it succeeds, fails with an error `retryable`
    /// rejects, or attempts run out.
    ///
    /// # Errors
    ///
    /// Returns the last error produced by `operation`.
    pub async fn run<T, E, F, Fut>(
        self,
        label: &str,
        mut operation: F,
        retryable: impl Fn(&E) -> bool,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts() && retryable(&err) => {
                    let delay = self.delay_after(attempt);
                    warn!(operation = label, attempt, ?delay, error = %err, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(NonZeroU32::MIN.saturating_add(1), Duration::from_millis(250))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(NonZeroU32::new(attempts).unwrap(), Duration::from_millis(1))
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::new(NonZeroU32::new(10).unwrap(), Duration::from_millis(100));
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(40), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = policy(3)
            .run(
                "test",
                |_| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("down".to_owned())
                },
                |_| true,
            )
            .await;
        assert_eq!(result.unwrap_err(), "down");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = policy(3)
            .run(
                "test",
                |_| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("bad key".to_owned())
                },
                |_| false,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_on_a_later_attempt() {
        let result: Result<u32, String> = policy(3)
            .run(
                "test",
                |attempt| async move {
                    if attempt < 2 { Err("flaky".to_owned()) } else { Ok(attempt) }
                },
                |_| true,
            )
            .await;
        assert_eq!(result.unwrap(), 2);
    }
}
