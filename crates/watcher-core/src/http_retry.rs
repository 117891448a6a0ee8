//! Exponential retry on transient platform-API rejections (HTTP 409 / rate-limit).
//!
//! Generic over the operation's error type so that `watcher-providers` can
//! plug in whatever HTTP client it likes; this module only owns the backoff
//! schedule and the "is this worth retrying" decision point.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub cap_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            cap_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^(n-1), cap)` for the n-th (1-indexed) attempt's delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        debug_assert!(attempt >= 1);
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.cap_delay)
            .min(self.cap_delay)
    }
}

/// Retry `op` up to `policy.max_attempts` times. `is_transient` classifies an
/// error as retryable (HTTP 409 / 429 / rate-limit) versus fatal. Sleeps
/// between attempts using `policy`'s backoff schedule; the caller's `sleep`
/// hook makes this testable without real wall-clock delays.
pub async fn retry_with_backoff<T, E, Fut, Op, Sleep, SleepFut, IsTransient>(
    policy: RetryPolicy,
    mut op: Op,
    is_transient: IsTransient,
    mut sleep: Sleep,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    Sleep: FnMut(Duration) -> SleepFut,
    SleepFut: std::future::Future<Output = ()>,
    IsTransient: Fn(&E) -> bool,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_attempts || !is_transient(&err) {
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(attempt, ?delay, "retrying transient platform API error");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_schedule_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(16));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(0),
                cap_delay: Duration::from_millis(0),
            },
            |_attempt| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("409 conflict")
                    } else {
                        Ok(42)
                    }
                }
            },
            |e: &&str| e.contains("409"),
            |_| async {},
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry_with_backoff(
            RetryPolicy::default(),
            |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("401 unauthorized") }
            },
            |e: &&str| e.contains("409"),
            |_| async {},
        )
        .await;
        assert_eq!(result, Err("401 unauthorized"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry_with_backoff(
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(0),
                cap_delay: Duration::from_millis(0),
            },
            |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("429 rate-limited") }
            },
            |e: &&str| e.contains("429"),
            |_| async {},
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
