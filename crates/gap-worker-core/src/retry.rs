//! Exponential backoff with jitter around fallible async calls.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        let jitter = Duration::from_secs_f64(fastrand::f64());
        exp.saturating_add(jitter).min(self.cap)
    }
}

/// Runs `f` up to `policy.max_attempts` times, sleeping between attempts.
/// Returns the last error if every attempt fails. Cancellation is honored
/// both between attempts and during the backoff sleep.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        let result = f().await;
        match result {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts || cancel.is_cancelled() {
                    return Err(e);
                }
                let delay = policy.delay_for(attempt - 1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_without_retry_when_first_attempt_ok() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<i32, &str> = retry(RetryPolicy::default(), &cancel, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_up_to_max_attempts_then_returns_last_error() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            cap: Duration::from_millis(10),
        };
        let result: Result<i32, &str> = retry(policy, &cancel, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("boom")
        })
        .await;
        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_a_later_attempt() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<i32, &str> = retry(RetryPolicy::default(), &cancel, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 { Err("not yet") } else { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }
}
