//! Bounded retry with configurable delay and multiplicative backoff
//!
//! The policy makes `tries - 1` guarded attempts, sleeping between them, and
//! then one final unguarded attempt whose error propagates to the caller.
//! Callers that want to see the real error therefore see it exactly once,
//! after the retry budget is spent.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Retry policy for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the final unguarded one.
    pub tries: u32,
    /// Initial wait between attempts, in seconds.
    pub delay: f64,
    /// Multiplier applied to the wait after every failed attempt.
    /// 1.0 keeps the wait constant; values above 1.0 back off.
    pub backoff: f64,
}

impl RetryPolicy {
    /// Create a policy. `tries` is clamped to at least 1.
    pub fn new(tries: u32, delay: f64, backoff: f64) -> Self {
        Self {
            tries: tries.max(1),
            delay,
            backoff,
        }
    }

    /// Run `op`, retrying every error.
    ///
    /// # Errors
    /// Returns the error of the final attempt once the budget is exhausted.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_filtered(op, |_| true).await
    }

    /// Run `op`, retrying only errors for which `recoverable` returns true.
    ///
    /// Non-recoverable errors propagate immediately without consuming the
    /// remaining attempt budget.
    pub async fn run_filtered<T, E, F, Fut, R>(&self, mut op: F, recoverable: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        R: Fn(&E) -> bool,
    {
        let mut remaining = self.tries;
        let mut delay = self.delay;

        while remaining > 1 {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !recoverable(&e) {
                        return Err(e);
                    }
                    remaining -= 1;
                    warn!(
                        "operation failed: {e}. {remaining} attempts left, waiting {delay:.1}s"
                    );
                    tokio::time::sleep(Duration::from_secs_f64(delay.max(0.0))).await;
                    delay *= self.backoff;
                }
            }
        }

        // Final attempt runs unguarded so the caller sees the real error.
        op().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_failing_op_runs_exactly_tries_times() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(4, 2.0, 1.0);

        let result: Result<(), String> = policy
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("boom".to_string())
            })
            .await;

        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleep_sequence() {
        // tries = 3 means 2 sleeps: delay, then delay * backoff.
        let policy = RetryPolicy::new(3, 2.0, 2.0);
        let start = tokio::time::Instant::now();

        let _: Result<(), String> = policy.run(|| async { Err("boom".to_string()) }).await;

        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_stops_retrying() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, 1.0, 2.0);

        let result: Result<u32, String> = policy
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("not yet".to_string())
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_recoverable_error_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, 1.0, 1.0);

        let result: Result<(), String> = policy
            .run_filtered(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("contract".to_string())
                },
                |e| e != "contract",
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_try_skips_sleeping() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(1, 100.0, 2.0);
        let start = tokio::time::Instant::now();

        let result: Result<(), String> = policy
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("boom".to_string())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
