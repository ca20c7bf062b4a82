//! Capped exponential backoff shared by every outbound call.
//!
//! A [`RetryPolicy`] is plain configuration. Each call to [`RetryPolicy::run`]
//! keeps its own attempt counter and sleeps on its own timer, so concurrent
//! requests never synchronize their retries. With `jitter` enabled the delay
//! is drawn from `[d/2, d]` ("equal jitter").

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Retry configuration for one kind of outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `0` is treated as `1`.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Randomize each delay within `[d/2, d]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Why a retry loop gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStop {
    /// Every attempt failed with a transient error.
    Exhausted,
    /// The last error was classified as permanent.
    NotRetryable,
    /// Another attempt would start past the caller's deadline.
    DeadlineReached,
}

/// Final error of a retry loop together with how it ended.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
    pub stop: RetryStop,
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Nominal (un-jittered) delay before retry number `retry` (1-based).
    pub fn nominal_backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exp);
        let nanos = self.initial_backoff.as_nanos() as f64 * factor;
        let capped = nanos.min(self.max_backoff.as_nanos() as f64);
        Duration::from_nanos(capped as u64)
    }

    /// Delay to actually sleep before retry number `retry`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let nominal = self.nominal_backoff(retry);
        if !self.jitter || nominal.is_zero() {
            return nominal;
        }
        let half = nominal / 2;
        let spread = (nominal - half).as_nanos() as u64;
        half + Duration::from_nanos(rand::thread_rng().gen_range(0..=spread))
    }

    /// Runs `op` until it succeeds, fails permanently, runs out of attempts or
    /// would cross `deadline`.
    ///
    /// `op` receives the 1-based attempt number. On success returns the value
    /// and the number of attempts used.
    ///
    /// # Errors
    /// Returns the last error wrapped in [`RetryFailure`].
    pub async fn run<T, E, F, Fut, C>(
        &self,
        op_name: &'static str,
        deadline: Option<Instant>,
        mut op: F,
        is_transient: C,
    ) -> Result<(T, u32), RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            match op(attempt).await {
                Ok(v) => {
                    if attempt > 1 {
                        debug!(op = op_name, attempt, "succeeded after retry");
                    }
                    return Ok((v, attempt));
                }
                Err(error) => {
                    if !is_transient(&error) {
                        return Err(RetryFailure {
                            error,
                            attempts: attempt,
                            stop: RetryStop::NotRetryable,
                        });
                    }
                    if attempt >= max_attempts {
                        warn!(op = op_name, attempts = attempt, error = %error, "retries exhausted");
                        return Err(RetryFailure {
                            error,
                            attempts: attempt,
                            stop: RetryStop::Exhausted,
                        });
                    }

                    let delay = self.backoff(attempt);
                    if let Some(deadline) = deadline {
                        if Instant::now() + delay >= deadline {
                            warn!(op = op_name, attempts = attempt, error = %error, "deadline leaves no room for another attempt");
                            return Err(RetryFailure {
                                error,
                                attempts: attempt,
                                stop: RetryStop::DeadlineReached,
                            });
                        }
                    }

                    warn!(
                        op = op_name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixed(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let p = fixed(5);
        assert_eq!(p.nominal_backoff(1), Duration::from_millis(100));
        assert_eq!(p.nominal_backoff(2), Duration::from_millis(200));
        assert_eq!(p.nominal_backoff(3), Duration::from_millis(350));
        assert_eq!(p.nominal_backoff(30), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_half_and_full_delay() {
        let p = RetryPolicy {
            jitter: true,
            ..fixed(5)
        };
        for _ in 0..100 {
            let d = p.backoff(2);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out = fixed(3)
            .run(
                "test",
                None,
                move |_| {
                    let c = c.clone();
                    async move {
                        if c.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err("boom")
                        } else {
                            Ok(7)
                        }
                    }
                },
                |_| true,
            )
            .await
            .unwrap();
        assert_eq!(out, (7, 3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = fixed(5)
            .run(
                "test",
                None,
                move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("bad request") }
                },
                |_| false,
            )
            .await
            .unwrap_err();
        assert_eq!(err.stop, RetryStop::NotRetryable);
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempt_count() {
        let err = fixed(4)
            .run("test", None, |_| async { Err::<(), _>("down") }, |_| true)
            .await
            .unwrap_err();
        assert_eq!(err.stop, RetryStop::Exhausted);
        assert_eq!(err.attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cuts_the_loop_short() {
        let deadline = Instant::now() + Duration::from_millis(150);
        let err = fixed(10)
            .run("test", Some(deadline), |_| async { Err::<(), _>("slow") }, |_| true)
            .await
            .unwrap_err();
        // 100ms first backoff fits, the 200ms second one does not.
        assert_eq!(err.stop, RetryStop::DeadlineReached);
        assert_eq!(err.attempts, 2);
    }
}
