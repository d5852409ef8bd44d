use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder, Retryable};
use core::future::Future;
use core::time::Duration;
use serde::{Deserialize, Serialize};

const LOG_TARGET: &str = "     retry";

/// Bounded exponential backoff shared by the rate governor and the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub min_delay: Duration,

    /// Upper bound on any single delay.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Randomize delays to avoid synchronized retries across workers.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    fn builder(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize);

        if self.jitter { builder.with_jitter() } else { builder }
    }

    /// The sequence of delays to sleep between attempts.
    ///
    /// Yields `max_attempts - 1` delays, after which the caller should give up.
    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        self.builder().build()
    }

    /// Run `op` until it succeeds, a non-transient error occurs, or attempts run out.
    pub async fn run<T, E, F, Fut>(&self, what: &str, op: F, is_transient: impl Fn(&E) -> bool) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: core::fmt::Display,
    {
        op.retry(self.builder())
            .when(is_transient)
            .notify(|e: &E, delay: Duration| {
                log::debug!(target: LOG_TARGET, "Retrying {what} in {}ms after error: {e}", delay.as_millis());
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_is_bounded_and_capped() {
        // backon computes the delays in floating point, so allow a few microseconds of drift.
        let delays: Vec<_> = no_jitter().backoff().collect();
        let expected = [100, 200, 250].map(Duration::from_millis);
        assert_eq!(delays.len(), expected.len());
        for (delay, expected) in delays.iter().zip(expected) {
            assert!(delay.abs_diff(expected) < Duration::from_micros(10), "{delay:?} is not {expected:?}");
        }
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..no_jitter()
        };
        assert_eq!(policy.backoff().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_transient_errors() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, String> = no_jitter()
            .run(
                "flaky call",
                || async {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 { Err(format!("failure {n}")) } else { Ok(n) }
                },
                |_| true,
            )
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), String> = no_jitter()
            .run(
                "doomed call",
                || async {
                    let _ = attempts.fetch_add(1, Ordering::SeqCst);
                    Err("still down".to_string())
                },
                |_| true,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_permanent_error() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), String> = no_jitter()
            .run(
                "bad request",
                || async {
                    let _ = attempts.fetch_add(1, Ordering::SeqCst);
                    Err("permanent".to_string())
                },
                |e: &String| e != "permanent",
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deserialize_humantime() {
        let policy: RetryPolicy = toml::from_str("max_attempts = 5\nmin_delay = \"500ms\"\nmax_delay = \"1m\"\njitter = false").unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.min_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert!(!policy.jitter);
    }
}
