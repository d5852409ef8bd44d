use chrono::{DateTime, Utc};
use core::fmt::Debug;

/// Source of wall-clock time for rate-limit arithmetic.
///
/// Reset times arrive as wall-clock timestamps, so the governor needs "now" in the same
/// terms. Tests substitute a clock driven by tokio's paused time.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that follows tokio's timer instead of the system clock.
///
/// With tokio's time paused, sleeping advances this clock too, so rate-limit waits can be
/// simulated without real delays.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl TokioClock {
    /// A clock reading `origin` now.
    #[must_use]
    pub fn new(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        super::rate_governor::after(self.origin, self.start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use core::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let origin = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let clock = TokioClock::new(origin);
        assert_eq!(clock.now(), origin);

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(clock.now(), origin + chrono::Duration::seconds(90));
    }
}
