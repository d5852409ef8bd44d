//! Gatekeeping outbound calls against the remote API quota.
//!
//! The governor never polls for quota on its own. Every response carries the remaining
//! quota and the reset time of the current window, and callers feed those back through
//! [`RateGovernor::observe`]. Before each call, [`RateGovernor::admit`] reserves one unit of
//! the locally tracked quota so concurrent workers cannot overdraw it between responses.

use super::{Clock, RetryPolicy};
use crate::Result;
use chrono::{DateTime, Utc};
use core::fmt::{Debug, Display, Formatter};
use core::future::Future;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use core::time::Duration;
use ohno::EnrichableExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

const LOG_TARGET: &str = "  governor";

/// Consecutive rate-limited responses for one unit of work before giving up.
pub const MAX_RATE_LIMITED_ATTEMPTS: u32 = 5;

/// Pause applied after a secondary rate limit that did not say how long to wait.
const DEFAULT_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(60);

/// Quota as last reported by the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RateState {
    /// Calls allowed per window.
    pub limit: Option<u64>,

    /// Calls left in the current window, after local reservations.
    pub remaining: Option<u64>,

    /// When the current window ends and the quota refills.
    pub reset_at: Option<DateTime<Utc>>,

    /// Calls are held back until this time after a secondary rate limit.
    pub blocked_until: Option<DateTime<Utc>>,
}

impl RateState {
    /// A state as read from response headers.
    #[must_use]
    pub const fn reported(limit: Option<u64>, remaining: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            limit,
            remaining: Some(remaining),
            reset_at: Some(reset_at),
            blocked_until: None,
        }
    }
}

impl Display for RateState {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match (self.remaining, self.limit) {
            (Some(remaining), Some(limit)) => write!(f, "{remaining}/{limit} calls remaining")?,
            (Some(remaining), None) => write!(f, "{remaining} calls remaining")?,
            (None, _) => f.write_str("quota unknown")?,
        }

        if let Some(reset_at) = self.reset_at {
            write!(f, ", resets at {}", reset_at.with_timezone(&chrono::Local).format("%T"))?;
        }

        Ok(())
    }
}

/// Tuning knobs for the governor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateSettings {
    /// Calls are held back once the remaining quota drops to this level.
    pub low_water_mark: u64,

    /// Extra time added after the reset time before calls resume.
    #[serde(with = "humantime_serde")]
    pub safety_margin: Duration,

    /// Waits longer than this abort the run instead.
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            low_water_mark: 50,
            safety_margin: Duration::from_secs(5),
            max_wait: Duration::from_mins(65),
        }
    }
}

/// The governor's answer to "may I make a call now?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    Wait(Duration),
    Abort(String),
}

/// The remote quota is exhausted and cannot be waited out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaExhausted {
    pub reason: String,
}

impl Display for QuotaExhausted {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "API quota exhausted ({}); resume later from the checkpoint", self.reason)
    }
}

impl core::error::Error for QuotaExhausted {}

/// Reads the current quota from the remote side.
pub trait QuotaSource: Send + Sync {
    fn fetch_rate_state(&self) -> impl Future<Output = Result<RateState>> + Send;
}

#[derive(Debug, Default)]
struct Inner {
    state: RateState,

    /// Reports for windows that ended at or before this time are stale.
    stale_before: Option<DateTime<Utc>>,
}

/// Tracks remote quota and decides whether outbound calls may proceed.
#[derive(Debug)]
pub struct RateGovernor {
    settings: RateSettings,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    waits: AtomicU64,
}

impl RateGovernor {
    #[must_use]
    pub fn new(settings: RateSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            inner: Mutex::new(Inner::default()),
            waits: AtomicU64::new(0),
        }
    }

    /// Start from a known state rather than an unknown one.
    #[must_use]
    pub fn with_state(self, state: RateState) -> Self {
        self.inner.lock().expect("lock not poisoned").state = state;
        self
    }

    #[must_use]
    pub fn state(&self) -> RateState {
        self.inner.lock().expect("lock not poisoned").state
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// How many times a caller has been told to wait.
    #[must_use]
    pub fn waits(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }

    /// Decide whether one outbound call may be made now, reserving quota if so.
    pub fn admit(&self) -> Admission {
        let now = self.clock.now();
        let mut guard = self.inner.lock().expect("lock not poisoned");
        let inner = &mut *guard;
        let state = &mut inner.state;

        if let Some(until) = state.blocked_until {
            if until > now {
                return Admission::Wait(until_duration(now, until));
            }
            state.blocked_until = None;
        }

        let Some(remaining) = state.remaining else {
            return Admission::Proceed;
        };

        // Small windows (e.g. unauthenticated) would otherwise never get past the mark.
        let low_water = state.limit.map_or(self.settings.low_water_mark, |limit| self.settings.low_water_mark.min(limit / 10));

        if remaining > low_water {
            state.remaining = Some(remaining - 1);
            return Admission::Proceed;
        }

        match state.reset_at {
            Some(reset_at) if reset_at <= now => {
                log::debug!(target: LOG_TARGET, "Quota window ended at {reset_at}, assuming refill");
                state.remaining = state.limit.map(|limit| limit.saturating_sub(1));
                state.reset_at = None;
                inner.stale_before = Some(reset_at);
                Admission::Proceed
            }

            Some(reset_at) => {
                let wait = until_duration(now, reset_at) + self.settings.safety_margin;
                if wait > self.settings.max_wait {
                    return Admission::Abort(format!(
                        "quota resets in {}s, beyond the {}s wait limit",
                        wait.as_secs(),
                        self.settings.max_wait.as_secs()
                    ));
                }
                Admission::Wait(wait)
            }

            None if remaining == 0 => Admission::Abort("no calls remaining and the reset time is unknown".to_string()),

            None => {
                state.remaining = Some(remaining - 1);
                Admission::Proceed
            }
        }
    }

    /// Wait until a call is admitted, calling `on_wait` before every sleep.
    pub async fn acquire_with(&self, mut on_wait: impl FnMut(Duration) + Send) -> Result<(), QuotaExhausted> {
        loop {
            match self.admit() {
                Admission::Proceed => return Ok(()),
                Admission::Wait(wait) => {
                    let _ = self.waits.fetch_add(1, Ordering::Relaxed);
                    log::info!(target: LOG_TARGET, "Holding calls for {}s ({})", wait.as_secs(), self.state());
                    on_wait(wait);
                    tokio::time::sleep(wait).await;
                }
                Admission::Abort(reason) => {
                    log::warn!(target: LOG_TARGET, "Aborting: {reason}");
                    return Err(QuotaExhausted { reason });
                }
            }
        }
    }

    /// Wait until a call is admitted.
    pub async fn acquire(&self) -> Result<(), QuotaExhausted> {
        self.acquire_with(|_| {}).await
    }

    /// Refresh the tracked quota from a response.
    ///
    /// A report for a later window replaces the current state. Within the same window the
    /// lowest remaining count wins, since responses may arrive out of order.
    pub fn observe(&self, reported: RateState) {
        let Some(reported_reset) = reported.reset_at else {
            return;
        };

        let mut inner = self.inner.lock().expect("lock not poisoned");
        if inner.stale_before.is_some_and(|stale| reported_reset <= stale) {
            return;
        }

        let state = &mut inner.state;
        match state.reset_at {
            Some(current) if reported_reset < current => {}
            Some(current) if reported_reset == current => {
                state.remaining = match (state.remaining, reported.remaining) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                state.limit = reported.limit.or(state.limit);
            }
            _ => {
                state.remaining = reported.remaining;
                state.reset_at = Some(reported_reset);
                state.limit = reported.limit.or(state.limit);
            }
        }
    }

    /// Hold all calls for `duration`, e.g. after a secondary rate limit. The longest hold wins.
    pub fn penalize(&self, duration: Duration) {
        let until = after(self.clock.now(), duration);
        let mut inner = self.inner.lock().expect("lock not poisoned");
        if inner.state.blocked_until.is_none_or(|existing| existing < until) {
            inner.state.blocked_until = Some(until);
            log::info!(target: LOG_TARGET, "Secondary rate limit, holding calls for {}s", duration.as_secs());
        }
    }

    /// React to a rate-limited response.
    ///
    /// A primary limit (no calls left) is handled by the reported reset time alone. Anything
    /// else is a secondary limit and holds all calls for `retry_after`, or a default pause.
    pub fn rate_limited(&self, retry_after: Option<Duration>, state: Option<RateState>) {
        let primary = state.is_some_and(|s| s.remaining == Some(0));
        if let Some(state) = state {
            self.observe(state);
        }
        if retry_after.is_some() || !primary {
            self.penalize(retry_after.unwrap_or(DEFAULT_RATE_LIMIT_PAUSE));
        }
    }

    /// Read the quota once from `source`, retrying transient failures.
    ///
    /// Failure leaves the current state untouched and is returned for the caller to report.
    pub async fn synchronize<Q: QuotaSource>(&self, source: &Q, policy: &RetryPolicy) -> Result<RateState> {
        let fetched = policy
            .run("quota synchronization", || source.fetch_rate_state(), |_| true)
            .await
            .map_err(|e| e.enrich("could not read the API quota"))?;

        {
            let mut inner = self.inner.lock().expect("lock not poisoned");
            inner.state.limit = fetched.limit;
            inner.state.remaining = fetched.remaining;
            inner.state.reset_at = fetched.reset_at;
            inner.stale_before = None;
        }

        log::info!(target: LOG_TARGET, "API quota: {fetched}");
        Ok(fetched)
    }
}

/// The time `duration` after `now`, saturating at the end of representable time.
pub(crate) fn after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn until_duration(now: DateTime<Utc>, until: DateTime<Utc>) -> Duration {
    (until - now).to_std().unwrap_or(Duration::ZERO)
}

/// Admission handle an analyzer uses for every remote call it makes for one repository.
///
/// The worker pool admits the first call before invoking the analyzer, so the gate
/// lets exactly one call through without asking the governor again. Time spent waiting
/// for quota at the gate is tracked so it can be left out of the attempt's time limit.
pub struct CallGate<'a> {
    governor: &'a RateGovernor,
    prepaid: AtomicBool,
    waited_ms: AtomicU64,
    on_wait: Option<&'a (dyn Fn(Duration) + Send + Sync)>,
}

impl Debug for CallGate<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CallGate")
            .field("prepaid", &self.prepaid)
            .field("waited", &self.waited())
            .finish_non_exhaustive()
    }
}

impl<'a> CallGate<'a> {
    /// A gate whose first call has already been admitted.
    #[must_use]
    pub const fn prepaid(governor: &'a RateGovernor) -> Self {
        Self {
            governor,
            prepaid: AtomicBool::new(true),
            waited_ms: AtomicU64::new(0),
            on_wait: None,
        }
    }

    /// A gate that asks the governor for every call.
    #[must_use]
    pub const fn unpaid(governor: &'a RateGovernor) -> Self {
        Self {
            governor,
            prepaid: AtomicBool::new(false),
            waited_ms: AtomicU64::new(0),
            on_wait: None,
        }
    }

    /// Call `on_wait` before every quota wait at this gate.
    #[must_use]
    pub const fn with_wait_hook(mut self, on_wait: &'a (dyn Fn(Duration) + Send + Sync)) -> Self {
        self.on_wait = Some(on_wait);
        self
    }

    /// Wait for permission to make the next call.
    pub async fn acquire(&self) -> Result<(), QuotaExhausted> {
        if self.prepaid.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        self.governor
            .acquire_with(|wait| {
                let millis = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
                let _ = self.waited_ms.fetch_add(millis, Ordering::AcqRel);
                if let Some(on_wait) = self.on_wait {
                    on_wait(wait);
                }
            })
            .await
    }

    /// Total time this gate has spent, or is about to spend, waiting for quota.
    #[must_use]
    pub fn waited(&self) -> Duration {
        Duration::from_millis(self.waited_ms.load(Ordering::Acquire))
    }

    /// Report the quota carried by a response.
    pub fn observe(&self, reported: RateState) {
        self.governor.observe(reported);
    }

    /// Report a secondary rate limit.
    pub fn penalize(&self, duration: Duration) {
        self.governor.penalize(duration);
    }

    #[must_use]
    pub const fn governor(&self) -> &RateGovernor {
        self.governor
    }
}
