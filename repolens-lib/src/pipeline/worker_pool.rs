//! Bounded-concurrency analysis of the repositories in a scope.
//!
//! A fixed number of tokio tasks pull repositories from a shared queue. The queue lock is
//! held only to pop or push an entry, never across a remote call. Each worker asks the
//! [`RateGovernor`] for admission before every attempt and reports what happened to the
//! orchestrator over a channel, which is the only place results are folded.

use super::rate_governor::{MAX_RATE_LIMITED_ATTEMPTS, after};
use super::{
    AnalysisError, CallGate, CancellationToken, RateGovernor, RepositoryAnalyzer, RepositoryMetrics, RepositoryRef, RepositoryResult,
    RetryPolicy,
};
use chrono::{DateTime, Utc};
use core::pin::pin;
use core::time::Duration;
use futures_util::future::join_all;
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;

const LOG_TARGET: &str = "   workers";

/// What the pool reports while it runs.
#[derive(Debug)]
pub enum PoolEvent {
    /// A repository was analyzed, successfully or not.
    Completed(RepositoryResult),

    /// A worker is about to sleep until the quota allows more calls.
    QuotaWait { until: DateTime<Utc> },

    /// The quota cannot be waited out; no further repositories will be started.
    QuotaExhausted(String),
}

/// How a pool run ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolOutcome {
    /// Repositories handed to the workers.
    pub queued: usize,

    /// Repositories skipped because they were already completed.
    pub skipped: usize,

    /// Repositories left unprocessed because the run stopped early.
    pub unprocessed: usize,

    /// Why the run stopped early because of the quota, if it did.
    pub quota_exhausted: Option<String>,

    pub cancelled: bool,
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<VecDeque<RepositoryRef>>,
    quota_exhausted: Mutex<Option<String>>,
}

impl Shared {
    fn pop(&self) -> Option<RepositoryRef> {
        self.queue.lock().expect("lock not poisoned").pop_front()
    }

    fn put_back(&self, repo: RepositoryRef) {
        self.queue.lock().expect("lock not poisoned").push_front(repo);
    }

    fn is_stopped(&self) -> bool {
        self.quota_exhausted.lock().expect("lock not poisoned").is_some()
    }

    /// Record the first abort reason. Returns whether this call was the first.
    fn stop(&self, reason: &str) -> bool {
        let mut slot = self.quota_exhausted.lock().expect("lock not poisoned");
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason.to_string());
        true
    }
}

enum Step {
    Done(RepositoryResult),
    Stop(String),
}

/// Runs a [`RepositoryAnalyzer`] over many repositories with bounded concurrency.
#[derive(Debug)]
pub struct WorkerPool<A> {
    analyzer: Arc<A>,
    governor: Arc<RateGovernor>,
    workers: usize,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl<A: RepositoryAnalyzer + 'static> WorkerPool<A> {
    #[must_use]
    pub fn new(analyzer: Arc<A>, governor: Arc<RateGovernor>) -> Self {
        Self {
            analyzer,
            governor,
            workers: 4,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(120),
        }
    }

    /// Number of concurrent workers, at least one.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Upper bound on a single analysis attempt, not counting quota waits. Exceeding it counts
    /// as a transient failure.
    #[must_use]
    pub const fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Analyze every repository not in `completed`, reporting through `events`.
    ///
    /// Returns once the queue is drained, the quota is exhausted, or `cancel` fires. In the
    /// last case, analyses in flight are abandoned and their repositories count as unprocessed.
    pub async fn run(
        &self,
        repositories: impl IntoIterator<Item = RepositoryRef>,
        completed: &BTreeSet<String>,
        events: mpsc::UnboundedSender<PoolEvent>,
        cancel: &CancellationToken,
    ) -> PoolOutcome {
        let mut skipped = 0;
        let mut seen = BTreeSet::new();
        let queue: VecDeque<_> = repositories
            .into_iter()
            .filter(|repo| {
                if completed.contains(&repo.id) {
                    skipped += 1;
                    return false;
                }
                seen.insert(repo.id.clone())
            })
            .collect();

        let queued = queue.len();
        let workers = self.workers.min(queued.max(1));
        log::info!(target: LOG_TARGET, "Analyzing {queued} repositories with {workers} workers ({skipped} already completed)");

        let shared = Arc::new(Shared {
            queue: Mutex::new(queue),
            quota_exhausted: Mutex::new(None),
        });

        let handles: Vec<_> = (0..workers)
            .map(|index| {
                let worker = Worker {
                    index,
                    analyzer: Arc::clone(&self.analyzer),
                    governor: Arc::clone(&self.governor),
                    retry: self.retry,
                    request_timeout: self.request_timeout,
                    shared: Arc::clone(&shared),
                    events: events.clone(),
                    cancel: cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        // Workers hold the remaining senders; the channel closes once they all finish.
        drop(events);

        for result in join_all(handles).await {
            result.expect("worker task must not panic");
        }

        let unprocessed = shared.queue.lock().expect("lock not poisoned").len();
        let quota_exhausted = shared.quota_exhausted.lock().expect("lock not poisoned").take();

        PoolOutcome {
            queued,
            skipped,
            unprocessed,
            quota_exhausted,
            cancelled: cancel.is_cancelled(),
        }
    }
}

struct Worker<A> {
    index: usize,
    analyzer: Arc<A>,
    governor: Arc<RateGovernor>,
    retry: RetryPolicy,
    request_timeout: Duration,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<PoolEvent>,
    cancel: CancellationToken,
}

impl<A: RepositoryAnalyzer> Worker<A> {
    async fn run(self) {
        while !self.cancel.is_cancelled() && !self.shared.is_stopped() {
            let Some(repo) = self.shared.pop() else {
                break;
            };

            let step = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                step = self.process(&repo) => Some(step),
            };

            match step {
                None => {
                    log::debug!(target: LOG_TARGET, "Worker {} abandoned '{repo}'", self.index);
                    self.shared.put_back(repo);
                    break;
                }

                Some(Step::Done(result)) => {
                    let _ = self.events.send(PoolEvent::Completed(result));
                }

                Some(Step::Stop(reason)) => {
                    self.shared.put_back(repo);
                    if self.shared.stop(&reason) {
                        let _ = self.events.send(PoolEvent::QuotaExhausted(reason));
                    }
                    break;
                }
            }
        }

        log::trace!(target: LOG_TARGET, "Worker {} finished", self.index);
    }

    async fn process(&self, repo: &RepositoryRef) -> Step {
        let mut delays = self.retry.backoff();
        let mut rate_limited = 0;
        let report_wait = |wait: Duration| {
            let until = after(self.governor.now(), wait);
            let _ = self.events.send(PoolEvent::QuotaWait { until });
        };

        loop {
            if let Err(e) = self.governor.acquire_with(&report_wait).await {
                return Step::Stop(e.reason);
            }

            let gate = CallGate::prepaid(&self.governor).with_wait_hook(&report_wait);
            match self.attempt(repo, &gate).await {
                Ok(metrics) => {
                    log::debug!(target: LOG_TARGET, "Analyzed '{repo}'");
                    return Step::Done(RepositoryResult::succeeded(repo.clone(), metrics));
                }

                Err(AnalysisError::Transient(e)) => {
                    if let Some(delay) = delays.next() {
                        log::debug!(target: LOG_TARGET, "Retrying '{repo}' in {}ms after: {}", delay.as_millis(), e.message());
                        tokio::time::sleep(delay).await;
                    } else {
                        log::warn!(target: LOG_TARGET, "Giving up on '{repo}' after {} attempts: {}", self.retry.max_attempts, e.message());
                        return Step::Done(RepositoryResult::failed(repo.clone(), e.message()));
                    }
                }

                Err(AnalysisError::RateLimited { retry_after, state }) => {
                    rate_limited += 1;
                    if rate_limited >= MAX_RATE_LIMITED_ATTEMPTS {
                        return Step::Stop(format!("rate limited {rate_limited} times in a row while analyzing '{repo}'"));
                    }

                    self.governor.rate_limited(retry_after, state);
                    log::debug!(target: LOG_TARGET, "Rate limited while analyzing '{repo}', trying again once the quota allows");
                }

                Err(AnalysisError::Permanent(e)) => {
                    log::warn!(target: LOG_TARGET, "Could not analyze '{repo}': {}", e.message());
                    return Step::Done(RepositoryResult::failed(repo.clone(), e.message()));
                }

                Err(AnalysisError::QuotaExhausted(e)) => return Step::Stop(e.reason),
            }
        }
    }

    /// One analysis attempt, bounded by the request timeout.
    ///
    /// Time the analyzer spends waiting for quota at `gate` does not count against the timeout.
    async fn attempt(&self, repo: &RepositoryRef, gate: &CallGate<'_>) -> Result<RepositoryMetrics, AnalysisError> {
        let start = Instant::now();
        let mut analysis = pin!(self.analyzer.analyze(repo, gate));

        loop {
            let deadline = start + self.request_timeout + gate.waited();
            tokio::select! {
                result = &mut analysis => return result,
                () = tokio::time::sleep_until(deadline) => {
                    if start + self.request_timeout + gate.waited() <= deadline {
                        return Err(AnalysisError::Transient(ohno::app_err!(
                            "analysis timed out after {}s",
                            self.request_timeout.as_secs()
                        )));
                    }
                }
            }
        }
    }
}
