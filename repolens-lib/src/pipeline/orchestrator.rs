use super::{
    AggregateSnapshot, Aggregator, AnomalyThresholds, CancellationToken, CheckpointLoad, CheckpointRecord, CheckpointStore, Enumeration,
    Enumerator, ListingError, PoolEvent, PoolOutcome, Progress, QuotaSource, RateGovernor, RateState, RepositoryAnalyzer,
    RepositoryLister, RepositoryResult, RetryPolicy, Scope, WorkerPool,
};
use crate::Result;
use chrono::{DateTime, Utc};
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use ohno::EnrichableExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

const LOG_TARGET: &str = "  pipeline";

/// Knobs of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Concurrent analysis workers.
    pub workers: usize,

    /// Save a checkpoint after this many newly completed repositories.
    pub checkpoint_every: usize,

    /// Upper bound on a single analysis attempt.
    pub request_timeout: Duration,

    pub retry: RetryPolicy,

    /// Continue from a matching checkpoint if one exists.
    pub resume: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            checkpoint_every: 10,
            request_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            resume: true,
        }
    }
}

/// The stages a run moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RunPhase {
    Init,
    Resuming,
    Fresh,
    Running,
    Completed,
    Aborted,
    Interrupted,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every repository in scope was processed.
    Completed,

    /// The API quota ran out; a later run can resume from the checkpoint.
    Aborted { reason: String },

    /// The operator stopped the run; a later run can resume from the checkpoint.
    Interrupted,
}

impl RunStatus {
    #[must_use]
    pub const fn phase(&self) -> RunPhase {
        match self {
            Self::Completed => RunPhase::Completed,
            Self::Aborted { .. } => RunPhase::Aborted,
            Self::Interrupted => RunPhase::Interrupted,
        }
    }
}

/// Counts describing a run, for the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,

    /// Whether the run continued from a checkpoint.
    pub resumed: bool,

    /// Repositories in scope after filtering and the mode cap.
    pub considered: usize,

    /// Repositories removed by the fork, archived, or visibility filters.
    pub filtered: usize,

    /// Repositories already completed by an earlier run.
    pub skipped: usize,

    /// Repositories analyzed by this run, including failures.
    pub processed: usize,

    /// Repositories whose analysis failed in this run.
    pub failed: usize,

    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,

    pub final_rate_state: RateState,
    pub quota_waits: u64,
    pub unavailable_organizations: Vec<String>,
    pub checkpoint_saves: u64,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(flatten)]
    pub status: RunStatus,
    pub summary: RunSummary,
    pub snapshot: AggregateSnapshot,
    pub results: Vec<RepositoryResult>,
}

/// Drives one run of the pipeline over a scope.
pub struct Orchestrator<L, A, Q> {
    lister: Arc<L>,
    analyzer: Arc<A>,
    quota: Arc<Q>,
    governor: Arc<RateGovernor>,
    store: CheckpointStore,
    settings: PipelineSettings,
    thresholds: AnomalyThresholds,
    progress: Option<Arc<dyn Progress>>,
}

impl<L, A, Q> core::fmt::Debug for Orchestrator<L, A, Q> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("governor", &self.governor)
            .field("store", &self.store)
            .field("settings", &self.settings)
            .field("thresholds", &self.thresholds)
            .field("progress", &self.progress.as_ref().map(|_| "<dyn Progress>"))
            .finish_non_exhaustive()
    }
}

/// Mutable state of the running phase, owned by the single consumer of pool events.
struct RunState<'a> {
    store: &'a CheckpointStore,
    run_id: String,
    fingerprint: String,
    started_at: DateTime<Utc>,
    aggregator: Aggregator,
    since_save: usize,
    saves: u64,
    processed: usize,
    failed: usize,
    last_wait_until: Option<DateTime<Utc>>,
}

impl RunState<'_> {
    fn save(&mut self, now: DateTime<Utc>) -> Result<()> {
        let record = CheckpointRecord::capture(&self.run_id, &self.fingerprint, self.started_at, now, &self.aggregator);
        self.store.save(&record).map_err(|e| e.enrich("could not save the checkpoint"))?;
        self.since_save = 0;
        self.saves += 1;
        Ok(())
    }
}

impl<L, A, Q> Orchestrator<L, A, Q>
where
    L: RepositoryLister,
    A: RepositoryAnalyzer + 'static,
    Q: QuotaSource,
{
    #[must_use]
    pub fn new(lister: Arc<L>, analyzer: Arc<A>, quota: Arc<Q>, governor: Arc<RateGovernor>, store: CheckpointStore) -> Self {
        Self {
            lister,
            analyzer,
            quota,
            governor,
            store,
            settings: PipelineSettings::default(),
            thresholds: AnomalyThresholds::default(),
            progress: None,
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_thresholds(mut self, thresholds: AnomalyThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn set_phase(&self, phase: RunPhase) {
        log::debug!(target: LOG_TARGET, "Entering {phase} phase");
        if let Some(progress) = &self.progress {
            progress.set_phase(&phase.to_string());
        }
    }

    /// Tell the operator something, on the progress display if logging would not show it.
    fn notify(&self, level: log::Level, msg: &str) {
        log::log!(target: LOG_TARGET, level, "{msg}");
        if !log::log_enabled!(level)
            && let Some(progress) = &self.progress
        {
            progress.println(msg);
        }
    }

    /// Run the pipeline over `scope` until it completes, runs out of quota, or `cancel` fires.
    ///
    /// Errors are fatal conditions: the checkpoint could not be locked or saved, or the owner's
    /// repositories could not be listed. Running out of quota, even while listing, is not an
    /// error: the run ends as [`RunStatus::Aborted`] with its progress saved.
    pub async fn run(&self, scope: &Scope, cancel: &CancellationToken) -> Result<RunReport> {
        let clock_start = Instant::now();
        let now = self.governor.now();
        let fingerprint = scope.fingerprint();

        self.set_phase(RunPhase::Init);
        let _lock = self.store.lock().await?;

        let restored = if self.settings.resume {
            match self.store.load(&fingerprint) {
                CheckpointLoad::Loaded(record) => Some(*record),
                CheckpointLoad::Missing => None,
                CheckpointLoad::Discarded(reason) => {
                    self.notify(log::Level::Warn, &format!("Starting fresh: the checkpoint could not be used ({reason})"));
                    None
                }
            }
        } else {
            None
        };

        let mut state = RunState {
            store: &self.store,
            run_id: format!("run-{}", now.format("%Y%m%dT%H%M%SZ")),
            fingerprint,
            started_at: now,
            aggregator: Aggregator::new(self.thresholds.clone(), now),
            since_save: 0,
            saves: 0,
            processed: 0,
            failed: 0,
            last_wait_until: None,
        };

        let resumed = restored.is_some();
        if let Some(record) = restored {
            self.set_phase(RunPhase::Resuming);
            state.run_id = record.run_id;
            state.started_at = record.started_at;
            state.aggregator.restore(record.results);
            self.notify(
                log::Level::Info,
                &format!("Resuming {} with {} repositories already completed", state.run_id, state.aggregator.len()),
            );
        } else {
            self.set_phase(RunPhase::Fresh);
            log::info!(target: LOG_TARGET, "Starting {}", state.run_id);
        }

        self.set_phase(RunPhase::Running);
        if let Err(e) = self.governor.synchronize(&*self.quota, &self.settings.retry).await {
            log::warn!(target: LOG_TARGET, "Continuing without a quota reading: {}", e.message());
        }

        if let Some(progress) = &self.progress {
            progress.set_indeterminate(Box::new(|| "listing repositories".to_string()));
        }
        let (enumeration, listing_exhausted) = match Enumerator::new(&*self.lister).enumerate(scope).await {
            Ok(enumeration) => (enumeration, None),
            Err(ListingError::QuotaExhausted(e)) => (Enumeration::default(), Some(e.reason)),
            Err(ListingError::Failed(e)) => {
                self.set_phase(RunPhase::Aborted);
                return Err(e);
            }
        };
        for organization in enumeration.unavailable_organizations() {
            self.notify(log::Level::Warn, &format!("Skipped organization '{organization}': its repositories could not be listed"));
        }

        let outcome = if let Some(reason) = listing_exhausted {
            PoolOutcome {
                quota_exhausted: Some(reason),
                ..PoolOutcome::default()
            }
        } else {
            self.analyze_all(&mut state, &enumeration, cancel).await?
        };

        let status = if let Some(reason) = outcome.quota_exhausted {
            self.notify(log::Level::Error, &format!("Stopping: API quota exhausted ({reason}); run again later to resume"));
            RunStatus::Aborted { reason }
        } else if outcome.cancelled {
            RunStatus::Interrupted
        } else {
            RunStatus::Completed
        };

        state.save(self.governor.now())?;
        self.set_phase(status.phase());

        let summary = RunSummary {
            run_id: state.run_id.clone(),
            resumed,
            considered: enumeration.len(),
            filtered: enumeration.filtered(),
            skipped: outcome.skipped,
            processed: state.processed,
            failed: state.failed,
            elapsed: clock_start.elapsed(),
            final_rate_state: self.governor.state(),
            quota_waits: self.governor.waits(),
            unavailable_organizations: enumeration.unavailable_organizations().to_vec(),
            checkpoint_saves: state.saves,
        };

        log::info!(
            target: LOG_TARGET,
            "Run {} ended as {}: {} processed, {} failed, {} skipped in {:.1}s",
            summary.run_id,
            status.phase(),
            summary.processed,
            summary.failed,
            summary.skipped,
            summary.elapsed.as_secs_f64()
        );

        let (snapshot, results) = state.aggregator.into_parts();
        Ok(RunReport {
            status,
            summary,
            snapshot,
            results,
        })
    }

    /// Run the worker pool over `enumeration`, folding its events into `state`.
    async fn analyze_all(&self, state: &mut RunState<'_>, enumeration: &Enumeration, cancel: &CancellationToken) -> Result<PoolOutcome> {
        let completed = state.aggregator.completed();
        let total = enumeration.len() as u64;
        let done = Arc::new(AtomicU64::new(enumeration.iter().filter(|repo| completed.contains(&repo.id)).count() as u64));
        if let Some(progress) = &self.progress {
            let done = Arc::clone(&done);
            progress.set_determinate(Box::new(move || {
                let current = done.load(Ordering::Relaxed);
                (total, current, format!("{current}/{total} repositories"))
            }));
        }

        let pool = WorkerPool::new(Arc::clone(&self.analyzer), Arc::clone(&self.governor))
            .with_workers(self.settings.workers)
            .with_retry(self.settings.retry)
            .with_request_timeout(self.settings.request_timeout);

        // The pool has its own token so a failed save can stop it as well as the operator.
        let pool_cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pool_run = pool.run(enumeration.iter().cloned(), &completed, tx, &pool_cancel);
        tokio::pin!(pool_run);

        let mut outcome = None;
        let mut fatal = None;
        loop {
            tokio::select! {
                finished = &mut pool_run, if outcome.is_none() => outcome = Some(finished),

                () = cancel.cancelled(), if !pool_cancel.is_cancelled() => {
                    self.notify(log::Level::Warn, "Interrupted, saving progress");
                    pool_cancel.cancel();
                }

                event = rx.recv() => {
                    let Some(event) = event else { break };
                    if fatal.is_some() {
                        continue;
                    }
                    if let Err(e) = self.handle_event(state, event, &done) {
                        fatal = Some(e);
                        pool_cancel.cancel();
                    }
                }
            }
        }

        let outcome = match outcome {
            Some(outcome) => outcome,
            None => pool_run.await,
        };

        if let Some(e) = fatal {
            self.set_phase(RunPhase::Aborted);
            return Err(e);
        }

        Ok(outcome)
    }

    fn handle_event(&self, state: &mut RunState<'_>, event: PoolEvent, done: &AtomicU64) -> Result<()> {
        match event {
            PoolEvent::Completed(result) => {
                if state.aggregator.contains(result.id()) {
                    log::debug!(target: LOG_TARGET, "Ignoring repeated result for '{}'", result.id());
                    return Ok(());
                }

                if result.is_failed() {
                    state.failed += 1;
                }
                state.processed += 1;
                state.since_save += 1;
                let _ = state.aggregator.fold(result);
                let _ = done.fetch_add(1, Ordering::Relaxed);

                if state.since_save >= self.settings.checkpoint_every.max(1) {
                    state.save(self.governor.now())?;
                }
            }

            PoolEvent::QuotaWait { until } => {
                if state.since_save > 0 {
                    state.save(self.governor.now())?;
                }

                if state.last_wait_until.is_none_or(|last| until > last + chrono::Duration::seconds(1)) {
                    state.last_wait_until = Some(until);
                    self.notify(
                        log::Level::Info,
                        &format!("Waiting for API quota until {}", until.with_timezone(&chrono::Local).format("%T")),
                    );
                }
            }

            PoolEvent::QuotaExhausted(reason) => {
                log::debug!(target: LOG_TARGET, "Pool stopped on exhausted quota: {reason}");
            }
        }

        Ok(())
    }
}
