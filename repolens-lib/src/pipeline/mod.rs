//! The crawl-and-aggregate pipeline
//!
//! This module enumerates the repositories of a scope, dispatches bounded-concurrency
//! analysis work against a rate-limited remote API, persists resumable progress, and folds
//! every per-repository result into a single aggregate snapshot.
//!
//! # Implementation Model
//!
//! The pipeline is assembled from small pieces, leaf-first:
//!
//! - **[`RateGovernor`]**: tracks the remote quota reported by response headers and answers
//!   "proceed", "wait", or "abort" before every outbound call
//! - **[`CheckpointStore`]**: an atomically written JSON record of completed repositories and
//!   the partially folded aggregate
//! - **[`Enumerator`]**: lists and filters the repositories of a [`Scope`], then caps the list
//!   deterministically according to the [`RunMode`]
//! - **[`WorkerPool`]**: a fixed number of tasks pulling repositories from a shared queue,
//!   retrying transient failures with the shared [`RetryPolicy`]
//! - **[`Aggregator`]**: tags anomalies and folds results into an [`AggregateSnapshot`], which
//!   is an order-independent fold
//! - **[`Orchestrator`]**: drives a run through its phases and decides when to checkpoint
//!
//! The remote side is abstracted by three traits: [`RepositoryLister`],
//! [`RepositoryAnalyzer`], and [`QuotaSource`]. The `github` module implements them
//! against the GitHub REST API; tests implement them in memory.

mod aggregate;
mod analyzer;
mod anomaly;
mod cancellation;
mod checkpoint;
mod clock;
mod enumerator;
mod orchestrator;
mod progress;
mod rate_governor;
mod repository_metrics;
mod repository_ref;
mod repository_result;
mod retry_policy;
mod scope;
mod worker_pool;

pub use aggregate::{ActivityDistribution, AggregateSnapshot, Aggregator, LanguageTotals, QualityTotals, ScoreTotals, TimelineBucket};
pub use analyzer::{AnalysisError, RepositoryAnalyzer};
pub use anomaly::{AnomalyKind, AnomalyThresholds};
pub use cancellation::CancellationToken;
pub use checkpoint::{CHECKPOINT_FORMAT_VERSION, CheckpointLoad, CheckpointLock, CheckpointRecord, CheckpointStore};
pub use clock::{Clock, SystemClock, TokioClock};
pub use enumerator::{Enumeration, Enumerator, ListingError, RepositoryLister};
pub use orchestrator::{Orchestrator, PipelineSettings, RunPhase, RunReport, RunStatus, RunSummary};
pub use progress::Progress;
pub use rate_governor::{Admission, CallGate, MAX_RATE_LIMITED_ATTEMPTS, QuotaExhausted, QuotaSource, RateGovernor, RateSettings, RateState};
pub use repository_metrics::{CommitActivity, CommunityStats, QualityFlags, QualityScores, ReadmeClass, RepositoryMetrics, WEEKLY_SAMPLES};
pub use repository_ref::{RepositoryRef, Visibility};
pub use repository_result::{RepositoryResult, ResultStatus};
pub use retry_policy::RetryPolicy;
pub use scope::{RunMode, Scope, VisibilityFilter};
pub use worker_pool::{PoolEvent, PoolOutcome, WorkerPool};
