use super::{CallGate, QuotaExhausted, RateState, RepositoryMetrics, RepositoryRef};
use core::fmt::{Display, Formatter};
use core::future::Future;
use core::time::Duration;
use ohno::AppError;

/// Why analyzing a repository failed.
#[derive(Debug)]
pub enum AnalysisError {
    /// Network trouble, a timeout, or a server error. Worth retrying.
    Transient(AppError),

    /// The remote side refused the call because of its rate limit.
    ///
    /// Not a failure of the repository: the work is queued again once the quota allows.
    RateLimited {
        retry_after: Option<Duration>,
        state: Option<RateState>,
    },

    /// The repository cannot be analyzed (gone, inaccessible, empty, or malformed data).
    Permanent(AppError),

    /// The governor gave up waiting for quota; the run must stop.
    QuotaExhausted(QuotaExhausted),
}

impl From<QuotaExhausted> for AnalysisError {
    fn from(e: QuotaExhausted) -> Self {
        Self::QuotaExhausted(e)
    }
}

impl AnalysisError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl Display for AnalysisError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Transient(e) => write!(f, "transient failure: {}", e.message()),
            Self::RateLimited {
                retry_after: Some(retry_after), ..
            } => write!(f, "rate limited, retry after {}s", retry_after.as_secs()),
            Self::RateLimited { .. } => f.write_str("rate limited"),
            Self::Permanent(e) => f.write_str(&e.message()),
            Self::QuotaExhausted(e) => Display::fmt(e, f),
        }
    }
}

impl core::error::Error for AnalysisError {}

/// Computes the metrics of one repository.
///
/// Every remote call must be preceded by [`CallGate::acquire`], and the quota reported by each
/// response should be fed back through [`CallGate::observe`].
pub trait RepositoryAnalyzer: Send + Sync {
    fn analyze(&self, repo: &RepositoryRef, gate: &CallGate<'_>) -> impl Future<Output = Result<RepositoryMetrics, AnalysisError>> + Send;
}
