use super::{AnomalyKind, RepositoryMetrics, RepositoryRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Outcome of analyzing one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultStatus {
    Succeeded,

    /// The repository could not be analyzed; the run carried on without it.
    Failed { reason: String },
}

/// The result of analyzing one repository during a run.
///
/// Produced once per repository by a worker. Anomaly tags are attached by the
/// [`Aggregator`](super::Aggregator) when the result is folded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryResult {
    pub repository: RepositoryRef,
    pub status: ResultStatus,
    pub metrics: Option<RepositoryMetrics>,
    #[serde(default)]
    pub anomalies: BTreeSet<AnomalyKind>,
}

impl RepositoryResult {
    #[must_use]
    pub const fn succeeded(repository: RepositoryRef, metrics: RepositoryMetrics) -> Self {
        Self {
            repository,
            status: ResultStatus::Succeeded,
            metrics: Some(metrics),
            anomalies: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn failed(repository: RepositoryRef, reason: impl Into<String>) -> Self {
        Self {
            repository,
            status: ResultStatus::Failed { reason: reason.into() },
            metrics: None,
            anomalies: BTreeSet::new(),
        }
    }

    /// The repository identifier this result belongs to.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.repository.id
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.status, ResultStatus::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Visibility;
    use chrono::Utc;

    fn repo() -> RepositoryRef {
        RepositoryRef::new("octo", "widget", Visibility::Public, Utc::now())
    }

    #[test]
    fn test_failed_result_has_no_metrics() {
        let result = RepositoryResult::failed(repo(), "not found");
        assert!(result.is_failed());
        assert!(result.metrics.is_none());
        assert_eq!(result.id(), "octo/widget");
        assert_eq!(
            result.status,
            ResultStatus::Failed {
                reason: "not found".to_string()
            }
        );
    }

    #[test]
    fn test_status_serializes_with_tag() {
        let json = serde_json::to_value(ResultStatus::Failed { reason: "gone".into() }).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "gone");

        let json = serde_json::to_value(ResultStatus::Succeeded).unwrap();
        assert_eq!(json["status"], "succeeded");
    }
}
