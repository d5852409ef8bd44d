//! Threshold rules that flag repositories deviating from expected quality or activity norms.

use super::{ReadmeClass, RepositoryMetrics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A condition flagged on a single repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::Display, strum::EnumIter)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    #[strum(to_string = "Large repository without documentation")]
    LargeWithoutDocs,

    #[strum(to_string = "Large repository without tests")]
    LargeWithoutTests,

    #[strum(to_string = "Popular repository without documentation")]
    PopularWithoutDocs,

    #[strum(to_string = "Many open issues on an inactive repository")]
    NeglectedIssues,

    #[strum(to_string = "Popular repository appears abandoned")]
    AbandonedPopular,

    #[strum(to_string = "Active repository without package management")]
    ActiveWithoutPackaging,

    #[strum(to_string = "Active repository without releases")]
    ActiveWithoutReleases,

    #[strum(to_string = "Large codebase with inadequate README")]
    LargeWithInadequateReadme,

    #[strum(to_string = "Substantial codebase without a license")]
    MissingLicense,

    #[strum(to_string = "Low test coverage ratio")]
    LowTestRatio,

    #[strum(to_string = "Active repository without CI/CD")]
    ActiveWithoutCi,

    #[strum(to_string = "Old repository with no recent commits")]
    Stale,

    #[strum(to_string = "Empty repository")]
    Empty,

    #[strum(to_string = "Possible monorepo")]
    PossibleMonorepo,
}

/// Thresholds used by the anomaly rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnomalyThresholds {
    /// Lines of code above which a repository counts as large.
    pub large_repository_loc: u64,

    /// Stars above which a repository counts as popular.
    pub popular_stars: u64,

    /// Open issues above which an inactive repository is flagged.
    pub many_open_issues: u64,

    /// Minimum ratio of test files to all files when tests exist.
    pub min_test_file_ratio: f64,

    /// Age in days after which a repository without recent commits is stale.
    pub stale_repository_age_days: i64,

    /// Days without a commit before an old repository is stale.
    pub stale_commit_days: i64,

    /// Number of significant languages that suggests a monorepo.
    pub monorepo_min_languages: usize,

    /// Share of bytes a language needs to count as significant.
    pub monorepo_language_share: f64,

    /// Least README class a large repository needs.
    pub adequate_readme: ReadmeClass,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            large_repository_loc: 1000,
            popular_stars: 10,
            many_open_issues: 20,
            min_test_file_ratio: 0.05,
            stale_repository_age_days: 3 * 365,
            stale_commit_days: 365,
            monorepo_min_languages: 3,
            monorepo_language_share: 0.10,
            adequate_readme: ReadmeClass::Good,
        }
    }
}

impl AnomalyThresholds {
    /// Evaluate every rule against `metrics` as of `now`.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "ratio only")]
    pub fn evaluate(&self, metrics: &RepositoryMetrics, now: DateTime<Utc>) -> BTreeSet<AnomalyKind> {
        let mut found = BTreeSet::new();

        if metrics.is_empty() {
            let _ = found.insert(AnomalyKind::Empty);
            return found;
        }

        let quality = &metrics.quality;
        let active = metrics.activity.is_active;
        let large = metrics.lines_of_code > self.large_repository_loc;
        let popular = metrics.community.stars > self.popular_stars;

        let mut flag = |cond: bool, kind: AnomalyKind| {
            if cond {
                let _ = found.insert(kind);
            }
        };

        flag(large && !quality.has_docs, AnomalyKind::LargeWithoutDocs);
        flag(large && !quality.has_tests, AnomalyKind::LargeWithoutTests);
        flag(popular && !quality.has_docs, AnomalyKind::PopularWithoutDocs);
        flag(!active && metrics.community.open_issues > self.many_open_issues, AnomalyKind::NeglectedIssues);
        flag(!active && popular, AnomalyKind::AbandonedPopular);
        flag(active && large && !quality.has_package_manifest, AnomalyKind::ActiveWithoutPackaging);
        flag(active && large && !quality.has_releases, AnomalyKind::ActiveWithoutReleases);
        flag(large && quality.readme < self.adequate_readme, AnomalyKind::LargeWithInadequateReadme);
        flag(large && !quality.has_license, AnomalyKind::MissingLicense);
        flag(active && large && !quality.has_ci, AnomalyKind::ActiveWithoutCi);

        if quality.has_tests {
            let ratio = quality.test_files as f64 / metrics.total_files as f64;
            flag(ratio < self.min_test_file_ratio, AnomalyKind::LowTestRatio);
        }

        let age_days = (now - metrics.created_at).num_days();
        let days_since_commit = metrics.activity.last_commit_at.map(|at| (now - at).num_days());
        flag(
            age_days > self.stale_repository_age_days && days_since_commit.is_none_or(|days| days > self.stale_commit_days),
            AnomalyKind::Stale,
        );

        let significant = metrics
            .language_bytes
            .keys()
            .filter(|lang| metrics.language_share(lang) > self.monorepo_language_share)
            .count();
        flag(significant >= self.monorepo_min_languages, AnomalyKind::PossibleMonorepo);

        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::repository_metrics::fixtures;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use strum::IntoEnumIterator;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_healthy_repository_has_no_anomalies() {
        let found = AnomalyThresholds::default().evaluate(&fixtures::metrics(), now());
        assert!(found.is_empty(), "unexpected anomalies: {found:?}");
    }

    #[test]
    fn test_empty_repository_short_circuits() {
        let mut metrics = fixtures::metrics();
        metrics.total_files = 0;
        metrics.lines_of_code = 0;
        let found = AnomalyThresholds::default().evaluate(&metrics, now());
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![AnomalyKind::Empty]);
    }

    #[test]
    fn test_large_repository_without_tests_or_docs() {
        let mut metrics = fixtures::metrics();
        metrics.lines_of_code = 5_000;
        metrics.quality.has_tests = false;
        metrics.quality.has_docs = false;
        metrics.quality.has_ci = false;

        let found = AnomalyThresholds::default().evaluate(&metrics, now());
        assert!(found.contains(&AnomalyKind::LargeWithoutDocs));
        assert!(found.contains(&AnomalyKind::LargeWithoutTests));
        assert!(found.contains(&AnomalyKind::ActiveWithoutCi));
        assert!(!found.contains(&AnomalyKind::LowTestRatio));
    }

    #[test]
    fn test_large_repository_with_short_readme() {
        let mut metrics = fixtures::metrics();
        metrics.lines_of_code = 5_000;

        for (readme, flagged) in [
            (ReadmeClass::None, true),
            (ReadmeClass::Small, true),
            (ReadmeClass::Good, false),
            (ReadmeClass::Comprehensive, false),
        ] {
            metrics.quality.readme = readme;
            let found = AnomalyThresholds::default().evaluate(&metrics, now());
            assert_eq!(found.contains(&AnomalyKind::LargeWithInadequateReadme), flagged, "readme = {readme}");
        }

        // Small codebases get by with a short README.
        metrics.lines_of_code = 800;
        metrics.quality.readme = ReadmeClass::Small;
        assert!(!AnomalyThresholds::default().evaluate(&metrics, now()).contains(&AnomalyKind::LargeWithInadequateReadme));

        let demanding = AnomalyThresholds {
            large_repository_loc: 500,
            adequate_readme: ReadmeClass::Comprehensive,
            ..AnomalyThresholds::default()
        };
        metrics.quality.readme = ReadmeClass::Good;
        assert!(demanding.evaluate(&metrics, now()).contains(&AnomalyKind::LargeWithInadequateReadme));
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let mut metrics = fixtures::metrics();
        metrics.lines_of_code = 5_000;
        metrics.quality.has_tests = false;

        let lenient = AnomalyThresholds {
            large_repository_loc: 10_000,
            ..AnomalyThresholds::default()
        };
        assert!(!lenient.evaluate(&metrics, now()).contains(&AnomalyKind::LargeWithoutTests));
        assert!(AnomalyThresholds::default().evaluate(&metrics, now()).contains(&AnomalyKind::LargeWithoutTests));
    }

    #[test]
    fn test_inactive_popular_repository() {
        let mut metrics = fixtures::metrics();
        metrics.activity.is_active = false;
        metrics.community.stars = 50;
        metrics.community.open_issues = 30;

        let found = AnomalyThresholds::default().evaluate(&metrics, now());
        assert!(found.contains(&AnomalyKind::AbandonedPopular));
        assert!(found.contains(&AnomalyKind::NeglectedIssues));
    }

    #[test]
    fn test_low_test_ratio() {
        let mut metrics = fixtures::metrics();
        metrics.total_files = 200;
        metrics.quality.test_files = 2;

        let found = AnomalyThresholds::default().evaluate(&metrics, now());
        assert!(found.contains(&AnomalyKind::LowTestRatio));
    }

    #[test]
    fn test_stale_repository() {
        let mut metrics = fixtures::metrics();
        metrics.created_at = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
        metrics.activity.last_commit_at = Some(Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap());
        metrics.activity.is_active = false;

        let found = AnomalyThresholds::default().evaluate(&metrics, now());
        assert!(found.contains(&AnomalyKind::Stale));
    }

    #[test]
    fn test_stale_without_any_commit() {
        let mut metrics = fixtures::metrics();
        metrics.created_at = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
        metrics.activity.last_commit_at = None;

        let found = AnomalyThresholds::default().evaluate(&metrics, now());
        assert!(found.contains(&AnomalyKind::Stale));
    }

    #[test]
    fn test_possible_monorepo() {
        let mut metrics = fixtures::metrics();
        metrics.language_bytes = BTreeMap::from([
            ("Rust".to_string(), 400),
            ("TypeScript".to_string(), 300),
            ("Python".to_string(), 250),
            ("Shell".to_string(), 50),
        ]);

        let found = AnomalyThresholds::default().evaluate(&metrics, now());
        assert!(found.contains(&AnomalyKind::PossibleMonorepo));
    }

    #[test]
    fn test_display_text() {
        assert_eq!(AnomalyKind::LargeWithoutTests.to_string(), "Large repository without tests");
        assert_eq!(serde_json::to_string(&AnomalyKind::ActiveWithoutCi).unwrap(), r#""active_without_ci""#);
        assert_eq!(AnomalyKind::LargeWithInadequateReadme.to_string(), "Large codebase with inadequate README");
        assert_eq!(AnomalyKind::iter().count(), 14);
    }
}
