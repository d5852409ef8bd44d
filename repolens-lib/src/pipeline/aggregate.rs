//! Folding per-repository results into an aggregate snapshot.
//!
//! [`AggregateSnapshot`] only holds counts and sums, so folding is associative and
//! commutative: the same set of results produces the same snapshot regardless of the
//! order in which they complete, and partial snapshots from separate runs can be merged.
//! Averages are derived on demand rather than stored.

use super::{AnomalyKind, AnomalyThresholds, CommunityStats, RepositoryResult, ResultStatus, Visibility};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const LOG_TARGET: &str = "aggregator";

/// Per-language totals across all analyzed repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LanguageTotals {
    pub bytes: u64,

    /// Repositories containing the language at all.
    pub repositories: u64,

    /// Repositories where it is the primary language.
    pub primary_in: u64,
}

impl LanguageTotals {
    const fn merge(&mut self, other: &Self) {
        self.bytes += other.bytes;
        self.repositories += other.repositories;
        self.primary_in += other.primary_in;
    }
}

/// How active the analyzed repositories are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivityDistribution {
    pub active: u64,
    pub inactive: u64,
    pub commits_last_month: u64,
    pub commits_last_year: u64,

    /// Repositories by commits over the last year: none, 1-10, 11-50, 51-200, more.
    pub yearly_commit_buckets: [u64; 5],

    /// Repositories by estimated lines of code: <100, <1k, <10k, <100k, more.
    pub size_buckets: [u64; 5],
}

impl ActivityDistribution {
    fn merge(&mut self, other: &Self) {
        self.active += other.active;
        self.inactive += other.inactive;
        self.commits_last_month += other.commits_last_month;
        self.commits_last_year += other.commits_last_year;
        for (mine, theirs) in self.yearly_commit_buckets.iter_mut().zip(other.yearly_commit_buckets) {
            *mine += theirs;
        }
        for (mine, theirs) in self.size_buckets.iter_mut().zip(other.size_buckets) {
            *mine += theirs;
        }
    }

    const fn commit_bucket(commits: u32) -> usize {
        match commits {
            0 => 0,
            1..=10 => 1,
            11..=50 => 2,
            51..=200 => 3,
            _ => 4,
        }
    }

    const fn size_bucket(lines: u64) -> usize {
        match lines {
            0..100 => 0,
            100..1_000 => 1,
            1_000..10_000 => 2,
            10_000..100_000 => 3,
            _ => 4,
        }
    }
}

/// How many analyzed repositories carry each quality signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QualityTotals {
    pub with_readme: u64,
    pub with_docs: u64,
    pub with_tests: u64,
    pub test_files: u64,
    pub with_ci: u64,
    pub with_license: u64,
    pub with_package_manifest: u64,
    pub with_releases: u64,
}

impl QualityTotals {
    const fn merge(&mut self, other: &Self) {
        self.with_readme += other.with_readme;
        self.with_docs += other.with_docs;
        self.with_tests += other.with_tests;
        self.test_files += other.test_files;
        self.with_ci += other.with_ci;
        self.with_license += other.with_license;
        self.with_package_manifest += other.with_package_manifest;
        self.with_releases += other.with_releases;
    }
}

/// Sums of the per-repository scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScoreTotals {
    pub maintenance: u64,
    pub popularity: u64,
    pub code_quality: u64,
    pub documentation: u64,
}

impl ScoreTotals {
    const fn merge(&mut self, other: &Self) {
        self.maintenance += other.maintenance;
        self.popularity += other.popularity;
        self.code_quality += other.code_quality;
        self.documentation += other.documentation;
    }
}

/// Repositories created and last pushed in one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimelineBucket {
    pub created: u64,
    pub last_pushed: u64,
}

/// Aggregate view over every repository result folded so far.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub total_repositories: u64,
    pub succeeded: u64,
    pub failed: u64,

    pub public: u64,
    pub private: u64,
    pub forks: u64,
    pub archived: u64,

    pub total_lines_of_code: u64,
    pub total_files: u64,
    pub languages: BTreeMap<String, LanguageTotals>,
    pub activity: ActivityDistribution,
    pub quality: QualityTotals,
    pub scores: ScoreTotals,
    pub community: CommunityStats,
    pub anomaly_counts: BTreeMap<AnomalyKind, u64>,

    /// Keyed by `YYYY-MM`.
    pub timeline: BTreeMap<String, TimelineBucket>,
}

impl AggregateSnapshot {
    /// Fold a single result into the snapshot.
    pub fn fold(&mut self, result: &RepositoryResult) {
        let repo = &result.repository;

        self.total_repositories += 1;
        match repo.visibility {
            Visibility::Public => self.public += 1,
            Visibility::Private => self.private += 1,
        }
        self.forks += u64::from(repo.fork);
        self.archived += u64::from(repo.archived);
        self.timeline.entry(month_key(repo.created_at)).or_default().created += 1;

        for anomaly in &result.anomalies {
            *self.anomaly_counts.entry(*anomaly).or_default() += 1;
        }

        let metrics = match (&result.status, &result.metrics) {
            (ResultStatus::Succeeded, Some(metrics)) => metrics,
            _ => {
                self.failed += 1;
                return;
            }
        };

        self.succeeded += 1;
        self.total_lines_of_code += metrics.lines_of_code;
        self.total_files += metrics.total_files;

        for (language, bytes) in &metrics.language_bytes {
            let totals = self.languages.entry(language.clone()).or_default();
            totals.bytes += bytes;
            totals.repositories += 1;
        }
        if let Some(primary) = &metrics.primary_language {
            self.languages.entry(primary.clone()).or_default().primary_in += 1;
        }

        let activity = &metrics.activity;
        if activity.is_active {
            self.activity.active += 1;
        } else {
            self.activity.inactive += 1;
        }
        self.activity.commits_last_month += u64::from(activity.commits_last_month);
        self.activity.commits_last_year += u64::from(activity.commits_last_year);
        self.activity.yearly_commit_buckets[ActivityDistribution::commit_bucket(activity.commits_last_year)] += 1;
        self.activity.size_buckets[ActivityDistribution::size_bucket(metrics.lines_of_code)] += 1;
        if let Some(pushed) = metrics.pushed_at.or(repo.pushed_at) {
            self.timeline.entry(month_key(pushed)).or_default().last_pushed += 1;
        }

        let quality = &metrics.quality;
        self.quality.with_readme += u64::from(quality.has_readme);
        self.quality.with_docs += u64::from(quality.has_docs);
        self.quality.with_tests += u64::from(quality.has_tests);
        self.quality.test_files += quality.test_files;
        self.quality.with_ci += u64::from(quality.has_ci);
        self.quality.with_license += u64::from(quality.has_license);
        self.quality.with_package_manifest += u64::from(quality.has_package_manifest);
        self.quality.with_releases += u64::from(quality.has_releases);

        self.scores.maintenance += u64::from(metrics.scores.maintenance);
        self.scores.popularity += u64::from(metrics.scores.popularity);
        self.scores.code_quality += u64::from(metrics.scores.code_quality);
        self.scores.documentation += u64::from(metrics.scores.documentation);

        self.community.stars += metrics.community.stars;
        self.community.forks += metrics.community.forks;
        self.community.watchers += metrics.community.watchers;
        self.community.open_issues += metrics.community.open_issues;
    }

    /// Combine another partial snapshot into this one.
    pub fn merge(&mut self, other: &Self) {
        self.total_repositories += other.total_repositories;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.public += other.public;
        self.private += other.private;
        self.forks += other.forks;
        self.archived += other.archived;
        self.total_lines_of_code += other.total_lines_of_code;
        self.total_files += other.total_files;

        for (language, totals) in &other.languages {
            self.languages.entry(language.clone()).or_default().merge(totals);
        }

        self.activity.merge(&other.activity);
        self.quality.merge(&other.quality);
        self.scores.merge(&other.scores);

        self.community.stars += other.community.stars;
        self.community.forks += other.community.forks;
        self.community.watchers += other.community.watchers;
        self.community.open_issues += other.community.open_issues;

        for (kind, count) in &other.anomaly_counts {
            *self.anomaly_counts.entry(*kind).or_default() += count;
        }

        for (month, bucket) in &other.timeline {
            let mine = self.timeline.entry(month.clone()).or_default();
            mine.created += bucket.created;
            mine.last_pushed += bucket.last_pushed;
        }
    }

    /// Recompute a snapshot from scratch.
    #[must_use]
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a RepositoryResult>) -> Self {
        let mut snapshot = Self::default();
        for result in results {
            snapshot.fold(result);
        }
        snapshot
    }

    /// Average scores over the successfully analyzed repositories.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "averages only")]
    pub fn average_scores(&self) -> Option<[f64; 4]> {
        if self.succeeded == 0 {
            return None;
        }
        let n = self.succeeded as f64;
        Some([
            self.scores.maintenance as f64 / n,
            self.scores.popularity as f64 / n,
            self.scores.code_quality as f64 / n,
            self.scores.documentation as f64 / n,
        ])
    }

    /// Languages ordered by total bytes, largest first.
    #[must_use]
    pub fn top_languages(&self, count: usize) -> Vec<(&str, &LanguageTotals)> {
        let mut languages: Vec<_> = self.languages.iter().map(|(name, totals)| (name.as_str(), totals)).collect();
        languages.sort_by(|a, b| b.1.bytes.cmp(&a.1.bytes).then_with(|| a.0.cmp(b.0)));
        languages.truncate(count);
        languages
    }
}

fn month_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// Owns the results of a run and keeps the snapshot in step with them.
#[derive(Debug)]
pub struct Aggregator {
    thresholds: AnomalyThresholds,
    now: DateTime<Utc>,
    snapshot: AggregateSnapshot,
    results: BTreeMap<String, RepositoryResult>,
}

impl Aggregator {
    /// Create an aggregator that evaluates anomalies as of `now`.
    #[must_use]
    pub fn new(thresholds: AnomalyThresholds, now: DateTime<Utc>) -> Self {
        Self {
            thresholds,
            now,
            snapshot: AggregateSnapshot::default(),
            results: BTreeMap::new(),
        }
    }

    /// Restore results carried over from a checkpoint. Their anomaly tags are kept as-is.
    pub fn restore(&mut self, results: impl IntoIterator<Item = RepositoryResult>) {
        for result in results {
            self.insert(result);
        }
    }

    /// Tag anomalies on a freshly produced result and fold it in.
    ///
    /// A result for a repository that was already folded is ignored.
    pub fn fold(&mut self, mut result: RepositoryResult) -> &AggregateSnapshot {
        if let Some(metrics) = &result.metrics
            && !result.is_failed()
        {
            result.anomalies = self.thresholds.evaluate(metrics, self.now);
        }

        self.insert(result);
        &self.snapshot
    }

    fn insert(&mut self, result: RepositoryResult) {
        if self.results.contains_key(result.id()) {
            log::debug!(target: LOG_TARGET, "Ignoring duplicate result for '{}'", result.id());
            return;
        }

        self.snapshot.fold(&result);
        let _ = self.results.insert(result.id().to_string(), result);
    }

    #[must_use]
    pub const fn snapshot(&self) -> &AggregateSnapshot {
        &self.snapshot
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.results.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Identifiers of every folded repository.
    #[must_use]
    pub fn completed(&self) -> BTreeSet<String> {
        self.results.keys().cloned().collect()
    }

    pub fn results(&self) -> impl Iterator<Item = &RepositoryResult> {
        self.results.values()
    }

    #[must_use]
    pub fn into_parts(self) -> (AggregateSnapshot, Vec<RepositoryResult>) {
        (self.snapshot, self.results.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RepositoryRef;
    use crate::pipeline::repository_metrics::fixtures;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
    }

    fn repo(name: &str, month: u32) -> RepositoryRef {
        RepositoryRef::new("octo", name, Visibility::Public, Utc.with_ymd_and_hms(2023, month, 1, 0, 0, 0).unwrap())
    }

    fn sample_results() -> Vec<RepositoryResult> {
        let mut big = fixtures::metrics();
        big.lines_of_code = 50_000;
        big.quality.has_tests = false;
        big.language_bytes = BTreeMap::from([("Go".to_string(), 40_000)]);
        big.primary_language = Some("Go".to_string());

        let mut quiet = fixtures::metrics();
        quiet.activity.is_active = false;
        quiet.activity.commits_last_year = 0;
        quiet.community.stars = 12;

        let mut private = repo("secret", 3);
        private.visibility = Visibility::Private;
        private.fork = true;

        vec![
            RepositoryResult::succeeded(repo("alpha", 1), fixtures::metrics()),
            RepositoryResult::succeeded(repo("beta", 2), big),
            RepositoryResult::succeeded(repo("gamma", 2), quiet),
            RepositoryResult::failed(private, "repository is inaccessible"),
            RepositoryResult::succeeded(repo("delta", 5), fixtures::metrics()),
        ]
    }

    fn fold_in_order(results: &[RepositoryResult], order: &[usize]) -> AggregateSnapshot {
        let mut aggregator = Aggregator::new(AnomalyThresholds::default(), now());
        for &i in order {
            let _ = aggregator.fold(results[i].clone());
        }
        aggregator.snapshot().clone()
    }

    #[test]
    fn test_fold_counts() {
        let results = sample_results();
        let snapshot = fold_in_order(&results, &[0, 1, 2, 3, 4]);

        assert_eq!(snapshot.total_repositories, 5);
        assert_eq!(snapshot.succeeded, 4);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.private, 1);
        assert_eq!(snapshot.public, 4);
        assert_eq!(snapshot.forks, 1);
        assert_eq!(snapshot.activity.active, 3);
        assert_eq!(snapshot.activity.inactive, 1);
        assert_eq!(snapshot.total_lines_of_code, 500 * 3 + 50_000);
        assert_eq!(snapshot.languages["Go"].primary_in, 1);
        assert_eq!(snapshot.languages["Rust"].repositories, 3);
        assert_eq!(snapshot.anomaly_counts[&AnomalyKind::LargeWithoutTests], 1);
        assert_eq!(snapshot.anomaly_counts[&AnomalyKind::AbandonedPopular], 1);
        assert_eq!(snapshot.timeline["2023-02"].created, 2);
        assert_eq!(snapshot.activity.yearly_commit_buckets[0], 1);
        assert_eq!(snapshot.activity.size_buckets[4], 0);
        assert_eq!(snapshot.activity.size_buckets[3], 1);
    }

    #[test]
    fn test_fold_is_order_independent() {
        let results = sample_results();
        let reference = fold_in_order(&results, &[0, 1, 2, 3, 4]);

        let orders: [[usize; 5]; 6] = [
            [4, 3, 2, 1, 0],
            [2, 0, 4, 1, 3],
            [3, 1, 0, 4, 2],
            [1, 2, 3, 4, 0],
            [0, 4, 1, 3, 2],
            [3, 4, 0, 2, 1],
        ];

        for order in orders {
            assert_eq!(fold_in_order(&results, &order), reference, "order {order:?} changed the snapshot");
        }
    }

    #[test]
    fn test_merge_of_partial_folds_matches_full_fold() {
        let results = sample_results();
        let full = fold_in_order(&results, &[0, 1, 2, 3, 4]);

        let mut first = fold_in_order(&results, &[0, 3]);
        let second = fold_in_order(&results, &[1, 2, 4]);
        first.merge(&second);

        assert_eq!(first, full);
    }

    #[test]
    fn test_from_results_matches_aggregator() {
        let mut aggregator = Aggregator::new(AnomalyThresholds::default(), now());
        for result in sample_results() {
            let _ = aggregator.fold(result);
        }

        let recomputed = AggregateSnapshot::from_results(aggregator.results());
        assert_eq!(&recomputed, aggregator.snapshot());
    }

    #[test]
    fn test_duplicate_results_are_ignored() {
        let results = sample_results();
        let mut aggregator = Aggregator::new(AnomalyThresholds::default(), now());
        let _ = aggregator.fold(results[0].clone());
        let _ = aggregator.fold(results[0].clone());

        assert_eq!(aggregator.len(), 1);
        assert_eq!(aggregator.snapshot().total_repositories, 1);
    }

    #[test]
    fn test_restore_keeps_existing_tags() {
        let mut result = sample_results().remove(0);
        let _ = result.anomalies.insert(AnomalyKind::Stale);

        let mut aggregator = Aggregator::new(AnomalyThresholds::default(), now());
        aggregator.restore([result]);

        assert_eq!(aggregator.snapshot().anomaly_counts[&AnomalyKind::Stale], 1);
        assert!(aggregator.contains("octo/alpha"));
    }

    #[test]
    fn test_failed_results_are_not_tagged() {
        let results = sample_results();
        let mut aggregator = Aggregator::new(AnomalyThresholds::default(), now());
        let _ = aggregator.fold(results[3].clone());

        let (snapshot, results) = aggregator.into_parts();
        assert!(results[0].anomalies.is_empty());
        assert!(snapshot.anomaly_counts.is_empty());
        assert_eq!(snapshot.failed, 1);
    }

    #[test]
    fn test_average_scores() {
        assert!(AggregateSnapshot::default().average_scores().is_none());

        let snapshot = fold_in_order(&sample_results(), &[0, 4]);
        let [maintenance, popularity, code_quality, documentation] = snapshot.average_scores().unwrap();
        assert!((maintenance - 80.0).abs() < f64::EPSILON);
        assert!((popularity - 10.0).abs() < f64::EPSILON);
        assert!((code_quality - 90.0).abs() < f64::EPSILON);
        assert!((documentation - 70.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_top_languages() {
        let snapshot = fold_in_order(&sample_results(), &[0, 1, 2, 3, 4]);
        let top = snapshot.top_languages(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].0, "Go");
    }
}
