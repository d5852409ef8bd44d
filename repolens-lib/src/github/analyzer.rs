//! Metrics for one repository, computed from a handful of REST calls.
//!
//! Calls made per repository, in order:
//!
//! 1. the repository itself, for community counts and the default branch
//! 2. its language breakdown
//! 3. the recursive tree of the default branch, for quality signals and size
//! 4. the commits of the last year, or the latest commit if there were none
//! 5. the latest few releases

use super::scoring::{ScoreInputs, score};
use super::tree_analysis::TreeSummary;
use super::types::{Commit, Repository, Tree};
use super::{ApiError, GitHub, LOG_TARGET};
use crate::pipeline::{
    AnalysisError, CallGate, CommitActivity, CommunityStats, QualityFlags, ReadmeClass, RepositoryAnalyzer, RepositoryMetrics,
    RepositoryRef, WEEKLY_SAMPLES,
};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::de::IgnoredAny;
use std::collections::BTreeMap;
use url::Url;

/// Commit pages read per repository; a busier year is counted as this many pages.
const MAX_COMMIT_PAGES: usize = 10;

const RELEASES_SAMPLED: &str = "5";

impl RepositoryAnalyzer for GitHub {
    async fn analyze(&self, repo: &RepositoryRef, gate: &CallGate<'_>) -> Result<RepositoryMetrics, AnalysisError> {
        let now = gate.governor().now();
        let segments = ["repos", repo.owner.as_str(), repo.name.as_str()];
        let endpoint = |extra: &[&str]| {
            let all: Vec<&str> = segments.iter().chain(extra).copied().collect();
            self.client.endpoint(&all)
        };

        let details: Repository = self.client.get_json(gate, endpoint(&[])).await?.data;
        let languages: BTreeMap<String, u64> = self.client.get_json(gate, endpoint(&["languages"])).await?.data;

        let tree = match details.default_branch.as_deref() {
            Some(branch) => {
                let mut url = endpoint(&["git", "trees", branch]);
                let _ = url.query_pairs_mut().append_pair("recursive", "1");
                match self.client.get_json::<Tree>(gate, url).await {
                    Ok(fetched) => TreeSummary::from_tree(&fetched.data),
                    Err(ApiError::NotFound | ApiError::Conflict(_)) => TreeSummary::default(),
                    Err(e) => return Err(e.into()),
                }
            }
            None => TreeSummary::default(),
        };
        if tree.truncated {
            log::debug!(target: LOG_TARGET, "Tree of '{repo}' was truncated, counts are lower bounds");
        }

        let commits = self.commit_dates(gate, endpoint(&["commits"]), now).await?;

        let mut url = endpoint(&["releases"]);
        let _ = url.query_pairs_mut().append_pair("per_page", RELEASES_SAMPLED);
        let releases = match self.client.get_json::<Vec<IgnoredAny>>(gate, url).await {
            Ok(fetched) => fetched.data.len() as u64,
            Err(ApiError::NotFound) => 0,
            Err(e) => return Err(e.into()),
        };

        log::debug!(
            target: LOG_TARGET,
            "Analyzed '{repo}': {} files, {} commits in the last year, {releases} releases",
            tree.total_files,
            commits.len()
        );

        Ok(build_metrics(&Facts {
            details: &details,
            languages,
            tree: &tree,
            commits: &commits,
            releases,
            now,
            inactive_after_days: self.inactive_after_days,
        }))
    }
}

impl GitHub {
    /// Commit dates of the last year, newest first, or just the latest commit if it is older.
    ///
    /// Empty repositories answer 409 and have no commits.
    async fn commit_dates(&self, gate: &CallGate<'_>, commits_url: Url, now: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>, AnalysisError> {
        let since = now - TimeDelta::days(365);

        let mut url = commits_url.clone();
        let _ = url
            .query_pairs_mut()
            .append_pair("since", &since.to_rfc3339_opts(SecondsFormat::Secs, true))
            .append_pair("per_page", "100");

        let recent: Vec<Commit> = match self.client.get_all(gate, url, Some(MAX_COMMIT_PAGES)).await {
            Ok(commits) => commits,
            Err(ApiError::Conflict(_) | ApiError::NotFound) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        if !recent.is_empty() {
            return Ok(recent.iter().filter_map(Commit::date).collect());
        }

        let mut url = commits_url;
        let _ = url.query_pairs_mut().append_pair("per_page", "1");
        match self.client.get_json::<Vec<Commit>>(gate, url).await {
            Ok(fetched) => Ok(fetched.data.iter().filter_map(Commit::date).collect()),
            Err(ApiError::Conflict(_) | ApiError::NotFound) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Everything fetched for one repository.
struct Facts<'a> {
    details: &'a Repository,
    languages: BTreeMap<String, u64>,
    tree: &'a TreeSummary,
    commits: &'a [DateTime<Utc>],
    releases: u64,
    now: DateTime<Utc>,
    inactive_after_days: u32,
}

fn build_metrics(facts: &Facts<'_>) -> RepositoryMetrics {
    let details = facts.details;
    let tree = facts.tree;

    let activity = commit_activity(facts.commits, facts.now, facts.inactive_after_days);

    let community = CommunityStats {
        stars: details.stargazers_count,
        forks: details.forks_count,
        watchers: details.subscribers_count.unwrap_or(details.watchers_count),
        open_issues: details.open_issues_count,
    };

    let quality = QualityFlags {
        has_readme: tree.readme_lines.is_some(),
        readme: ReadmeClass::from_lines(tree.readme_lines),
        has_docs: tree.doc_files > 0,
        has_tests: tree.test_files > 0,
        test_files: tree.test_files,
        has_ci: tree.has_ci,
        has_license: tree.has_license,
        has_package_manifest: tree.package_manifests > 0,
        has_releases: facts.releases > 0 || tree.has_release_notes,
    };

    let scores = score(&ScoreInputs {
        tree,
        activity: &activity,
        community: &community,
        releases: facts.releases,
        has_wiki: details.has_wiki,
    });

    let primary_language = facts
        .languages
        .iter()
        .max_by(|(a_name, a_bytes), (b_name, b_bytes)| a_bytes.cmp(b_bytes).then_with(|| b_name.cmp(a_name)))
        .map(|(name, _)| name.clone());

    RepositoryMetrics {
        lines_of_code: tree.lines_of_code,
        total_files: tree.total_files,
        language_bytes: facts.languages.clone(),
        primary_language,
        activity,
        quality,
        community,
        scores,
        created_at: details.created_at,
        pushed_at: details.pushed_at,
    }
}

/// Bucket commit dates into weeks, oldest week first, and classify the repository as active.
fn commit_activity(commits: &[DateTime<Utc>], now: DateTime<Utc>, inactive_after_days: u32) -> CommitActivity {
    let mut weekly_commits = vec![0_u32; WEEKLY_SAMPLES];
    let mut commits_last_month = 0_u32;
    let mut commits_last_year = 0_u32;

    for &date in commits {
        let age = now - date;
        if age < TimeDelta::zero() {
            continue;
        }

        if let Ok(weeks) = usize::try_from(age.num_weeks())
            && weeks < WEEKLY_SAMPLES
        {
            weekly_commits[WEEKLY_SAMPLES - 1 - weeks] += 1;
        }
        if age <= TimeDelta::days(30) {
            commits_last_month += 1;
        }
        if age <= TimeDelta::days(365) {
            commits_last_year += 1;
        }
    }

    let last_commit_at = commits.iter().copied().max();
    let is_active = last_commit_at.is_some_and(|last| now - last <= TimeDelta::days(i64::from(inactive_after_days)));

    CommitActivity {
        last_commit_at,
        commits_last_month,
        commits_last_year,
        weekly_commits,
        is_active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn details() -> Repository {
        serde_json::from_value(serde_json::json!({
            "name": "hello",
            "owner": { "login": "octo" },
            "private": false,
            "created_at": "2020-01-01T00:00:00Z",
            "pushed_at": "2024-05-30T00:00:00Z",
            "default_branch": "main",
            "stargazers_count": 12,
            "forks_count": 2,
            "subscribers_count": 4,
            "watchers_count": 12,
            "open_issues_count": 3,
            "has_wiki": true
        }))
        .unwrap()
    }

    #[test]
    fn test_commit_activity_buckets() {
        let commits = [
            now() - TimeDelta::hours(1),
            now() - TimeDelta::days(3),
            now() - TimeDelta::days(10),
            now() - TimeDelta::days(100),
            now() - TimeDelta::days(400),
        ];

        let activity = commit_activity(&commits, now(), 180);

        assert_eq!(activity.weekly_commits.len(), WEEKLY_SAMPLES);
        assert_eq!(activity.weekly_commits[WEEKLY_SAMPLES - 1], 2);
        assert_eq!(activity.weekly_commits[WEEKLY_SAMPLES - 2], 1);
        assert_eq!(activity.weekly_commits[WEEKLY_SAMPLES - 1 - 14], 1);
        assert_eq!(activity.weekly_commits.iter().sum::<u32>(), 4);
        assert_eq!(activity.commits_last_month, 3);
        assert_eq!(activity.commits_last_year, 4);
        assert_eq!(activity.last_commit_at, Some(now() - TimeDelta::hours(1)));
        assert!(activity.is_active);
    }

    #[test]
    fn test_commit_activity_inactive() {
        let activity = commit_activity(&[now() - TimeDelta::days(200)], now(), 180);
        assert!(!activity.is_active);
        assert_eq!(activity.commits_last_month, 0);
        assert_eq!(activity.commits_last_year, 1);

        let activity = commit_activity(&[], now(), 180);
        assert!(!activity.is_active);
        assert_eq!(activity.last_commit_at, None);
        assert_eq!(activity.weekly_commits, vec![0; WEEKLY_SAMPLES]);
    }

    #[test]
    fn test_commit_activity_ignores_future_dates() {
        let activity = commit_activity(&[now() + TimeDelta::days(2)], now(), 180);
        assert_eq!(activity.commits_last_year, 0);
        assert_eq!(activity.weekly_commits.iter().sum::<u32>(), 0);
    }

    #[test]
    fn test_build_metrics() {
        let details = details();
        let tree = TreeSummary {
            total_files: 8,
            source_files: 4,
            lines_of_code: 400,
            test_files: 2,
            doc_files: 1,
            readme_lines: Some(30),
            has_license: true,
            ..TreeSummary::default()
        };
        let commits = [now() - TimeDelta::days(2)];

        let metrics = build_metrics(&Facts {
            details: &details,
            languages: BTreeMap::from([("Rust".to_string(), 7_000), ("Python".to_string(), 3_000)]),
            tree: &tree,
            commits: &commits,
            releases: 0,
            now: now(),
            inactive_after_days: 180,
        });

        assert_eq!(metrics.primary_language.as_deref(), Some("Rust"));
        assert_eq!(metrics.lines_of_code, 400);
        assert_eq!(metrics.total_files, 8);
        assert_eq!(metrics.community.watchers, 4);
        assert_eq!(metrics.community.stars, 12);
        assert!(metrics.quality.has_readme);
        assert_eq!(metrics.quality.readme, ReadmeClass::Good);
        assert!(metrics.quality.has_tests);
        assert!(metrics.quality.has_license);
        assert!(!metrics.quality.has_releases);
        assert!(metrics.activity.is_active);
        assert_eq!(metrics.created_at, Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        // readme 30 + docs 15 + wiki 20
        assert_eq!(metrics.scores.documentation, 65);
    }

    #[test]
    fn test_primary_language_ties_break_by_name() {
        let details = details();
        let tree = TreeSummary::default();
        let metrics = build_metrics(&Facts {
            details: &details,
            languages: BTreeMap::from([("Go".to_string(), 10), ("C".to_string(), 10)]),
            tree: &tree,
            commits: &[],
            releases: 0,
            now: now(),
            inactive_after_days: 180,
        });
        assert_eq!(metrics.primary_language.as_deref(), Some("C"));

        let metrics = build_metrics(&Facts {
            details: &details,
            languages: BTreeMap::new(),
            tree: &tree,
            commits: &[],
            releases: 0,
            now: now(),
            inactive_after_days: 180,
        });
        assert_eq!(metrics.primary_language, None);
    }
}
