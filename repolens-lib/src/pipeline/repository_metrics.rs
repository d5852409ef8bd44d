use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of weekly commit samples kept per repository.
pub const WEEKLY_SAMPLES: usize = 52;

/// Metrics gathered for a single repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryMetrics {
    /// Estimated lines of code across recognized source files.
    pub lines_of_code: u64,
    pub total_files: u64,

    /// Bytes of code per language, as reported by the host.
    pub language_bytes: BTreeMap<String, u64>,
    pub primary_language: Option<String>,

    pub activity: CommitActivity,
    pub quality: QualityFlags,
    pub community: CommunityStats,
    pub scores: QualityScores,

    pub created_at: DateTime<Utc>,
    pub pushed_at: Option<DateTime<Utc>>,
}

impl RepositoryMetrics {
    /// Returns the share of `language`'s bytes in the repository, in `0.0..=1.0`.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "ratio only")]
    pub fn language_share(&self, language: &str) -> f64 {
        let total: u64 = self.language_bytes.values().sum();
        if total == 0 {
            return 0.0;
        }
        self.language_bytes.get(language).copied().unwrap_or(0) as f64 / total as f64
    }

    /// Whether the repository has no files at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total_files == 0
    }
}

/// Commit activity over the last year.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommitActivity {
    pub last_commit_at: Option<DateTime<Utc>>,
    pub commits_last_month: u32,
    pub commits_last_year: u32,

    /// Commits per week over the last year, oldest week first.
    pub weekly_commits: Vec<u32>,

    /// Whether the last commit falls within the configured activity window.
    pub is_active: bool,
}

/// Presence of quality signals in the repository tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[expect(clippy::struct_excessive_bools, reason = "each flag is an independent signal")]
pub struct QualityFlags {
    pub has_readme: bool,

    /// How thorough the top-level README is.
    #[serde(default)]
    pub readme: ReadmeClass,

    pub has_docs: bool,
    pub has_tests: bool,
    pub test_files: u64,
    pub has_ci: bool,
    pub has_license: bool,
    pub has_package_manifest: bool,
    pub has_releases: bool,
}

/// Comprehensiveness of a top-level README, judged by its length in lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReadmeClass {
    /// No README, or an empty one.
    #[default]
    None,

    /// Fewer than 20 lines.
    Small,

    /// Fewer than 100 lines.
    Good,

    Comprehensive,
}

impl ReadmeClass {
    #[must_use]
    pub const fn from_lines(lines: Option<u64>) -> Self {
        match lines {
            None | Some(0) => Self::None,
            Some(1..20) => Self::Small,
            Some(20..100) => Self::Good,
            Some(_) => Self::Comprehensive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommunityStats {
    pub stars: u64,
    pub forks: u64,
    pub watchers: u64,
    pub open_issues: u64,
}

/// Scores in whole points, `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QualityScores {
    pub maintenance: u8,
    pub popularity: u8,
    pub code_quality: u8,
    pub documentation: u8,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    /// A small, active, well-kept repository.
    pub fn metrics() -> RepositoryMetrics {
        RepositoryMetrics {
            lines_of_code: 500,
            total_files: 20,
            language_bytes: BTreeMap::from([("Rust".to_string(), 9_000), ("Shell".to_string(), 1_000)]),
            primary_language: Some("Rust".to_string()),
            activity: CommitActivity {
                last_commit_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
                commits_last_month: 4,
                commits_last_year: 40,
                weekly_commits: vec![1; WEEKLY_SAMPLES],
                is_active: true,
            },
            quality: QualityFlags {
                has_readme: true,
                readme: ReadmeClass::Good,
                has_docs: true,
                has_tests: true,
                test_files: 5,
                has_ci: true,
                has_license: true,
                has_package_manifest: true,
                has_releases: true,
            },
            community: CommunityStats {
                stars: 3,
                forks: 1,
                watchers: 2,
                open_issues: 0,
            },
            scores: QualityScores {
                maintenance: 80,
                popularity: 10,
                code_quality: 90,
                documentation: 70,
            },
            created_at: Utc.with_ymd_and_hms(2023, 1, 15, 0, 0, 0).unwrap(),
            pushed_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_share() {
        let metrics = fixtures::metrics();
        assert!((metrics.language_share("Rust") - 0.9).abs() < f64::EPSILON);
        assert!(metrics.language_share("Go").abs() < f64::EPSILON);
    }

    #[test]
    fn test_language_share_without_languages() {
        let metrics = RepositoryMetrics {
            language_bytes: BTreeMap::new(),
            ..fixtures::metrics()
        };
        assert!(metrics.language_share("Rust").abs() < f64::EPSILON);
    }

    #[test]
    fn test_is_empty() {
        assert!(!fixtures::metrics().is_empty());
        let empty = RepositoryMetrics {
            total_files: 0,
            ..fixtures::metrics()
        };
        assert!(empty.is_empty());
    }

    #[test]
    fn test_readme_class_boundaries() {
        assert_eq!(ReadmeClass::from_lines(None), ReadmeClass::None);
        assert_eq!(ReadmeClass::from_lines(Some(0)), ReadmeClass::None);
        assert_eq!(ReadmeClass::from_lines(Some(19)), ReadmeClass::Small);
        assert_eq!(ReadmeClass::from_lines(Some(20)), ReadmeClass::Good);
        assert_eq!(ReadmeClass::from_lines(Some(99)), ReadmeClass::Good);
        assert_eq!(ReadmeClass::from_lines(Some(100)), ReadmeClass::Comprehensive);
        assert!(ReadmeClass::Small < ReadmeClass::Good);
    }

    #[test]
    fn test_readme_class_defaults_when_missing_from_older_records() {
        let flags: QualityFlags = serde_json::from_str(
            r#"{"has_readme":true,"has_docs":false,"has_tests":false,"test_files":0,"has_ci":false,"has_license":false,"has_package_manifest":false,"has_releases":false}"#,
        )
        .unwrap();
        assert_eq!(flags.readme, ReadmeClass::None);
        assert_eq!(serde_json::to_string(&ReadmeClass::Comprehensive).unwrap(), r#""comprehensive""#);
    }
}
