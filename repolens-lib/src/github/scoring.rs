//! Per-repository quality scores.
//!
//! Every score is a sum of whole points capped at 100, so the aggregate can average them
//! exactly regardless of fold order.

use super::tree_analysis::TreeSummary;
use crate::pipeline::{CommitActivity, CommunityStats, QualityScores, ReadmeClass};

const MAX_SCORE: u64 = 100;

/// Everything the scores are computed from.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs<'a> {
    pub tree: &'a TreeSummary,
    pub activity: &'a CommitActivity,
    pub community: &'a CommunityStats,
    pub releases: u64,
    pub has_wiki: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Size {
    None,
    Small,
    Medium,
    Large,
}

impl Size {
    const fn of_docs(doc_files: u64) -> Self {
        match doc_files {
            0 => Self::None,
            1..=2 => Self::Small,
            3..=10 => Self::Medium,
            _ => Self::Large,
        }
    }

    const fn of_readme(lines: Option<u64>) -> Self {
        match ReadmeClass::from_lines(lines) {
            ReadmeClass::None => Self::None,
            ReadmeClass::Small => Self::Small,
            ReadmeClass::Good => Self::Medium,
            ReadmeClass::Comprehensive => Self::Large,
        }
    }

    /// Points for this size on a `small/medium/large` scale.
    const fn points(self, small: u64, medium: u64, large: u64) -> u64 {
        match self {
            Self::None => 0,
            Self::Small => small,
            Self::Medium => medium,
            Self::Large => large,
        }
    }
}

#[must_use]
pub fn score(inputs: &ScoreInputs<'_>) -> QualityScores {
    QualityScores {
        maintenance: cap(maintenance(inputs)),
        popularity: cap(popularity(inputs.community)),
        code_quality: cap(code_quality(inputs.tree)),
        documentation: cap(documentation(inputs.tree, inputs.has_wiki)),
    }
}

fn cap(points: u64) -> u8 {
    u8::try_from(points.min(MAX_SCORE)).unwrap_or(u8::MAX)
}

fn maintenance(inputs: &ScoreInputs<'_>) -> u64 {
    let tree = inputs.tree;
    let mut points = Size::of_docs(tree.doc_files).points(5, 10, 15);
    points += Size::of_readme(tree.readme_lines).points(3, 7, 10);

    points += match tree.test_files {
        0 => 0,
        1..=5 => 5,
        6..=10 => 10,
        _ => 15,
    };

    if tree.has_ci {
        points += 10;
    }
    if tree.package_manifests > 0 {
        points += 5;
    }
    if tree.has_deployment {
        points += 5;
    }
    points += inputs.releases.min(5);

    if inputs.activity.is_active {
        points += 10 + u64::from(inputs.activity.commits_last_month).div_ceil(2).min(5);
    }

    if tree.has_license {
        points += 5;
    }

    points += match inputs.community.open_issues {
        0..10 => 5,
        10..50 => 3,
        _ => 0,
    };

    if tree.total_files > 5 {
        points += 3;
    }
    if tree.dependency_configs > 0 {
        points += 2;
    }

    points
}

fn popularity(community: &CommunityStats) -> u64 {
    let stars = match community.stars {
        0 => 0,
        1..=10 => 5,
        11..=100 => 15,
        101..=1000 => 30,
        _ => 50,
    };

    let forks = match community.forks {
        0 => 0,
        1..=10 => 10,
        11..=100 => 20,
        _ => 30,
    };

    let watchers = match community.watchers {
        0 => 0,
        1..=10 => 5,
        _ => 10,
    };

    stars + forks + watchers
}

fn code_quality(tree: &TreeSummary) -> u64 {
    let mut points = 0;

    if tree.test_files > 0 {
        let others = tree.total_files.saturating_sub(tree.test_files).max(1);
        points += (30 * tree.test_files / others).min(30);
    }

    if tree.has_ci {
        points += 20;
    }

    points += if tree.package_manifests > 3 { 10 } else { tree.package_manifests * 3 };

    points += match tree.average_lines_per_file() {
        0 => 0,
        1..300 => 20,
        _ => 10,
    };

    points + Size::of_docs(tree.doc_files).points(10, 15, 20)
}

fn documentation(tree: &TreeSummary, has_wiki: bool) -> u64 {
    let wiki = if has_wiki { 20 } else { 0 };
    Size::of_readme(tree.readme_lines).points(15, 30, 40) + Size::of_docs(tree.doc_files).points(15, 30, 40) + wiki
}
