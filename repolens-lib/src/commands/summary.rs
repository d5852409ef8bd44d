//! Console summary of a run.

use crate::Result;
use crate::pipeline::{AnomalyKind, ResultStatus, RunReport, RunStatus};
use core::fmt::Write;
use owo_colors::OwoColorize;
use strum::IntoEnumIterator;

const TOP_LANGUAGES: usize = 5;
const LISTED_FAILURES: usize = 10;

const SIZE_LABELS: [&str; 5] = ["< 100", "< 1k", "< 10k", "< 100k", ">= 100k"];
const COMMIT_LABELS: [&str; 5] = ["none", "1-10", "11-50", "51-200", "> 200"];

#[expect(clippy::too_many_lines, reason = "the summary is a fixed sequence of sections")]
pub fn generate<W: Write>(report: &RunReport, owner: &str, use_colors: bool, writer: &mut W) -> Result<()> {
    let heading = |text: &str| if use_colors { text.bold().to_string() } else { text.to_string() };

    let status = match &report.status {
        RunStatus::Completed => "completed".to_string(),
        RunStatus::Aborted { reason } => format!("aborted: {reason}"),
        RunStatus::Interrupted => "interrupted".to_string(),
    };
    let status = match (&report.status, use_colors) {
        (_, false) => status,
        (RunStatus::Completed, true) => status.green().bold().to_string(),
        (RunStatus::Aborted { .. }, true) => status.red().bold().to_string(),
        (RunStatus::Interrupted, true) => status.yellow().bold().to_string(),
    };

    let summary = &report.summary;
    let snapshot = &report.snapshot;

    writeln!(writer, "Run {} for '{owner}' {status}", summary.run_id)?;
    writeln!(
        writer,
        "  {} in scope, {} filtered out, {} from earlier runs, {} analyzed now ({} failed) in {}",
        summary.considered,
        summary.filtered,
        summary.skipped,
        summary.processed,
        summary.failed,
        format_elapsed(summary.elapsed.as_secs())
    )?;
    if summary.resumed {
        writeln!(writer, "  Resumed from a checkpoint")?;
    }
    if !summary.unavailable_organizations.is_empty() {
        writeln!(writer, "  Skipped organizations: {}", summary.unavailable_organizations.join(", "))?;
    }

    writeln!(writer)?;
    writeln!(writer, "{}", heading("Repositories"))?;
    writeln!(
        writer,
        "  {} total: {} analyzed, {} failed",
        snapshot.total_repositories, snapshot.succeeded, snapshot.failed
    )?;
    writeln!(
        writer,
        "  {} public, {} private, {} forks, {} archived",
        snapshot.public, snapshot.private, snapshot.forks, snapshot.archived
    )?;
    writeln!(
        writer,
        "  {} stars, {} forks, {} watchers, {} open issues",
        snapshot.community.stars, snapshot.community.forks, snapshot.community.watchers, snapshot.community.open_issues
    )?;

    if snapshot.succeeded > 0 {
        writeln!(writer)?;
        writeln!(writer, "{}", heading("Code"))?;
        writeln!(
            writer,
            "  ~{} lines of code in {} files",
            snapshot.total_lines_of_code, snapshot.total_files
        )?;
        for (label, count) in SIZE_LABELS.iter().zip(snapshot.activity.size_buckets) {
            writeln!(writer, "  {label:>8} lines: {count}")?;
        }

        let languages = snapshot.top_languages(TOP_LANGUAGES);
        if !languages.is_empty() {
            writeln!(writer)?;
            writeln!(writer, "{}", heading("Top languages"))?;
            let width = languages.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
            for (name, totals) in languages {
                writeln!(
                    writer,
                    "  {name:<width$} : {} bytes in {} repositories, primary in {}",
                    totals.bytes, totals.repositories, totals.primary_in
                )?;
            }
        }

        writeln!(writer)?;
        writeln!(writer, "{}", heading("Activity"))?;
        writeln!(
            writer,
            "  {} active, {} inactive; {} commits last month, {} last year",
            snapshot.activity.active,
            snapshot.activity.inactive,
            snapshot.activity.commits_last_month,
            snapshot.activity.commits_last_year
        )?;
        for (label, count) in COMMIT_LABELS.iter().zip(snapshot.activity.yearly_commit_buckets) {
            writeln!(writer, "  {label:>8} commits: {count}")?;
        }

        let quality = &snapshot.quality;
        writeln!(writer)?;
        writeln!(writer, "{}", heading("Quality"))?;
        for (label, count) in [
            ("README", quality.with_readme),
            ("documentation", quality.with_docs),
            ("tests", quality.with_tests),
            ("CI/CD", quality.with_ci),
            ("license", quality.with_license),
            ("package manifest", quality.with_package_manifest),
            ("releases", quality.with_releases),
        ] {
            writeln!(writer, "  {label:<16} : {count} of {}", snapshot.succeeded)?;
        }

        if let Some([maintenance, popularity, code_quality, documentation]) = snapshot.average_scores() {
            writeln!(writer)?;
            writeln!(writer, "{}", heading("Average scores"))?;
            writeln!(writer, "  maintenance   : {maintenance:.1}")?;
            writeln!(writer, "  popularity    : {popularity:.1}")?;
            writeln!(writer, "  code quality  : {code_quality:.1}")?;
            writeln!(writer, "  documentation : {documentation:.1}")?;
        }
    }

    let anomalies: Vec<(AnomalyKind, u64)> = AnomalyKind::iter()
        .filter_map(|kind| snapshot.anomaly_counts.get(&kind).map(|&count| (kind, count)))
        .filter(|&(_, count)| count > 0)
        .collect();
    if !anomalies.is_empty() {
        writeln!(writer)?;
        writeln!(writer, "{}", heading("Anomalies"))?;
        for (kind, count) in anomalies {
            writeln!(writer, "  {count:>4}  {kind}")?;
        }
    }

    let failures: Vec<_> = report
        .results
        .iter()
        .filter_map(|result| match &result.status {
            ResultStatus::Failed { reason } => Some((result.id(), reason)),
            ResultStatus::Succeeded => None,
        })
        .collect();
    if !failures.is_empty() {
        writeln!(writer)?;
        writeln!(writer, "{}", heading("Failed repositories"))?;
        for (id, reason) in failures.iter().take(LISTED_FAILURES) {
            writeln!(writer, "  {id}: {reason}")?;
        }
        if failures.len() > LISTED_FAILURES {
            writeln!(writer, "  ... and {} more", failures.len() - LISTED_FAILURES)?;
        }
    }

    writeln!(writer)?;
    writeln!(
        writer,
        "API quota: {} ({} waits)",
        summary.final_rate_state, summary.quota_waits
    )?;

    Ok(())
}

fn format_elapsed(secs: u64) -> String {
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m {}s", secs / 60, secs % 60),
        _ => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
    }
}
