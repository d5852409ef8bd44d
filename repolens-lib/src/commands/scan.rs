use super::Host;
use super::common::{ColorMode, LogLevel, init_logging};
use super::config::Config;
use super::progress_reporter::ProgressReporter;
use super::summary;
use crate::Result;
use crate::github::{DEFAULT_API_URL, GitHub, GitHubClient};
use crate::pipeline::{
    CancellationToken, CheckpointStore, Orchestrator, Progress, RateGovernor, RunMode, RunReport, RunStatus, Scope, SystemClock,
    VisibilityFilter,
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, ValueEnum};
use core::time::Duration;
use directories::BaseDirs;
use ohno::IntoAppError;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

const LOG_TARGET: &str = "      scan";

/// Exit code when the run stops because the API quota ran out.
const EXIT_ABORTED: i32 = 2;

/// Exit code when the operator interrupts the run.
const EXIT_INTERRUPTED: i32 = 130;

/// How much of the account to cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScanMode {
    /// Every repository
    Full,

    /// The first 10 repositories
    Demo,

    /// The first repository only
    Test,
}

#[derive(Parser, Debug)]
pub struct ScanArgs {
    /// GitHub user whose repositories are scanned
    #[arg(value_name = "OWNER")]
    pub owner: String,

    /// Also scan the repositories of these organizations
    #[arg(long = "org", value_name = "ORG", value_delimiter = ',')]
    pub organizations: Vec<String>,

    /// Only scan repositories with this visibility
    #[arg(long, value_name = "VISIBILITY", default_value = "all")]
    pub visibility: VisibilityFilter,

    /// Leave out forked repositories
    #[arg(long)]
    pub skip_forks: bool,

    /// Leave out archived repositories
    #[arg(long)]
    pub skip_archived: bool,

    /// How much of the account to cover
    #[arg(long, value_name = "MODE", default_value = "full")]
    pub mode: ScanMode,

    /// Only scan the first N repositories
    #[arg(long, value_name = "N", conflicts_with = "mode", value_parser = clap::value_parser!(u32).range(1..))]
    pub limit: Option<u32>,

    /// Number of repositories analyzed at the same time (overrides the configuration)
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Discard any checkpoint left by an earlier run before starting
    #[arg(long)]
    pub fresh: bool,

    /// Ignore the checkpoint left by an earlier run
    #[arg(long)]
    pub no_resume: bool,

    /// Where progress is saved (default is a file in the platform cache directory)
    #[arg(long, value_name = "PATH")]
    pub checkpoint: Option<Utf8PathBuf>,

    /// Write the full run report to a JSON file
    #[arg(long, value_name = "PATH", help_heading = "Report Output")]
    pub json: Option<Utf8PathBuf>,

    /// GitHub personal access token
    #[arg(long, value_name = "TOKEN", env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Base URL of the GitHub REST API
    #[arg(long, value_name = "URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Path to configuration file (default is `repolens.toml`)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,

    /// Control when to use colored output
    #[arg(long, value_name = "WHEN", default_value = "auto")]
    pub color: ColorMode,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none")]
    pub log_level: LogLevel,
}

impl ScanArgs {
    fn scope(&self) -> Scope {
        let mut scope = Scope::new(self.owner.trim());
        scope.organizations = self
            .organizations
            .iter()
            .map(|org| org.trim().to_string())
            .filter(|org| !org.is_empty())
            .collect();
        scope.visibility = self.visibility;
        scope.skip_forks = self.skip_forks;
        scope.skip_archived = self.skip_archived;
        scope.mode = match (self.limit, self.mode) {
            (Some(limit), _) => RunMode::Limit(usize::try_from(limit).unwrap_or(usize::MAX)),
            (None, ScanMode::Full) => RunMode::Full,
            (None, ScanMode::Demo) => RunMode::Demo,
            (None, ScanMode::Test) => RunMode::Test,
        };
        scope
    }

    fn token(&self) -> Option<&str> {
        self.github_token.as_deref().map(str::trim).filter(|token| !token.is_empty())
    }
}

pub async fn process_scan<H: Host>(host: &mut H, args: &ScanArgs) -> Result<()> {
    init_logging(args.log_level);

    let mut config = Config::load(Utf8Path::new("."), args.config.as_ref())?;
    if let Some(workers) = args.workers {
        config.workers = workers;
        config.validate()?;
    }

    let scope = args.scope();
    if scope.owner.is_empty() {
        return Err(ohno::app_err!("the owner must not be empty"));
    }

    let checkpoint_path = match &args.checkpoint {
        Some(path) => path.clone().into_std_path_buf(),
        None => default_checkpoint_path(&scope)?,
    };

    let token = args.token();
    if token.is_none() {
        log::warn!(target: LOG_TARGET, "No GitHub token provided, only public repositories are visible");
        let _ = writeln!(
            host.error(),
            "warning: no GitHub token provided (use --github-token or GITHUB_TOKEN); only public repositories are visible and the API quota is small"
        );
    }

    let client = GitHubClient::new(token, &args.api_url, config.request_timeout)?;
    let governor = Arc::new(RateGovernor::new(config.rate, Arc::new(SystemClock)));
    let github = Arc::new(
        GitHub::new(client, Arc::clone(&governor))
            .with_retry(config.retry)
            .with_inactive_after_days(config.inactive_after_days),
    );

    let store = CheckpointStore::new(checkpoint_path);
    if args.fresh {
        store.clear()?;
    }

    log::info!(target: LOG_TARGET, "Scanning '{}' ({}), checkpoint at '{}'", scope.owner, scope.mode, store.path().display());

    let delay = if args.log_level == LogLevel::None {
        Duration::from_millis(300)
    } else {
        Duration::from_hours(365 * 24)
    };
    let progress: Arc<dyn Progress> = Arc::new(ProgressReporter::new(delay, args.color.for_stderr()));

    let orchestrator = Orchestrator::new(Arc::clone(&github), Arc::clone(&github), github, governor, store)
        .with_settings(config.pipeline_settings(!args.no_resume))
        .with_thresholds(config.anomalies)
        .with_progress(Arc::clone(&progress));

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::debug!(target: LOG_TARGET, "Received an interrupt signal");
                cancel.cancel();
            }
        })
    };

    let outcome = orchestrator.run(&scope, &cancel).await;
    interrupt.abort();
    progress.done();
    let report = outcome?;

    if let Some(path) = &args.json {
        write_json(&report, path)?;
    }

    let mut text = String::new();
    summary::generate(&report, &scope.owner, args.color.for_stdout(), &mut text)?;
    let _ = write!(host.output(), "{text}");

    match &report.status {
        RunStatus::Completed => {}
        RunStatus::Aborted { .. } => host.exit(EXIT_ABORTED),
        RunStatus::Interrupted => host.exit(EXIT_INTERRUPTED),
    }

    Ok(())
}

fn write_json(report: &RunReport, path: &Utf8Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).into_app_err("serializing the run report")?;
    fs::write(path, json).into_app_err_with(|| format!("writing run report to '{path}'"))?;
    log::info!(target: LOG_TARGET, "Wrote run report to '{path}'");
    Ok(())
}

fn default_checkpoint_path(scope: &Scope) -> Result<PathBuf> {
    let cache_dir = BaseDirs::new().into_app_err("could not determine cache directory")?.cache_dir().join("repolens");
    Ok(cache_dir.join(checkpoint_file_name(scope)))
}

/// One checkpoint per owner and mode, so a demo run never resumes into a full one.
fn checkpoint_file_name(scope: &Scope) -> String {
    let owner: String = scope
        .owner
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("checkpoint-{owner}-{}.json", scope.mode)
}
