//! Durable, versioned record of a run's progress.
//!
//! [`CheckpointStore`] keeps a single JSON file per scope. Saves write a sibling temporary
//! file, sync it, and rename it over the previous record, so a crash at any point leaves
//! either the old record or the new one on disk. Loads never fail: a missing, unreadable,
//! outdated, foreign, or inconsistent record is reported and treated as absent.

use super::{AggregateSnapshot, Aggregator, RepositoryResult};
use crate::Result;
use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use ohno::IntoAppError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

const LOG_TARGET: &str = "checkpoint";

/// Version of the on-disk checkpoint layout.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Everything needed to resume a run without repeating completed work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub format_version: u32,
    pub run_id: String,

    /// Canonical description of the scope the record belongs to.
    pub scope_fingerprint: String,

    pub started_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,

    /// Identifiers of every repository folded into `aggregate`.
    pub completed: BTreeSet<String>,
    pub aggregate: AggregateSnapshot,
    pub results: Vec<RepositoryResult>,
}

impl CheckpointRecord {
    /// Capture the aggregator's current state.
    #[must_use]
    pub fn capture(run_id: &str, scope_fingerprint: &str, started_at: DateTime<Utc>, saved_at: DateTime<Utc>, aggregator: &Aggregator) -> Self {
        Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            run_id: run_id.to_string(),
            scope_fingerprint: scope_fingerprint.to_string(),
            started_at,
            saved_at,
            completed: aggregator.completed(),
            aggregate: aggregator.snapshot().clone(),
            results: aggregator.results().cloned().collect(),
        }
    }

    /// Check that the completed set, the results, and the aggregate agree with each other.
    fn check_consistency(&self) -> core::result::Result<(), String> {
        let ids: BTreeSet<&str> = self.results.iter().map(RepositoryResult::id).collect();
        if ids.len() != self.results.len() {
            return Err("duplicate repository results".to_string());
        }

        if !ids.iter().copied().eq(self.completed.iter().map(String::as_str)) {
            return Err(format!(
                "completed set lists {} repositories but {} results are stored",
                self.completed.len(),
                self.results.len()
            ));
        }

        if AggregateSnapshot::from_results(&self.results) != self.aggregate {
            return Err("aggregate does not match the stored results".to_string());
        }

        Ok(())
    }
}

/// Outcome of loading a checkpoint.
#[derive(Debug, Clone)]
pub enum CheckpointLoad {
    /// A valid record for this scope.
    Loaded(Box<CheckpointRecord>),

    /// No checkpoint exists.
    Missing,

    /// A checkpoint exists but cannot be used; the reason says why.
    Discarded(String),
}

#[derive(Deserialize)]
struct VersionHeader {
    format_version: Option<u32>,
}

/// Exclusive hold on a checkpoint for the length of a run, released when dropped.
///
/// The lock lives in a sibling `.lock` file that records the process id of the holder.
#[derive(Debug)]
pub struct CheckpointLock {
    file: File,
    checkpoint: PathBuf,
}

impl Drop for CheckpointLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!(target: LOG_TARGET, "Could not unlock checkpoint '{}': {e}", self.checkpoint.display());
        }
    }
}

/// File-backed checkpoint storage.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_name().map(ToOwned::to_owned).unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    fn create_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).into_app_err_with(|| format!("creating checkpoint directory '{}'", parent.display()))?;
        }
        Ok(())
    }

    /// Take the exclusive lock that keeps other runs away from this checkpoint.
    ///
    /// If another run holds it, waits until that run ends.
    pub async fn lock(&self) -> Result<CheckpointLock> {
        self.create_parent()?;

        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .into_app_err_with(|| format!("opening lock file '{}'", lock_path.display()))?;

        let acquired = FileExt::try_lock_exclusive(&file).into_app_err_with(|| format!("locking checkpoint '{}'", self.path.display()))?;
        let file = if acquired {
            file
        } else {
            let holder = fs::read_to_string(&lock_path)
                .ok()
                .map(|text| text.trim().to_string())
                .filter(|pid| !pid.is_empty())
                .map_or_else(|| "another run".to_string(), |pid| format!("process {pid}"));
            log::info!(
                target: LOG_TARGET,
                "Checkpoint '{}' is in use by {holder}, waiting for it to finish",
                self.path.display()
            );

            tokio::task::spawn_blocking(move || FileExt::lock_exclusive(&file).map(|()| file))
                .await
                .into_app_err("checkpoint lock task panicked")?
                .into_app_err_with(|| format!("locking checkpoint '{}'", self.path.display()))?
        };

        file.set_len(0)
            .and_then(|()| (&file).write_all(std::process::id().to_string().as_bytes()))
            .into_app_err_with(|| format!("recording the holder in lock file '{}'", lock_path.display()))?;

        log::debug!(target: LOG_TARGET, "Locked checkpoint '{}'", self.path.display());
        Ok(CheckpointLock {
            file,
            checkpoint: self.path.clone(),
        })
    }

    /// Load the checkpoint for the scope identified by `scope_fingerprint`.
    #[must_use]
    pub fn load(&self, scope_fingerprint: &str) -> CheckpointLoad {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!(target: LOG_TARGET, "No checkpoint at '{}'", self.path.display());
                return CheckpointLoad::Missing;
            }
            Err(e) => return self.discard(format!("unreadable: {e}")),
        };

        match serde_json::from_str::<VersionHeader>(&text) {
            Ok(VersionHeader { format_version: Some(CHECKPOINT_FORMAT_VERSION) }) => {}
            Ok(VersionHeader { format_version: Some(other) }) => {
                return self.discard(format!("format version {other}, expected {CHECKPOINT_FORMAT_VERSION}"));
            }
            Ok(VersionHeader { format_version: None }) => return self.discard("missing format version".to_string()),
            Err(e) => return self.discard(format!("corrupt: {e}")),
        }

        let record: CheckpointRecord = match serde_json::from_str(&text) {
            Ok(record) => record,
            Err(e) => return self.discard(format!("corrupt: {e}")),
        };

        if record.scope_fingerprint != scope_fingerprint {
            return self.discard(format!("it was written for a different scope ({})", record.scope_fingerprint));
        }

        if let Err(reason) = record.check_consistency() {
            return self.discard(format!("inconsistent: {reason}"));
        }

        log::info!(
            target: LOG_TARGET,
            "Loaded checkpoint '{}' with {} completed repositories (saved {})",
            self.path.display(),
            record.completed.len(),
            record.saved_at
        );
        CheckpointLoad::Loaded(Box::new(record))
    }

    fn discard(&self, reason: String) -> CheckpointLoad {
        log::warn!(target: LOG_TARGET, "Ignoring checkpoint '{}': {reason}", self.path.display());
        CheckpointLoad::Discarded(reason)
    }

    /// Atomically replace the stored record.
    pub fn save(&self, record: &CheckpointRecord) -> Result<()> {
        self.create_parent()?;

        let temp = self.temp_path();
        let file = File::create(&temp).into_app_err_with(|| format!("creating checkpoint file '{}'", temp.display()))?;
        let mut writer = BufWriter::new(file);

        #[cfg(debug_assertions)]
        let result = serde_json::to_writer_pretty(&mut writer, record);
        #[cfg(not(debug_assertions))]
        let result = serde_json::to_writer(&mut writer, record);

        result.into_app_err_with(|| format!("writing checkpoint file '{}'", temp.display()))?;
        writer
            .flush()
            .into_app_err_with(|| format!("flushing checkpoint file '{}'", temp.display()))?;
        writer
            .get_ref()
            .sync_all()
            .into_app_err_with(|| format!("syncing checkpoint file '{}'", temp.display()))?;
        drop(writer);

        fs::rename(&temp, &self.path)
            .into_app_err_with(|| format!("replacing checkpoint '{}' with '{}'", self.path.display(), temp.display()))?;

        log::debug!(
            target: LOG_TARGET,
            "Saved checkpoint '{}' with {} completed repositories",
            self.path.display(),
            record.completed.len()
        );
        Ok(())
    }

    /// Delete the stored record, if any.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::info!(target: LOG_TARGET, "Removed checkpoint '{}'", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).into_app_err_with(|| format!("removing checkpoint '{}'", self.path.display())),
        }
    }
}
