use chrono::{DateTime, Duration, Local, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::archive::{ARCHIVE_EXTENSION, ArchiveWriter};
use crate::error::Result;
use crate::fs_utils;
use crate::history::{BackupRecord, BackupStatus, HistoryLedger};
use crate::job::{BackupJob, RunGuard, RunningFlag, Traversal};
use crate::mirror;
use crate::progress::{Progress, Reporter, Timer};
use crate::size::{format_size, path_size};

/// Result of one orchestrated run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub record: BackupRecord,
    /// False when nothing was written before cancellation and no record was kept
    pub recorded: bool,
}

impl RunOutcome {
    pub fn status(&self) -> BackupStatus {
        self.record.status
    }
}

/// Runs backup jobs one at a time and records their outcome in the ledger
#[derive(Debug)]
pub struct BackupOrchestrator {
    ledger: Arc<Mutex<HistoryLedger>>,
    running: RunningFlag,
    auto_clean_days: Option<u32>,
}

impl BackupOrchestrator {
    pub fn new(ledger: Arc<Mutex<HistoryLedger>>) -> Self {
        Self {
            ledger,
            running: RunningFlag::new(),
            auto_clean_days: None,
        }
    }

    /// Prune records older than `days` after every recorded run
    pub fn with_auto_clean(mut self, days: Option<u32>) -> Self {
        self.auto_clean_days = days;
        self
    }

    pub fn ledger(&self) -> Arc<Mutex<HistoryLedger>> {
        self.ledger.clone()
    }

    pub fn running_flag(&self) -> &RunningFlag {
        &self.running
    }

    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    /// Validate the job, claim the running flag and execute the run on this thread
    pub fn run(&self, job: BackupJob, reporter: &dyn Reporter) -> Result<RunOutcome> {
        job.validate()?;
        let guard = self.running.try_acquire()?;
        self.run_reserved(guard, job, reporter)
    }

    /// Execute a run whose running flag was already claimed by the caller.
    /// The flag is released when this returns.
    pub fn run_reserved(&self, guard: RunGuard, job: BackupJob, reporter: &dyn Reporter) -> Result<RunOutcome> {
        let outcome = self.execute(&job, reporter);
        drop(guard);
        Ok(outcome)
    }

    fn execute(&self, job: &BackupJob, reporter: &dyn Reporter) -> RunOutcome {
        let base = artifact_base_name(&job.source_name(), Local::now());
        let artifact = unique_artifact_path(&job.destination_root, &base, job.compress);

        tracing::info!("Backing up {} to {}", job.source.display(), artifact.display());
        reporter.report(Progress::Started {
            artifact: artifact.display().to_string(),
        });

        let timer = Timer::new();
        let result = perform(job, &artifact, reporter);
        let elapsed = timer.elapsed_secs();

        let make_record = |status: BackupStatus| {
            BackupRecord::new(&job.source, &artifact, status, job.compress, job.exclusions.clone())
                .with_elapsed(elapsed)
        };

        let (record, worth_keeping) = match result {
            Ok((Traversal::Completed { files }, size)) => {
                tracing::info!("Backup finished: {} file(s), {}", files, format_size(size));
                reporter.report(Progress::Finished {
                    elapsed_secs: elapsed,
                    size: format_size(size),
                });
                (make_record(BackupStatus::Succeeded).with_size(size), true)
            }
            Ok((Traversal::Cancelled { files }, _)) => {
                tracing::info!("Backup cancelled after {} file(s)", files);
                reporter.report(Progress::Cancelled);
                (make_record(BackupStatus::Cancelled), files > 0)
            }
            Err(e) => {
                tracing::error!("Backup of {} failed: {}", job.source.display(), e);
                reporter.report(Progress::Failed(e.to_string()));
                (make_record(BackupStatus::Failed).with_error(e.to_string()), true)
            }
        };

        if !worth_keeping {
            return RunOutcome { record, recorded: false };
        }

        let record = self.append(record);
        self.auto_clean();

        RunOutcome { record, recorded: true }
    }

    fn append(&self, mut record: BackupRecord) -> BackupRecord {
        let mut ledger = self.lock_ledger();
        record.id = ledger.next_id();
        match ledger.add(record.clone()) {
            Ok(id) => record.id = id,
            Err(e) => tracing::warn!("Failed to save backup history: {}", e),
        }
        record
    }

    fn auto_clean(&self) {
        let Some(days) = self.auto_clean_days else {
            return;
        };

        let cutoff = Utc::now() - Duration::days(i64::from(days));
        match self.lock_ledger().prune_older_than(cutoff) {
            Ok(removed) if !removed.is_empty() => {
                tracing::info!("Auto-clean removed {} backup(s) older than {} days", removed.len(), days);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Auto-clean failed: {}", e),
        }
    }

    fn lock_ledger(&self) -> MutexGuard<'_, HistoryLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run the traversal for the job's mode and size the artifact when it completes
fn perform(job: &BackupJob, artifact: &Path, reporter: &dyn Reporter) -> Result<(Traversal, u64)> {
    fs_utils::ensure_dir(&job.destination_root)?;

    let traversal = if job.compress {
        reporter.report(Progress::Archiving);
        ArchiveWriter::with_compression(job.compression_level).write(
            &job.source,
            artifact,
            &job.exclusions,
            &job.cancel,
            reporter,
        )?
    }
    else {
        reporter.report(Progress::Mirroring);
        fs_utils::ensure_dir(artifact)?;
        mirror::copy_tree(&job.source, artifact, &job.exclusions, &job.cancel, reporter)?
    };

    let size = match traversal {
        Traversal::Completed { .. } => path_size(artifact)?,
        Traversal::Cancelled { .. } => 0,
    };

    Ok((traversal, size))
}

/// `backup_<name>_<YYYYmmdd_HHMMSS>`, without extension
pub fn artifact_base_name(source_name: &str, at: DateTime<Local>) -> String {
    format!("backup_{}_{}", source_name, at.format("%Y%m%d_%H%M%S"))
}

/// First free artifact path under `root`, appending `_2`, `_3`, ... on collision
pub fn unique_artifact_path(root: &Path, base: &str, compress: bool) -> PathBuf {
    let file_name = |stem: &str| {
        if compress {
            format!("{}.{}", stem, ARCHIVE_EXTENSION)
        }
        else {
            stem.to_string()
        }
    };

    let mut candidate = root.join(file_name(base));
    let mut suffix = 2u32;
    while candidate.exists() {
        candidate = root.join(file_name(&format!("{}_{}", base, suffix)));
        suffix += 1;
    }
    candidate
}
