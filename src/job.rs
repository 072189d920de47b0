use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{BackupError, IoContext, Result};
use crate::exclusion::ExclusionSet;

/// Cooperative cancellation signal shared between the control thread and the worker
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running job to stop at its next poll point
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Cancel on the first SIGINT. A second SIGINT while the flag is set
    /// terminates the process with exit code 1.
    pub fn cancel_on_interrupt(&self) -> Result<()> {
        use signal_hook::consts::SIGINT;
        use signal_hook::flag;

        flag::register_conditional_shutdown(SIGINT, 1, self.0.clone())
            .io_context(|| "Failed to install interrupt handler".to_string())?;
        flag::register(SIGINT, self.0.clone())
            .io_context(|| "Failed to install interrupt handler".to_string())?;

        Ok(())
    }
}

/// Marks that a job is in progress; at most one holder at a time
#[derive(Debug, Clone, Default)]
pub struct RunningFlag(Arc<AtomicBool>);

impl RunningFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag, or `JobAlreadyRunning` if another job holds it
    pub fn try_acquire(&self) -> Result<RunGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BackupError::JobAlreadyRunning)?;

        Ok(RunGuard(self.0.clone()))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Clears the running flag when dropped, whatever the outcome of the run
#[derive(Debug)]
pub struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// How an archive or mirror traversal ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    Completed { files: usize },
    Cancelled { files: usize },
}

impl Traversal {
    /// Files written before the traversal stopped
    pub fn files(&self) -> usize {
        match self {
            Traversal::Completed { files } | Traversal::Cancelled { files } => *files,
        }
    }
}

/// One backup request
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub source: PathBuf,
    pub destination_root: PathBuf,
    pub compress: bool,
    pub exclusions: ExclusionSet,
    pub cancel: CancelFlag,
    /// Deflate level 0-9, library default when unset
    pub compression_level: Option<u32>,
}

impl BackupJob {
    pub fn new(source: impl Into<PathBuf>, destination_root: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination_root: destination_root.into(),
            compress: true,
            exclusions: ExclusionSet::default(),
            cancel: CancelFlag::new(),
            compression_level: None,
        }
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn exclusions(mut self, exclusions: ExclusionSet) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn compression_level(mut self, level: Option<u32>) -> Self {
        self.compression_level = level;
        self
    }

    /// Check the preconditions that must hold before any I/O happens
    pub fn validate(&self) -> Result<()> {
        if self.source.as_os_str().is_empty() || !self.source.is_dir() {
            return Err(BackupError::InvalidSource(self.source.clone()));
        }

        if self.destination_root.as_os_str().is_empty() {
            return Err(BackupError::InvalidDestination);
        }

        Ok(())
    }

    /// Name of the directory being backed up, used in the artifact name
    pub fn source_name(&self) -> String {
        let resolved = fs::canonicalize(&self.source).unwrap_or_else(|_| self.source.clone());
        basename(&resolved)
    }
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cancel_flag_shared_between_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());

        flag.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    #[cfg(unix)]
    fn test_interrupt_sets_cancel_flag() {
        let flag = CancelFlag::new();
        flag.cancel_on_interrupt().unwrap();
        assert!(!flag.is_cancelled());

        signal_hook::low_level::raise(signal_hook::consts::SIGINT).unwrap();

        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_running_flag_single_holder() {
        let running = RunningFlag::new();
        let guard = running.try_acquire().unwrap();
        assert!(running.is_running());

        let second = running.try_acquire();
        assert!(matches!(second, Err(BackupError::JobAlreadyRunning)));

        drop(guard);
        assert!(!running.is_running());
        assert!(running.try_acquire().is_ok());
    }

    #[test]
    fn test_running_flag_cleared_across_threads() {
        let running = RunningFlag::new();
        let guard = running.try_acquire().unwrap();

        std::thread::spawn(move || drop(guard)).join().unwrap();

        assert!(!running.is_running());
    }

    #[test]
    fn test_validate_missing_source() {
        let temp_dir = TempDir::new().unwrap();
        let job = BackupJob::new(temp_dir.path().join("missing"), temp_dir.path());

        assert!(matches!(job.validate(), Err(BackupError::InvalidSource(_))));
    }

    #[test]
    fn test_validate_source_is_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("f.txt");
        fs::write(&file, b"x").unwrap();

        let job = BackupJob::new(&file, temp_dir.path());
        assert!(matches!(job.validate(), Err(BackupError::InvalidSource(_))));
    }

    #[test]
    fn test_validate_empty_destination() {
        let temp_dir = TempDir::new().unwrap();
        let job = BackupJob::new(temp_dir.path(), "");

        assert!(matches!(job.validate(), Err(BackupError::InvalidDestination)));
    }

    #[test]
    fn test_validate_ok() {
        let temp_dir = TempDir::new().unwrap();
        let job = BackupJob::new(temp_dir.path(), temp_dir.path().join("out"));
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_source_name_resolves_dot() {
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("project");
        fs::create_dir(&project).unwrap();

        let job = BackupJob::new(project.join("."), temp_dir.path());
        assert_eq!(job.source_name(), "project");
    }

    #[test]
    fn test_builder_defaults() {
        let job = BackupJob::new("/src", "/dst");
        assert!(job.compress);
        assert!(job.exclusions.is_empty());
        assert!(!job.cancel.is_cancelled());
        assert_eq!(job.compression_level, None);

        let job = job.compress(false).compression_level(Some(9));
        assert!(!job.compress);
        assert_eq!(job.compression_level, Some(9));
    }
}
