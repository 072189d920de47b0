use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::backup::{BackupOrchestrator, RunOutcome};
use crate::error::{BackupError, IoContext, Result};
use crate::job::{BackupJob, CancelFlag};
use crate::progress::ChannelReporter;

/// Starts backup runs on a background thread
pub struct BackupWorker;

impl BackupWorker {
    /// Validate the job and claim the orchestrator before spawning, so a second
    /// request fails here with `JobAlreadyRunning` rather than on the worker.
    pub fn spawn(orchestrator: Arc<BackupOrchestrator>, job: BackupJob) -> Result<WorkerHandle> {
        job.validate()?;
        let guard = orchestrator.running_flag().try_acquire()?;

        let (sender, receiver) = mpsc::channel();
        let cancel = job.cancel.clone();

        let thread = thread::Builder::new()
            .name("burrow-backup".to_string())
            .spawn(move || {
                let reporter = ChannelReporter::new(sender);
                orchestrator.run_reserved(guard, job, &reporter)
            })
            .io_context(|| "Failed to start backup worker".to_string())?;

        Ok(WorkerHandle {
            cancel,
            lines: receiver,
            thread,
        })
    }
}

/// Control-side handle to a running backup
pub struct WorkerHandle {
    cancel: CancelFlag,
    lines: Receiver<String>,
    thread: JoinHandle<Result<RunOutcome>>,
}

impl WorkerHandle {
    /// Ask the worker to stop at its next poll point
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Progress lines in processing order; blocks until the worker is done
    pub fn lines(&self) -> mpsc::Iter<'_, String> {
        self.lines.iter()
    }

    /// Wait up to `timeout` for the next progress line.
    /// Returns `None` on timeout or once the worker has finished.
    pub fn next_line(&self, timeout: Duration) -> Option<String> {
        self.lines.recv_timeout(timeout).ok()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the run to end and return its outcome
    pub fn join(self) -> Result<RunOutcome> {
        match self.thread.join() {
            Ok(result) => result,
            Err(_) => Err(BackupError::WorkerPanicked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusion::ExclusionSet;
    use crate::history::{BackupStatus, HistoryLedger};
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn setup(temp_dir: &TempDir) -> (Arc<BackupOrchestrator>, BackupJob) {
        let source = temp_dir.path().join("src");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("a.txt"), b"0123456789").unwrap();
        fs::write(source.join("b.tmp"), b"12345").unwrap();

        let ledger = HistoryLedger::open(temp_dir.path().join("backup_history.json"));
        let orchestrator = Arc::new(BackupOrchestrator::new(Arc::new(Mutex::new(ledger))));
        let job = BackupJob::new(&source, temp_dir.path().join("out")).exclusions(ExclusionSet::parse(".tmp"));

        (orchestrator, job)
    }

    #[test]
    fn test_worker_streams_lines_and_records() {
        let temp_dir = TempDir::new().unwrap();
        let (orchestrator, job) = setup(&temp_dir);

        let handle = BackupWorker::spawn(orchestrator.clone(), job).unwrap();
        let lines: Vec<String> = handle.lines().collect();
        let outcome = handle.join().unwrap();

        assert_eq!(outcome.status(), BackupStatus::Succeeded);
        assert!(lines.iter().all(|l| l.starts_with('[')));
        assert!(lines.iter().any(|l| l.ends_with("Added: a.txt")));
        assert!(lines.iter().any(|l| l.ends_with("Excluded: b.tmp")));
        assert!(lines.last().unwrap().contains("Backup complete!"));
        assert_eq!(orchestrator.ledger().lock().unwrap().len(), 1);
        assert!(!orchestrator.is_running());
    }

    #[test]
    fn test_next_line_drains_then_stops() {
        let temp_dir = TempDir::new().unwrap();
        let (orchestrator, job) = setup(&temp_dir);

        let handle = BackupWorker::spawn(orchestrator, job).unwrap();
        let mut lines = Vec::new();
        loop {
            match handle.next_line(Duration::from_millis(50)) {
                Some(line) => lines.push(line),
                None if handle.is_finished() => break,
                None => {}
            }
        }

        assert!(lines.first().unwrap().contains("Backup started"));
        assert!(lines.last().unwrap().contains("Backup complete!"));
        assert_eq!(handle.next_line(Duration::from_millis(10)), None);
        assert_eq!(handle.join().unwrap().status(), BackupStatus::Succeeded);
    }

    #[test]
    fn test_worker_cancelled_before_start() {
        let temp_dir = TempDir::new().unwrap();
        let (orchestrator, job) = setup(&temp_dir);
        job.cancel.cancel();

        let handle = BackupWorker::spawn(orchestrator.clone(), job).unwrap();
        let outcome = handle.join().unwrap();

        assert_eq!(outcome.status(), BackupStatus::Cancelled);
        assert!(!outcome.recorded);
        assert!(!Path::new(&outcome.record.artifact_path).exists());
        assert!(orchestrator.ledger().lock().unwrap().is_empty());
    }

    #[test]
    fn test_worker_rejects_second_job() {
        let temp_dir = TempDir::new().unwrap();
        let (orchestrator, job) = setup(&temp_dir);
        let guard = orchestrator.running_flag().try_acquire().unwrap();

        let result = BackupWorker::spawn(orchestrator.clone(), job.clone());
        assert!(matches!(result, Err(BackupError::JobAlreadyRunning)));

        drop(guard);
        let handle = BackupWorker::spawn(orchestrator, job).unwrap();
        assert_eq!(handle.join().unwrap().status(), BackupStatus::Succeeded);
    }

    #[test]
    fn test_worker_invalid_source_rejected_synchronously() {
        let temp_dir = TempDir::new().unwrap();
        let (orchestrator, _job) = setup(&temp_dir);
        let job = BackupJob::new(temp_dir.path().join("missing"), temp_dir.path().join("out"));

        let result = BackupWorker::spawn(orchestrator.clone(), job);

        assert!(matches!(result, Err(BackupError::InvalidSource(_))));
        assert!(!orchestrator.is_running());
    }

    #[test]
    fn test_handle_cancel_sets_job_flag() {
        let temp_dir = TempDir::new().unwrap();
        let (orchestrator, job) = setup(&temp_dir);
        let flag = job.cancel.clone();

        let handle = BackupWorker::spawn(orchestrator, job).unwrap();
        handle.cancel();

        assert!(flag.is_cancelled());
        assert!(handle.is_cancelled());
        let outcome = handle.join().unwrap();
        assert_ne!(outcome.status(), BackupStatus::Failed);
    }
}
