use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Invalid source: {0} is missing or not a directory")]
    InvalidSource(PathBuf),

    #[error("Invalid destination: no backup location specified")]
    InvalidDestination,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Restore of {artifact} failed: {reason}")]
    RestoreFailure { artifact: PathBuf, reason: String },

    #[error("History ledger is corrupt: {0}")]
    LedgerCorrupt(String),

    #[error("A backup job is already running")]
    JobAlreadyRunning,

    #[error("No backup record with id {0}")]
    UnknownRecord(u64),

    #[error("Backup worker thread panicked")]
    WorkerPanicked,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;

/// Attach a human-readable context to an I/O error
pub(crate) trait IoContext<T> {
    fn io_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| BackupError::Io {
            context: context(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_context_wraps_error() {
        let result: io::Result<()> = Err(io::Error::new(io::ErrorKind::NotFound, "gone"));
        let err = result.io_context(|| "Failed to open a.txt".to_string()).unwrap_err();

        assert!(matches!(err, BackupError::Io { .. }));
        assert_eq!(err.to_string(), "Failed to open a.txt: gone");
    }

    #[test]
    fn test_io_context_passes_ok_through() {
        let result: io::Result<u32> = Ok(7);
        assert_eq!(result.io_context(|| unreachable!()).unwrap(), 7);
    }

    #[test]
    fn test_invalid_source_message() {
        let err = BackupError::InvalidSource(PathBuf::from("/nope"));
        assert!(err.to_string().contains("/nope"));
    }
}
