mod archive;
mod backup;
mod cli;
mod config;
mod error;
mod exclusion;
mod fs_utils;
mod history;
mod job;
mod mirror;
mod progress;
mod restore;
mod size;
mod worker;

pub mod logging;

// Re-export public APIs
pub use archive::{ArchiveWriter, ARCHIVE_EXTENSION, entry_name};
pub use backup::{BackupOrchestrator, RunOutcome, artifact_base_name, unique_artifact_path};
pub use cli::{Cli, Commands};
pub use config::{Config, CONFIG_FILENAME, DEFAULT_CONFIG, HISTORY_FILENAME, cap_compression_level, write_default_config};
pub use error::{BackupError, Result};
pub use exclusion::{ExclusionSet, extension_of, should_include};
pub use history::{BackupRecord, BackupStatus, HistoryLedger, RemovalPolicy, HISTORY_CAPACITY};
pub use job::{BackupJob, CancelFlag, RunGuard, RunningFlag, Traversal};
pub use mirror::copy_tree;
pub use progress::{ChannelReporter, LogReporter, NullReporter, Progress, ProgressConfig, Reporter, Spinner, Timer};
pub use restore::{RestoreStats, restore};
pub use size::{format_size, path_size};
pub use worker::{BackupWorker, WorkerHandle};
