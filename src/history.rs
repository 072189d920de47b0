use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::archive::ARCHIVE_EXTENSION;
use crate::error::{BackupError, IoContext, Result};
use crate::exclusion::ExclusionSet;
use crate::fs_utils;
use crate::size::format_size;

/// Maximum number of records kept in the ledger
pub const HISTORY_CAPACITY: usize = 50;

/// Terminal state of a backup run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BackupStatus::Succeeded => "succeeded",
            BackupStatus::Failed => "failed",
            BackupStatus::Cancelled => "cancelled",
        };
        f.pad(label)
    }
}

/// Outcome of one backup run as stored in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Assigned by the ledger when the record is added
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub source_path: String,
    pub artifact_path: String,
    pub status: BackupStatus,
    pub size_bytes: u64,
    pub elapsed_seconds: f64,
    pub compressed: bool,
    #[serde(default)]
    pub exclusions: ExclusionSet,
    /// Failure description, only for failed runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackupRecord {
    /// Create a record stamped with the current time; the id is assigned by the ledger
    pub fn new(
        source_path: &Path,
        artifact_path: &Path,
        status: BackupStatus,
        compressed: bool,
        exclusions: ExclusionSet,
    ) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            source_path: source_path.display().to_string(),
            artifact_path: artifact_path.display().to_string(),
            status,
            size_bytes: 0,
            elapsed_seconds: 0.0,
            compressed,
            exclusions,
            error: None,
        }
    }

    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    pub fn with_elapsed(mut self, elapsed_seconds: f64) -> Self {
        self.elapsed_seconds = elapsed_seconds;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Whether the artifact is a zip file rather than a mirrored directory
    pub fn is_archive(&self) -> bool {
        Path::new(&self.artifact_path)
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
    }

    pub fn human_size(&self) -> String {
        format_size(self.size_bytes)
    }

    /// One table row for history listings
    pub fn display(&self) -> String {
        format!(
            "{:>4}  {:<19}  {:<10} {:>10}  {}",
            self.id,
            self.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
            self.status,
            self.human_size(),
            self.artifact_path
        )
    }

    /// Multi-line description of every field
    pub fn details(&self) -> String {
        let mut out = format!(
            "Backup {}\n\n\
             Date:        {}\n\
             Source:      {}\n\
             Artifact:    {}\n\
             Status:      {}\n\
             Size:        {}\n\
             Time:        {:.2}s\n\
             Compressed:  {}\n\
             Excluded:    {}\n",
            self.id,
            self.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
            self.source_path,
            self.artifact_path,
            self.status,
            self.human_size(),
            self.elapsed_seconds,
            if self.compressed { "yes" } else { "no" },
            self.exclusions,
        );
        if let Some(ref error) = self.error {
            out.push_str(&format!("Error:       {}\n", error));
        }
        out
    }
}

/// What `remove_by_id` deletes from disk besides the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemovalPolicy {
    /// Delete archive files, leave mirrored directories alone
    #[default]
    ArchivesOnly,
    /// Delete archives and mirrored directories
    AllArtifacts,
}

/// On-disk layout of the ledger file
#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    next_id: u64,
    records: Vec<BackupRecord>,
}

/// Older files stored the records as a bare array
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredLedger {
    Current(LedgerFile),
    Legacy(Vec<BackupRecord>),
}

/// Bounded, insertion-ordered store of backup records persisted as JSON
#[derive(Debug)]
pub struct HistoryLedger {
    path: PathBuf,
    records: VecDeque<BackupRecord>,
    next_id: u64,
    policy: RemovalPolicy,
}

impl HistoryLedger {
    /// Load the ledger, falling back to an empty one when the file is absent or corrupt
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::try_open(&path) {
            Ok(ledger) => ledger,
            Err(e) => {
                tracing::warn!("{}; starting with an empty history", e);
                Self::empty(path)
            }
        }
    }

    /// Load the ledger, reporting a malformed file as `LedgerCorrupt`
    pub fn try_open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !path.exists() {
            return Ok(Self::empty(path));
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| BackupError::LedgerCorrupt(format!("{}: {}", path.display(), e)))?;

        let stored: StoredLedger = serde_json::from_str(&content)
            .map_err(|e| BackupError::LedgerCorrupt(format!("{}: {}", path.display(), e)))?;

        let (records, stored_next) = match stored {
            StoredLedger::Current(file) => (file.records, file.next_id),
            StoredLedger::Legacy(records) => (records, 1),
        };

        let max_id = records.iter().map(|r| r.id).max().unwrap_or(0);
        let mut records: VecDeque<BackupRecord> = records.into();
        while records.len() > HISTORY_CAPACITY {
            records.pop_front();
        }

        Ok(Self {
            path,
            records,
            next_id: stored_next.max(max_id + 1),
            policy: RemovalPolicy::default(),
        })
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            records: VecDeque::new(),
            next_id: 1,
            policy: RemovalPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RemovalPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Id the next added record will receive
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Append a record, evicting the oldest one past capacity, and persist.
    ///
    /// The record stays in memory even when persisting fails.
    pub fn add(&mut self, mut record: BackupRecord) -> Result<u64> {
        let id = self.next_id;
        self.next_id += 1;
        record.id = id;

        self.records.push_back(record);
        while self.records.len() > HISTORY_CAPACITY {
            if let Some(evicted) = self.records.pop_front() {
                tracing::debug!("Evicted backup record {} from history", evicted.id);
            }
        }

        self.save()?;
        Ok(id)
    }

    /// Remove a record and, depending on the removal policy, its artifact.
    /// Returns false when no record has that id.
    pub fn remove_by_id(&mut self, id: u64) -> Result<bool> {
        let policy = self.policy;
        self.remove_with(id, policy)
    }

    /// Like `remove_by_id`, with an explicit policy for this call
    pub fn remove_with(&mut self, id: u64, policy: RemovalPolicy) -> Result<bool> {
        let Some(index) = self.records.iter().position(|r| r.id == id) else {
            return Ok(false);
        };

        if let Some(record) = self.records.remove(index) {
            delete_artifact(&record, policy);
        }

        self.save()?;
        Ok(true)
    }

    /// Drop every record; artifacts stay on disk
    pub fn clear(&mut self) -> Result<()> {
        self.records.clear();
        self.save()
    }

    /// Remove records created before `cutoff` together with all their artifacts.
    /// Returns the ids that were removed.
    pub fn prune_older_than(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<u64>> {
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .records
            .drain(..)
            .partition(|r| r.timestamp < cutoff);
        self.records = kept.into();

        if expired.is_empty() {
            return Ok(Vec::new());
        }

        for record in &expired {
            delete_artifact(record, RemovalPolicy::AllArtifacts);
        }

        self.save()?;
        Ok(expired.iter().map(|r| r.id).collect())
    }

    /// Records sorted newest first
    pub fn list(&self) -> Vec<&BackupRecord> {
        let mut records: Vec<&BackupRecord> = self.records.iter().collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        records
    }

    /// Records in insertion order, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &BackupRecord> {
        self.records.iter()
    }

    pub fn get(&self, id: u64) -> Option<&BackupRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the whole ledger to disk
    pub fn save(&self) -> Result<()> {
        let file = LedgerFile {
            next_id: self.next_id,
            records: self.records.iter().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs_utils::atomic_write(&self.path, json.as_bytes())
    }
}

fn delete_artifact(record: &BackupRecord, policy: RemovalPolicy) {
    let artifact = Path::new(&record.artifact_path);
    if !artifact.exists() {
        return;
    }

    let wanted = record.is_archive() || policy == RemovalPolicy::AllArtifacts;
    if !wanted {
        tracing::debug!("Keeping directory artifact {}", artifact.display());
        return;
    }

    let result = if artifact.is_dir() {
        fs::remove_dir_all(artifact).io_context(|| format!("Failed to remove {}", artifact.display()))
    }
    else {
        fs::remove_file(artifact).io_context(|| format!("Failed to remove {}", artifact.display()))
    };

    match result {
        Ok(()) => tracing::info!("Deleted backup artifact {}", artifact.display()),
        Err(e) => tracing::warn!("Could not delete backup artifact: {}", e),
    }
}
