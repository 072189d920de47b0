use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use crate::error::{BackupError, IoContext, Result};
use crate::fs_utils;
use crate::history::{BackupRecord, BackupStatus};
use crate::progress::{Progress, Reporter};

/// Statistics from a restore operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreStats {
    pub files: usize,
    /// Archive entries refused because their path escapes the target
    pub skipped: usize,
}

/// Put a recorded backup back onto disk at `target`.
///
/// Archives are extracted into `target`, creating it if needed. A mirrored
/// directory replaces `target` entirely. Nothing is rolled back on failure.
pub fn restore(record: &BackupRecord, target: &Path, reporter: &dyn Reporter) -> Result<RestoreStats> {
    let artifact = PathBuf::from(&record.artifact_path);

    if record.status != BackupStatus::Succeeded {
        tracing::warn!("Backup {} did not succeed ({}); restoring it anyway", record.id, record.status);
    }

    reporter.report(Progress::Restoring {
        id: record.id,
        target: target.display().to_string(),
    });

    let result = if record.is_archive() {
        extract_archive(&artifact, target, reporter)
    }
    else {
        replace_directory(&artifact, target)
    };

    let stats = result.map_err(|e| failure(&artifact, e))?;

    tracing::info!("Restored backup {} to {} ({} file(s))", record.id, target.display(), stats.files);
    reporter.report(Progress::Restored { files: stats.files });

    Ok(stats)
}

fn failure(artifact: &Path, error: BackupError) -> BackupError {
    match error {
        BackupError::RestoreFailure { .. } => error,
        other => BackupError::RestoreFailure {
            artifact: artifact.to_path_buf(),
            reason: other.to_string(),
        },
    }
}

fn missing(artifact: &Path) -> BackupError {
    BackupError::RestoreFailure {
        artifact: artifact.to_path_buf(),
        reason: "backup artifact no longer exists".to_string(),
    }
}

fn extract_archive(artifact: &Path, target: &Path, reporter: &dyn Reporter) -> Result<RestoreStats> {
    if !artifact.is_file() {
        return Err(missing(artifact));
    }

    let file = File::open(artifact)
        .io_context(|| format!("Failed to open archive: {}", artifact.display()))?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    fs_utils::ensure_dir(target)?;

    let mut stats = RestoreStats::default();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();

        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            tracing::warn!("Skipping archive entry outside the target: {}", name);
            stats.skipped += 1;
            continue;
        };
        let out_path = target.join(relative);

        if entry.is_dir() {
            fs_utils::ensure_dir(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs_utils::ensure_dir(parent)?;
        }

        let mut out = File::create(&out_path)
            .io_context(|| format!("Failed to create file: {}", out_path.display()))?;
        io::copy(&mut entry, &mut out)
            .io_context(|| format!("Failed to extract {}", name))?;

        if let Some(mode) = entry.unix_mode() {
            fs_utils::set_file_mode(&out_path, mode & 0o7777)?;
        }

        stats.files += 1;
        reporter.report(Progress::Extracted(name));
    }

    Ok(stats)
}

fn replace_directory(artifact: &Path, target: &Path) -> Result<RestoreStats> {
    if !artifact.is_dir() {
        return Err(missing(artifact));
    }

    // Refuse targets that contain the backup or lie inside it
    let artifact_real = fs::canonicalize(artifact)
        .io_context(|| format!("Failed to resolve {}", artifact.display()))?;
    let target_real = resolve(target);
    if artifact_real.starts_with(&target_real) || target_real.starts_with(&artifact_real) {
        return Err(BackupError::RestoreFailure {
            artifact: artifact.to_path_buf(),
            reason: format!("restore target {} overlaps the backup directory", target.display()),
        });
    }

    if target.exists() {
        tracing::debug!("Removing existing restore target {}", target.display());
        fs_utils::remove_path(target)?;
    }

    let files = fs_utils::copy_dir_all(artifact, target)?;

    Ok(RestoreStats { files, skipped: 0 })
}

/// Absolute form of a path whose tail may not exist yet, with symlinks in
/// the existing part resolved
fn resolve(path: &Path) -> PathBuf {
    if let Ok(real) = fs::canonicalize(path) {
        return real;
    }

    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => resolve(parent).join(name),
        _ => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}
