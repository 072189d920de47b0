use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{IoContext, Result};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Atomically write data to a file using temp file + rename
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .io_context(|| format!("Failed to create parent directory: {}", parent.display()))?;
        }
    }

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let temp_path = parent.join(format!(
        ".burrow_tmp_{}_{}",
        std::process::id(),
        rand_suffix()
    ));

    let mut file = File::create(&temp_path)
        .io_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;

    file.write_all(data)
        .io_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;

    file.sync_all()
        .io_context(|| format!("Failed to sync temp file: {}", temp_path.display()))?;

    drop(file);

    fs::rename(&temp_path, path).io_context(|| {
        let _ = fs::remove_file(&temp_path);
        format!("Failed to rename temp file to: {}", path.display())
    })?;

    Ok(())
}

/// Generate a random suffix for temp files
fn rand_suffix() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    duration.as_nanos() as u64
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .io_context(|| format!("Failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Copy a file, keeping permissions and access/modification times
pub fn copy_file_preserving(src: &Path, dst: &Path) -> Result<u64> {
    let bytes = fs::copy(src, dst)
        .io_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;

    let metadata = fs::metadata(src)
        .io_context(|| format!("Failed to read metadata: {}", src.display()))?;

    let mtime = filetime::FileTime::from_last_modification_time(&metadata);
    let atime = filetime::FileTime::from_last_access_time(&metadata);
    if let Err(e) = filetime::set_file_times(dst, atime, mtime) {
        tracing::debug!("Could not preserve timestamps on {}: {}", dst.display(), e);
    }

    Ok(bytes)
}

/// Recursively copy a directory tree into `dst`, which may not exist yet.
/// Returns the number of files copied.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<usize> {
    copy_dir_skipping(src, dst, None)
}

/// Like [`copy_dir_all`], but never descends into the directory whose
/// canonical path is `skip`.
pub fn copy_dir_skipping(src: &Path, dst: &Path, skip: Option<&Path>) -> Result<usize> {
    let mut copied = 0usize;

    ensure_dir(dst)?;
    // Never descend into the copy being built when it sits inside the source
    let own_path = fs::canonicalize(dst).ok();
    let walker = WalkDir::new(src)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| {
            if !e.file_type().is_dir() {
                return true;
            }
            let real = fs::canonicalize(e.path()).ok();
            real != own_path && (skip.is_none() || real.as_deref() != skip)
        });

    for entry in walker {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .unwrap_or(entry.path());
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        }
        else {
            if let Some(parent) = target.parent() {
                ensure_dir(parent)?;
            }
            copy_file_preserving(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Remove a file or a whole directory tree
pub fn remove_path(path: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(path)
        .io_context(|| format!("Failed to read metadata: {}", path.display()))?;

    if metadata.is_dir() {
        fs::remove_dir_all(path)
            .io_context(|| format!("Failed to remove directory: {}", path.display()))
    }
    else {
        fs::remove_file(path)
            .io_context(|| format!("Failed to remove file: {}", path.display()))
    }
}

/// Set file permissions from mode bits
#[cfg(unix)]
pub fn set_file_mode(path: &Path, mode: u32) -> Result<()> {
    let permissions = fs::Permissions::from_mode(mode);
    fs::set_permissions(path, permissions)
        .io_context(|| format!("Failed to set permissions: {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn set_file_mode(_path: &Path, _mode: u32) -> Result<()> {
    // No-op on Windows
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("history.json");

        atomic_write(&file_path, b"[]").unwrap();

        assert_eq!(fs::read(&file_path).unwrap(), b"[]");
    }

    #[test]
    fn test_atomic_write_overwrites_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("history.json");
        fs::write(&file_path, b"old").unwrap();

        atomic_write(&file_path, b"new").unwrap();

        assert_eq!(fs::read(&file_path).unwrap(), b"new");
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("nested").join("dirs").join("h.json");

        atomic_write(&file_path, b"data").unwrap();

        assert!(file_path.exists());
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        atomic_write(&temp_dir.path().join("h.json"), b"x").unwrap();

        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["h.json"]);
    }

    #[test]
    fn test_ensure_dir_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let dir_path = temp_dir.path().join("a").join("b");

        ensure_dir(&dir_path).unwrap();
        ensure_dir(&dir_path).unwrap();

        assert!(dir_path.is_dir());
    }

    #[test]
    fn test_copy_file_preserving_keeps_mtime() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src.txt");
        let dst = temp_dir.path().join("dst.txt");
        fs::write(&src, b"hello").unwrap();
        filetime::set_file_mtime(&src, filetime::FileTime::from_unix_time(1_234_567_890, 0)).unwrap();

        let bytes = copy_file_preserving(&src, &dst).unwrap();

        assert_eq!(bytes, 5);
        let mtime = filetime::FileTime::from_last_modification_time(&fs::metadata(&dst).unwrap());
        assert_eq!(mtime.unix_seconds(), 1_234_567_890);
    }

    #[test]
    #[cfg(unix)]
    fn test_copy_file_preserving_keeps_mode() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("run.sh");
        let dst = temp_dir.path().join("copy.sh");
        fs::write(&src, b"#!/bin/sh").unwrap();
        set_file_mode(&src, 0o755).unwrap();

        copy_file_preserving(&src, &dst).unwrap();

        let mode = fs::metadata(&dst).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_copy_dir_all() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        fs::create_dir_all(src.join("inner/empty")).unwrap();
        fs::write(src.join("a.txt"), b"a").unwrap();
        fs::write(src.join("inner/b.tmp"), b"b").unwrap();

        let dst = temp_dir.path().join("dst");
        let copied = copy_dir_all(&src, &dst).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"a");
        assert_eq!(fs::read(dst.join("inner/b.tmp")).unwrap(), b"b");
        assert!(dst.join("inner/empty").is_dir());
    }

    #[test]
    fn test_copy_dir_skipping_leaves_out_skipped_dir() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        fs::create_dir_all(src.join("keep")).unwrap();
        fs::create_dir_all(src.join("skip/deeper")).unwrap();
        fs::write(src.join("keep/a.txt"), b"a").unwrap();
        fs::write(src.join("skip/deeper/b.txt"), b"b").unwrap();
        let skip = fs::canonicalize(src.join("skip")).unwrap();

        let dst = temp_dir.path().join("dst");
        let copied = copy_dir_skipping(&src, &dst, Some(&skip)).unwrap();

        assert_eq!(copied, 1);
        assert!(dst.join("keep/a.txt").exists());
        assert!(!dst.join("skip").exists());
    }

    #[test]
    fn test_remove_path_file_and_dir() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("f.zip");
        let dir = temp_dir.path().join("d");
        fs::write(&file, b"z").unwrap();
        fs::create_dir_all(dir.join("x")).unwrap();
        fs::write(dir.join("x/y"), b"y").unwrap();

        remove_path(&file).unwrap();
        remove_path(&dir).unwrap();

        assert!(!file.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_remove_path_missing_is_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(remove_path(&temp_dir.path().join("missing")).is_err());
    }
}
