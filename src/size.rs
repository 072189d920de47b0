use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{IoContext, Result};

/// Total size in bytes of a file, or of every file below a directory
pub fn path_size(path: &Path) -> Result<u64> {
    let metadata = fs::metadata(path)
        .io_context(|| format!("Failed to read metadata: {}", path.display()))?;

    if !metadata.is_dir() {
        return Ok(metadata.len());
    }

    let mut total = 0u64;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }

        // Symlinks count with the size of what they point at
        let len = fs::metadata(entry.path())
            .map(|m| if m.is_file() { m.len() } else { 0 })
            .unwrap_or(0);
        total += len;
    }

    Ok(total)
}

/// Format a byte size into human-readable format, e.g. "1.5 KB"
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }

    format!("{:.1} TB", size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_size_bytes() {
        assert_eq!(format_size(0), "0.0 B");
        assert_eq!(format_size(1023), "1023.0 B");
    }

    #[test]
    fn test_format_size_kilobytes() {
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
    }

    #[test]
    fn test_format_size_megabytes_and_gigabytes() {
        assert_eq!(format_size(1024 * 1024 * 5), "5.0 MB");
        assert_eq!(format_size(1073741824), "1.0 GB");
    }

    #[test]
    fn test_format_size_stops_at_terabytes() {
        assert_eq!(format_size(1024u64.pow(4)), "1.0 TB");
        assert_eq!(format_size(1024u64.pow(5)), "1024.0 TB");
    }

    #[test]
    fn test_path_size_single_file() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("a.bin");
        fs::write(&file_path, vec![0u8; 321]).unwrap();

        assert_eq!(path_size(&file_path).unwrap(), 321);
    }

    #[test]
    fn test_path_size_recursive_directory() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("x/y")).unwrap();
        fs::write(root.join("one.txt"), b"12345").unwrap();
        fs::write(root.join("x/two.txt"), b"1234567890").unwrap();
        fs::write(root.join("x/y/three.txt"), b"12").unwrap();

        assert_eq!(path_size(root).unwrap(), 17);
    }

    #[test]
    fn test_path_size_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(path_size(temp_dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_path_size_missing_path() {
        let temp_dir = TempDir::new().unwrap();
        assert!(path_size(&temp_dir.path().join("missing")).is_err());
    }
}
