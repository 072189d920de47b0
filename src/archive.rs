use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{IoContext, Result};
use crate::exclusion::{self, ExclusionSet};
use crate::job::{CancelFlag, Traversal};
use crate::progress::{Progress, Reporter};

const BUFFER_SIZE: usize = 64 * 1024;
const MAX_DEFLATE_LEVEL: u32 = 9;

/// Extension given to archive artifacts
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Writes a source tree into a deflate-compressed zip file
#[derive(Debug, Clone, Default)]
pub struct ArchiveWriter {
    /// Deflate level 0-9, library default when unset
    compression_level: Option<u32>,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression(compression_level: Option<u32>) -> Self {
        Self { compression_level }
    }

    /// Archive every non-excluded file below `source` into `archive_path`.
    ///
    /// The cancel flag is polled before each file. On cancellation the partial
    /// archive is deleted; on an I/O error it is left in place.
    pub fn write(
        &self,
        source: &Path,
        archive_path: &Path,
        exclusions: &ExclusionSet,
        cancel: &CancelFlag,
        reporter: &dyn Reporter,
    ) -> Result<Traversal> {
        let file = File::create(archive_path)
            .io_context(|| format!("Failed to create archive: {}", archive_path.display()))?;
        let mut zip = ZipWriter::new(file);

        // The archive may live inside the tree being archived
        let own_path = fs::canonicalize(archive_path).ok();
        let own_name = archive_path.file_name().map(|n| n.to_os_string());

        let mut written = 0usize;

        for entry in WalkDir::new(source).follow_links(false) {
            let entry = entry?;
            let path = entry.path();

            if entry.file_type().is_dir() {
                continue;
            }

            if entry.file_type().is_symlink() && !path.is_file() {
                tracing::debug!("Skipping symlink to directory: {}", path.display());
                continue;
            }

            if own_name.as_deref() == Some(entry.file_name())
                && fs::canonicalize(path).ok() == own_path
            {
                continue;
            }

            if cancel.is_cancelled() {
                reporter.report(Progress::Cancelling);
                discard_archive(zip, archive_path)?;
                return Ok(Traversal::Cancelled { files: written });
            }

            let relative = entry_name(path.strip_prefix(source).unwrap_or(path));

            if !exclusion::should_include(&entry.file_name().to_string_lossy(), exclusions) {
                reporter.report(Progress::Excluded(relative));
                continue;
            }

            self.append_file(&mut zip, path, &relative)?;
            written += 1;
            reporter.report(Progress::Added(relative));
        }

        zip.finish()?;
        tracing::debug!("Archive {} finished with {} file(s)", archive_path.display(), written);

        Ok(Traversal::Completed { files: written })
    }

    fn append_file(&self, zip: &mut ZipWriter<File>, path: &Path, name: &str) -> Result<()> {
        let metadata = fs::metadata(path)
            .io_context(|| format!("Failed to read metadata: {}", path.display()))?;

        let mut options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(metadata.len() >= u32::MAX as u64);

        if let Some(level) = self.compression_level {
            options = options.compression_level(Some(level.min(MAX_DEFLATE_LEVEL) as i32));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            options = options.unix_permissions(metadata.permissions().mode() & 0o7777);
        }

        let file = File::open(path)
            .io_context(|| format!("Failed to open file: {}", path.display()))?;
        let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);

        zip.start_file(name, options)?;
        io::copy(&mut reader, zip)
            .io_context(|| format!("Failed to add {} to archive", path.display()))?;

        Ok(())
    }
}

/// Close the writer and delete what was written so far
fn discard_archive(zip: ZipWriter<File>, archive_path: &Path) -> Result<()> {
    drop(zip);
    if archive_path.exists() {
        fs::remove_file(archive_path)
            .io_context(|| format!("Failed to remove cancelled archive: {}", archive_path.display()))?;
    }
    Ok(())
}

/// Archive entry name: path relative to the source root with `/` separators
pub fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
