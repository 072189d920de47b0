use std::fs;
use std::path::Path;

use crate::error::{IoContext, Result};
use crate::exclusion::{self, ExclusionSet};
use crate::fs_utils;
use crate::job::{CancelFlag, Traversal};
use crate::progress::{Progress, Reporter};

/// Mirror the top-level entries of `source` into the existing `destination` directory.
///
/// Subdirectories are copied wholesale, exclusions apply to top-level files only.
/// A destination nested anywhere inside `source` is left out of the copy.
/// The cancel flag is polled before the first entry and after each entry; on
/// cancellation the whole destination tree is removed.
pub fn copy_tree(
    source: &Path,
    destination: &Path,
    exclusions: &ExclusionSet,
    cancel: &CancelFlag,
    reporter: &dyn Reporter,
) -> Result<Traversal> {
    let mut copied = 0usize;

    if cancel.is_cancelled() {
        return abandon(destination, copied, reporter);
    }

    let own_path = fs::canonicalize(destination).ok();

    let entries = fs::read_dir(source)
        .io_context(|| format!("Failed to read directory: {}", source.display()))?;

    for entry in entries {
        let entry = entry.io_context(|| format!("Failed to read directory: {}", source.display()))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let target = destination.join(entry.file_name());

        if path.is_dir() {
            if fs::canonicalize(&path).ok() == own_path {
                tracing::debug!("Skipping backup destination inside source: {}", path.display());
                continue;
            }

            copied += fs_utils::copy_dir_skipping(&path, &target, own_path.as_deref())?;
            reporter.report(Progress::CopiedDirectory(name));
        }
        else if exclusion::should_include(&name, exclusions) {
            fs_utils::copy_file_preserving(&path, &target)?;
            copied += 1;
            reporter.report(Progress::CopiedFile(name));
        }
        else {
            reporter.report(Progress::Excluded(name));
        }

        if cancel.is_cancelled() {
            return abandon(destination, copied, reporter);
        }
    }

    Ok(Traversal::Completed { files: copied })
}

fn abandon(destination: &Path, copied: usize, reporter: &dyn Reporter) -> Result<Traversal> {
    reporter.report(Progress::Cancelling);
    if destination.exists() {
        fs::remove_dir_all(destination)
            .io_context(|| format!("Failed to remove cancelled copy: {}", destination.display()))?;
    }
    Ok(Traversal::Cancelled { files: copied })
}
