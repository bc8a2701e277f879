//! Helpers around the single pinned clock of a build. The host wall clock is
//! never read here or anywhere else in the core; every emitted timestamp
//! derives from the recipe's declared instant.

use std::path::Path;

use chrono::{DateTime, Utc};
use filetime::FileTime;
use walkdir::WalkDir;

use crate::Result;

/// Sets access and modification times of `root` and everything below it to
/// `when`. Symlinks are retimed themselves, not their targets.
pub fn pin_mtimes(root: &Path, when: DateTime<Utc>) -> Result<()> {
    let pinned = FileTime::from_unix_time(when.timestamp(), 0);

    for entry in WalkDir::new(root).contents_first(true) {
        let entry = entry.map_err(|e| {
            e.into_io_error()
                .unwrap_or_else(|| std::io::Error::other("walk stopped on a loop"))
        })?;
        filetime::set_symlink_file_times(entry.path(), pinned, pinned)?;
    }

    Ok(())
}
