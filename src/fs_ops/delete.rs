//! Forced recursive deletion.
//! Package archives regularly contain read-only files and directories, which make a
//! plain `remove_dir_all` fail half-way.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::errors::FsError;
use crate::platform::clear_readonly;

/// Clear read-only attributes on `dir` and everything below it.
fn remove_readonly_attributes(dir: &Path) -> bool {
    let mut removed_any = false;
    for entry in WalkDir::new(dir).follow_links(false).into_iter().filter_map(Result::ok) {
        if let Ok(true) = clear_readonly(entry.path()) {
            removed_any = true;
        }
    }
    removed_any
}

/// Recursively delete `dir`, even if it contains read-only entries.
/// Returns `Ok(false)` if it did not exist.
pub fn force_delete_directory(dir: &Path) -> Result<bool, FsError> {
    if let Err(e) = fs::symlink_metadata(dir) {
        if e.kind() == io::ErrorKind::NotFound {
            return Ok(false);
        }
        return Err(FsError::io("stat", dir, e));
    }

    loop {
        match fs::remove_dir_all(dir) {
            Ok(()) => return Ok(true),
            // deleted concurrently, or the last entries went away between two attempts
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => {
                // a read-only entry (or the read-only top-level directory) is the
                // usual cause; anything else is reported as-is
                if remove_readonly_attributes(dir) {
                    debug!(path = %dir.display(), "cleared read-only attributes, retrying delete");
                    continue;
                }
                return Err(FsError::io("delete directory", dir, e));
            }
        }
    }
}
