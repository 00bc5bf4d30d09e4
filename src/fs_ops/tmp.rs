//! Scratch path allocation.
//! Atomic moves only work within one volume, so every scratch path is allocated
//! inside a directory the caller knows to share a volume with the move target.

use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Returns `base/<random-128-bit-id>`. The directory is not created.
pub fn new_scratch_path(base: &Path) -> PathBuf {
    let path = base.join(Uuid::new_v4().to_string());
    // the chance is very small...
    debug_assert!(std::fs::symlink_metadata(&path).is_err());
    path
}

/// A directory for temporary files on the same volume as some other directory.
#[derive(Debug, Clone)]
pub struct TmpDirectory {
    path: PathBuf,
}

impl TmpDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn temporary_path(&self) -> PathBuf {
        new_scratch_path(&self.path)
    }
}
