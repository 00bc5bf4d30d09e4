//! Handle-based atomic filesystem primitives.
//!
//! Everything above this layer (cache insert/evict, app directory swaps) is built
//! from "open for move, then move by handle". Path-based rename APIs are not used
//! for anything that must be atomic: on Windows they silently degrade to
//! copy+delete when a plain rename is not possible.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::errors::FsError;
use crate::platform::{self, DirReadLock, MoveHandle};

use super::delete::force_delete_directory;

/// The primitive operations the cache and the install transaction are built from.
///
/// `NativeFs` is the real implementation; the trait exists so callers can wrap it
/// (e.g. to inject failures) without touching the algorithms built on top.
pub trait AtomicFsOps {
    /// Open a file or directory with delete access. Fails with `NotFound` if the
    /// path does not exist, `InUse` if an incompatible handle is held elsewhere.
    fn open_for_move(&self, path: &Path) -> Result<MoveHandle, FsError>;

    /// Rename the object referenced by `handle` to `dest`.
    ///
    /// `TargetExists` if `dest` exists and `replace` is false; `AccessDenied` if the
    /// destination, or an entry inside a moved directory, is open elsewhere.
    fn move_by_handle(&self, handle: &mut MoveHandle, dest: &Path, replace: bool) -> Result<(), FsError>;

    /// Open a directory so that others can still read it, but not move or delete it.
    fn open_directory_read_lock(&self, path: &Path) -> Result<DirReadLock, FsError>;

    /// Recursively delete `path`, clearing read-only attributes as needed.
    /// A missing path is not an error.
    fn force_delete_directory_tree(&self, path: &Path) -> Result<(), FsError> {
        force_delete_directory(path).map(|_| ())
    }

    fn move_atomically(&self, src: &Path, dest: &Path) -> Result<(), FsError> {
        let mut handle = self.open_for_move(src)?;
        self.move_by_handle(&mut handle, dest, false)
    }

    /// Attempt to move `src` to `dest`. `Ok(false)` if the directory (or something
    /// inside it) is locked.
    ///
    /// If `dest` itself is locked, this reports `Ok(false)` as well; the two cases
    /// cannot be told apart.
    fn move_directory_unlocked(&self, src: &Path, dest: &Path) -> Result<bool, FsError> {
        let mut handle = match self.open_for_move(src) {
            Ok(h) => h,
            Err(FsError::InUse(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        match self.move_by_handle(&mut handle, dest, false) {
            Ok(()) => Ok(true),
            Err(FsError::AccessDenied(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// True if the directory or any entry inside it is locked by another process.
    ///
    /// Detection only: moves the directory onto itself, which fails when anything
    /// inside is open and is a no-op otherwise.
    fn is_directory_locked(&self, path: &Path) -> Result<bool, FsError> {
        let locked = !self.move_directory_unlocked(path, path)?;
        trace!(path = %path.display(), locked, "directory lock probe");
        Ok(locked)
    }

    /// It is not possible to atomically delete a directory. Instead, move it to
    /// `scratch` (which must be on the same volume) and delete it there.
    fn delete_directory_atomically(&self, src: &Path, scratch: &Path) -> Result<(), FsError> {
        self.move_atomically(src, scratch)?;
        self.force_delete_directory_tree(scratch)
    }

    /// Like `delete_directory_atomically`, but a missing `src` returns `Ok(false)`.
    fn ensure_delete_directory_atomically(&self, src: &Path, scratch: &Path) -> Result<bool, FsError> {
        match self.move_atomically(src, scratch) {
            Ok(()) => {}
            Err(FsError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        }
        self.force_delete_directory_tree(scratch)?;
        Ok(true)
    }

    /// Files below `dir` that cannot currently be opened for moving.
    fn locked_entries(&self, dir: &Path) -> Result<Vec<PathBuf>, FsError> {
        let mut locked = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            match self.open_for_move(entry.path()) {
                Err(FsError::InUse(p)) => locked.push(p),
                // vanished or unreadable entries are not "locked"
                _ => {}
            }
        }
        debug!(dir = %dir.display(), count = locked.len(), "listed locked entries");
        Ok(locked)
    }
}

/// The platform implementation (see `crate::platform`).
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFs;

impl AtomicFsOps for NativeFs {
    fn open_for_move(&self, path: &Path) -> Result<MoveHandle, FsError> {
        platform::open_for_move(path)
    }

    fn move_by_handle(&self, handle: &mut MoveHandle, dest: &Path, replace: bool) -> Result<(), FsError> {
        let src = handle.path().to_path_buf();
        platform::move_by_handle(handle, dest, replace)?;
        trace!(src = %src.display(), dest = %dest.display(), "moved by handle");
        Ok(())
    }

    fn open_directory_read_lock(&self, path: &Path) -> Result<DirReadLock, FsError> {
        platform::open_directory_read_lock(path)
    }
}
