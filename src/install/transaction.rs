//! Crash-recoverable replacement of a package's `app` directory.
//!
//! There is no API to atomically swap two directories, so the live directory is first
//! moved to a backup slot and the new one moved in. Between the two moves the package
//! has no `app` directory; a crash there leaves the backup behind, and `recover`
//! restores it on the next run.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::paths::PackagePaths;
use super::waiter::{LockedFileWaiter, WaitDecision};
use crate::errors::{FsError, TransactionError};
use crate::fs_ops::{force_delete_directory, AtomicFsOps, NativeFs};
use crate::platform::MoveHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    /// The new app directory is staged.
    NewReady,
    Swapping,
    Committed,
    /// Failed; the previous app directory (if any) is back in place.
    RolledBack,
}

#[derive(Debug, Default, Clone)]
pub struct ReplaceReport {
    /// An existing app directory was replaced (not just created).
    pub replaced_existing: bool,
    /// How often the waiter was asked before the old directory could be moved.
    pub waits: u32,
    /// Non-fatal cleanup failures; a leftover backup is handled by the next recovery.
    pub cleanup_warnings: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct RecoveryReport {
    /// Orphaned scratch directories that were deleted.
    pub removed_orphans: Vec<PathBuf>,
    /// An incomplete app directory was deleted to make room for the backup.
    pub cleared_incomplete_app: bool,
    pub restored_backup: bool,
    /// Files in the live app directory that are currently open.
    pub locked_files: Vec<PathBuf>,
}

impl RecoveryReport {
    pub fn is_noop(&self) -> bool {
        self.removed_orphans.is_empty() && !self.cleared_incomplete_app && !self.restored_backup
    }
}

pub struct DirectoryTransaction<F: AtomicFsOps = NativeFs> {
    paths: PackagePaths,
    fs: F,
    state: TransactionState,
}

impl DirectoryTransaction<NativeFs> {
    pub fn new(paths: PackagePaths) -> Self {
        Self::with_fs(paths, NativeFs)
    }
}

impl<F: AtomicFsOps> DirectoryTransaction<F> {
    pub fn with_fs(paths: PackagePaths, fs: F) -> Self {
        Self {
            paths,
            fs,
            state: TransactionState::Idle,
        }
    }

    pub fn paths(&self) -> &PackagePaths {
        &self.paths
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub(crate) fn fs(&self) -> &F {
        &self.fs
    }

    /// Bring the package directory back to a consistent state after an interrupted
    /// install. Must run before staging a new app directory.
    ///
    /// An existing backup always wins over the live directory: post-install steps may
    /// run after the swap, and there is no record of whether they finished.
    /// Running this twice in a row is a no-op the second time.
    pub fn recover(&mut self, waiter: &mut dyn LockedFileWaiter) -> Result<RecoveryReport, TransactionError> {
        let mut report = RecoveryReport::default();

        for dir in self.paths.orphan_candidates() {
            if force_delete_directory(dir)? {
                report.removed_orphans.push(dir.to_path_buf());
            }
        }
        if !report.removed_orphans.is_empty() {
            warn!("Removed orphaned tmp installer directories, probably from an interrupted previous install");
        }

        if self.paths.backup.exists() {
            if self.paths.app.exists() {
                warn!("Clearing an incomplete app directory from a previous interrupted install");
                // atomically, so that another interruption does not leave a half-deleted app
                self.fs
                    .delete_directory_atomically(&self.paths.app, &self.paths.delete_tmp)?;
                report.cleared_incomplete_app = true;
            }
            warn!("Restoring the previous app directory to recover from an interrupted install");
            self.fs.move_atomically(&self.paths.backup, &self.paths.app)?;
            report.restored_backup = true;
        }

        if self.paths.app.exists() && self.fs.is_directory_locked(&self.paths.app)? {
            // let the user close the programs while the new version is being prepared
            report.locked_files = self.fs.locked_entries(&self.paths.app)?;
            waiter.notify(&self.paths.app, &report.locked_files);
        }

        self.state = TransactionState::Idle;
        Ok(report)
    }

    /// Mark the new app directory as staged.
    pub fn mark_new_ready(&mut self) -> Result<(), TransactionError> {
        if !self.paths.new_app.is_dir() {
            return Err(TransactionError::InvalidSource(format!(
                "new app directory does not exist: '{}'",
                self.paths.new_app.display()
            )));
        }
        self.state = TransactionState::NewReady;
        Ok(())
    }

    /// Move the staged directory to `app`, replacing the current one if present.
    pub fn commit(&mut self, waiter: &mut dyn LockedFileWaiter) -> Result<ReplaceReport, TransactionError> {
        if self.state != TransactionState::NewReady {
            return Err(TransactionError::InvalidSource(format!(
                "no staged app directory to commit (state: {:?})",
                self.state
            )));
        }
        self.state = TransactionState::Swapping;
        let result = self.swap(waiter);
        self.state = match result {
            Ok(_) => TransactionState::Committed,
            Err(_) => TransactionState::RolledBack,
        };
        result
    }

    fn swap(&self, waiter: &mut dyn LockedFileWaiter) -> Result<ReplaceReport, TransactionError> {
        let mut report = ReplaceReport::default();
        let paths = &self.paths;

        let mut new_handle = self.fs.open_for_move(&paths.new_app)?;
        match self.fs.move_by_handle(&mut new_handle, &paths.app, false) {
            Ok(()) => {
                info!(app = %paths.app.display(), "app directory installed");
                return Ok(report);
            }
            Err(FsError::TargetExists(_)) => {}
            Err(e) => return Err(e.into()),
        }

        report.replaced_existing = true;
        let mut old_handle = self.move_out_old_app(waiter, &mut report)?;

        if let Err(cause) = self.fs.move_by_handle(&mut new_handle, &paths.app, false) {
            warn!(app = %paths.app.display(), "moving the new app directory in failed, restoring the previous one: {cause}");
            return match self.fs.move_by_handle(&mut old_handle, &paths.app, false) {
                Ok(()) => Err(cause.into()),
                Err(rollback) => Err(TransactionError::RollbackFailed {
                    backup: paths.backup.clone(),
                    cause,
                    rollback,
                }),
            };
        }
        // the backup cannot be deleted while we hold it open
        drop(old_handle);
        info!(app = %paths.app.display(), "app directory replaced");

        if let Err(e) = self
            .fs
            .delete_directory_atomically(&paths.backup, &paths.delete_tmp)
        {
            warn!(backup = %paths.backup.display(), "failed to delete the previous app directory: {e}");
            report.cleanup_warnings.push(format!(
                "Failed to delete the previous app directory '{}': {e}",
                paths.backup.display()
            ));
        }
        Ok(report)
    }

    /// Move `app` to the backup slot, asking `waiter` while programs hold files inside.
    /// Returns the handle, now pointing at the backup.
    fn move_out_old_app(
        &self,
        waiter: &mut dyn LockedFileWaiter,
        report: &mut ReplaceReport,
    ) -> Result<MoveHandle, TransactionError> {
        let paths = &self.paths;

        let mut handle = loop {
            match self.fs.open_for_move(&paths.app) {
                Ok(h) => break h,
                Err(FsError::InUse(_)) => self.wait_for_locked_files(waiter, report)?,
                Err(e) => return Err(e.into()),
            }
        };

        loop {
            match self.fs.move_by_handle(&mut handle, &paths.backup, false) {
                Ok(()) => return Ok(handle),
                // a file inside the app directory is open
                Err(FsError::AccessDenied(_)) => self.wait_for_locked_files(waiter, report)?,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn wait_for_locked_files(
        &self,
        waiter: &mut dyn LockedFileWaiter,
        report: &mut ReplaceReport,
    ) -> Result<(), TransactionError> {
        debug!(app = %self.paths.app.display(), "the previous app directory seems to be in use");
        let locked = self.fs.locked_entries(&self.paths.app).unwrap_or_default();
        report.waits += 1;
        match waiter.wait(&self.paths.app, &locked) {
            WaitDecision::Retry => Ok(()),
            WaitDecision::Cancel => Err(TransactionError::Cancelled(self.paths.app.clone())),
        }
    }
}
