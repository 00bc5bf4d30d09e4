// Replacing a package's app directory, including failures in the middle of the swap.

use std::cell::Cell;
use std::fs;
use std::io;
use std::path::Path;

use pog_cache::errors::FsError;
use pog_cache::fs_ops::{DirReadLock, MoveHandle};
use pog_cache::install::TransactionState;
use pog_cache::{AtomicFsOps, DirectoryTransaction, NativeFs, NoWait, PackagePaths, TransactionError};
use tempfile::tempdir;

/// Passes everything to NativeFs, except that the listed `move_by_handle` calls
/// (1-based) fail.
struct FaultyFs {
    calls: Cell<u32>,
    fail_on: Vec<u32>,
}

impl FaultyFs {
    fn failing(fail_on: &[u32]) -> Self {
        Self {
            calls: Cell::new(0),
            fail_on: fail_on.to_vec(),
        }
    }
}

impl AtomicFsOps for FaultyFs {
    fn open_for_move(&self, path: &Path) -> Result<MoveHandle, FsError> {
        NativeFs.open_for_move(path)
    }

    fn move_by_handle(&self, handle: &mut MoveHandle, dest: &Path, replace: bool) -> Result<(), FsError> {
        let n = self.calls.get() + 1;
        self.calls.set(n);
        if self.fail_on.contains(&n) {
            return Err(FsError::io("move", handle.path(), io::Error::other("injected failure")));
        }
        NativeFs.move_by_handle(handle, dest, replace)
    }

    fn open_directory_read_lock(&self, path: &Path) -> Result<DirReadLock, FsError> {
        NativeFs.open_directory_read_lock(path)
    }
}

fn package_with_app(root: &Path) -> PackagePaths {
    let paths = PackagePaths::new(root.join("pkg"));
    fs::create_dir_all(paths.app.join("bin")).unwrap();
    fs::write(paths.app.join("bin").join("old.txt"), b"old").unwrap();
    paths
}

fn stage_new(paths: &PackagePaths) {
    fs::create_dir_all(&paths.new_app).unwrap();
    fs::write(paths.new_app.join("new.txt"), b"new").unwrap();
}

#[test]
fn fresh_install_moves_new_app_in() {
    let td = tempdir().unwrap();
    let paths = PackagePaths::new(td.path().join("pkg"));
    stage_new(&paths);

    let mut txn = DirectoryTransaction::new(paths.clone());
    txn.mark_new_ready().unwrap();
    let report = txn.commit(&mut NoWait).unwrap();

    assert!(!report.replaced_existing);
    assert_eq!(txn.state(), TransactionState::Committed);
    assert_eq!(fs::read(paths.app.join("new.txt")).unwrap(), b"new");
    assert!(!paths.new_app.exists());
}

#[test]
fn replace_swaps_and_removes_backup() {
    let td = tempdir().unwrap();
    let paths = package_with_app(td.path());
    stage_new(&paths);

    let mut txn = DirectoryTransaction::new(paths.clone());
    txn.mark_new_ready().unwrap();
    let report = txn.commit(&mut NoWait).unwrap();

    assert!(report.replaced_existing);
    assert_eq!(report.waits, 0);
    assert!(report.cleanup_warnings.is_empty());
    assert!(paths.app.join("new.txt").is_file());
    assert!(!paths.app.join("bin").exists());
    assert!(!paths.backup.exists());
    assert!(!paths.delete_tmp.exists());
}

#[test]
fn commit_requires_a_staged_directory() {
    let td = tempdir().unwrap();
    let paths = package_with_app(td.path());
    let mut txn = DirectoryTransaction::new(paths.clone());

    assert!(matches!(txn.mark_new_ready(), Err(TransactionError::InvalidSource(_))));
    assert!(matches!(txn.commit(&mut NoWait), Err(TransactionError::InvalidSource(_))));
    assert_eq!(txn.state(), TransactionState::Idle);
    assert!(paths.app.join("bin").join("old.txt").is_file());
}

#[test]
fn failed_move_in_restores_previous_app() {
    let td = tempdir().unwrap();
    let paths = package_with_app(td.path());
    stage_new(&paths);

    // 1: new -> app (target exists), 2: app -> backup, 3: new -> app
    let mut txn = DirectoryTransaction::with_fs(paths.clone(), FaultyFs::failing(&[3]));
    txn.mark_new_ready().unwrap();
    let err = txn.commit(&mut NoWait).unwrap_err();

    assert!(matches!(err, TransactionError::Fs(_)), "got {err:?}");
    assert!(!err.is_fatal());
    assert_eq!(txn.state(), TransactionState::RolledBack);
    assert_eq!(fs::read(paths.app.join("bin").join("old.txt")).unwrap(), b"old");
    assert!(!paths.backup.exists());
    assert!(paths.new_app.join("new.txt").is_file());
}

#[test]
fn failed_rollback_leaves_backup_for_recovery() {
    let td = tempdir().unwrap();
    let paths = package_with_app(td.path());
    stage_new(&paths);

    let mut txn = DirectoryTransaction::with_fs(paths.clone(), FaultyFs::failing(&[3, 4]));
    txn.mark_new_ready().unwrap();
    let err = txn.commit(&mut NoWait).unwrap_err();

    match &err {
        TransactionError::RollbackFailed { backup, .. } => assert_eq!(backup, &paths.backup),
        other => panic!("expected RollbackFailed, got {other:?}"),
    }
    assert!(err.is_fatal());
    assert!(!paths.app.exists());
    assert!(paths.backup.join("bin").join("old.txt").is_file());

    let report = DirectoryTransaction::new(paths.clone()).recover(&mut NoWait).unwrap();
    assert!(report.restored_backup);
    assert!(!report.cleared_incomplete_app);
    assert_eq!(report.removed_orphans, vec![paths.new_app.clone()]);
    assert_eq!(fs::read(paths.app.join("bin").join("old.txt")).unwrap(), b"old");
    assert!(!paths.backup.exists());
}

#[test]
fn failed_backup_cleanup_is_only_a_warning() {
    let td = tempdir().unwrap();
    let paths = package_with_app(td.path());
    stage_new(&paths);

    // 4: backup -> delete_tmp
    let mut txn = DirectoryTransaction::with_fs(paths.clone(), FaultyFs::failing(&[4]));
    txn.mark_new_ready().unwrap();
    let report = txn.commit(&mut NoWait).unwrap();

    assert_eq!(txn.state(), TransactionState::Committed);
    assert_eq!(report.cleanup_warnings.len(), 1);
    assert!(paths.app.join("new.txt").is_file());
    assert!(paths.backup.exists(), "left for the next recovery");
}
