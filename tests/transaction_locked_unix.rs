#![cfg(unix)]

// A program holding a file inside the app directory blocks the swap until it lets go.
// On Unix an open shared lock stands in for a running executable.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pog_cache::platform::open_shared_read;
use pog_cache::{
    AtomicFsOps, BoundedRetry, DirectoryTransaction, LockedFileWaiter, NativeFs, NoWait,
    PackagePaths, TransactionError, WaitDecision,
};
use tempfile::tempdir;

fn setup(root: &Path) -> (PackagePaths, PathBuf) {
    let paths = PackagePaths::new(root.join("pkg"));
    let exe = paths.app.join("bin").join("tool.exe");
    fs::create_dir_all(exe.parent().unwrap()).unwrap();
    fs::write(&exe, b"old").unwrap();
    fs::create_dir_all(&paths.new_app).unwrap();
    fs::write(paths.new_app.join("tool.exe"), b"new").unwrap();
    (paths, exe)
}

#[test]
fn locked_app_is_detected_and_listed() {
    let td = tempdir().unwrap();
    let (paths, exe) = setup(td.path());

    assert!(!NativeFs.is_directory_locked(&paths.app).unwrap());
    let _held = open_shared_read(&exe).unwrap();
    assert!(NativeFs.is_directory_locked(&paths.app).unwrap());
    assert_eq!(NativeFs.locked_entries(&paths.app).unwrap(), vec![exe.clone()]);
    assert!(!NativeFs.move_directory_unlocked(&paths.app, &paths.backup).unwrap());
    assert!(paths.app.exists() && !paths.backup.exists());
}

#[test]
fn cancel_leaves_everything_in_place() {
    let td = tempdir().unwrap();
    let (paths, exe) = setup(td.path());
    let _held = open_shared_read(&exe).unwrap();

    let mut txn = DirectoryTransaction::new(paths.clone());
    txn.mark_new_ready().unwrap();
    let err = txn.commit(&mut NoWait).unwrap_err();

    assert!(matches!(err, TransactionError::Cancelled(ref p) if p == &paths.app), "got {err:?}");
    assert_eq!(fs::read(&exe).unwrap(), b"old");
    assert!(paths.new_app.join("tool.exe").is_file());
    assert!(!paths.backup.exists());
}

#[test]
fn bounded_retry_gives_up() {
    let td = tempdir().unwrap();
    let (paths, exe) = setup(td.path());
    let _held = open_shared_read(&exe).unwrap();

    let mut waiter = BoundedRetry::new(2, Duration::from_millis(1));
    let mut txn = DirectoryTransaction::new(paths.clone());
    txn.mark_new_ready().unwrap();
    assert!(matches!(txn.commit(&mut waiter), Err(TransactionError::Cancelled(_))));
    assert_eq!(waiter.waits(), 3);
}

#[test]
fn retry_succeeds_once_the_file_is_released() {
    let td = tempdir().unwrap();
    let (paths, exe) = setup(td.path());
    let mut held = Some(open_shared_read(&exe).unwrap());

    let mut seen: Vec<PathBuf> = Vec::new();
    let mut waiter = |_dir: &Path, locked: &[PathBuf]| {
        seen.extend_from_slice(locked);
        held.take();
        WaitDecision::Retry
    };

    let mut txn = DirectoryTransaction::new(paths.clone());
    txn.mark_new_ready().unwrap();
    let report = txn.commit(&mut waiter).unwrap();

    assert_eq!(report.waits, 1);
    assert!(report.replaced_existing);
    assert_eq!(seen, vec![exe]);
    assert_eq!(fs::read(paths.app.join("tool.exe")).unwrap(), b"new");
    assert!(!paths.backup.exists());
}

#[derive(Default)]
struct Recorder {
    notified: Vec<PathBuf>,
}

impl LockedFileWaiter for Recorder {
    fn wait(&mut self, _dir: &Path, _locked: &[PathBuf]) -> WaitDecision {
        WaitDecision::Cancel
    }

    fn notify(&mut self, _dir: &Path, locked: &[PathBuf]) {
        self.notified.extend_from_slice(locked);
    }
}

#[test]
fn recovery_notifies_about_locked_files() {
    let td = tempdir().unwrap();
    let (paths, exe) = setup(td.path());
    let _held = open_shared_read(&exe).unwrap();

    let mut recorder = Recorder::default();
    let report = DirectoryTransaction::new(paths.clone()).recover(&mut recorder).unwrap();

    assert_eq!(report.locked_files, vec![exe.clone()]);
    assert_eq!(recorder.notified, vec![exe]);
    // the staged directory counts as an orphan of an earlier run
    assert_eq!(report.removed_orphans, vec![paths.new_app.clone()]);
}
