// A cache the current user may not write to fails the add instead of being read as
// "another process added it first".

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use pog_cache::cache::retrieve::retrieve;
use pog_cache::errors::FsError;
use pog_cache::fs_ops::{DirReadLock, MoveHandle};
use pog_cache::{AtomicFsOps, CacheError, NativeFs, SharedFileCache, SourcePackageMetadata, TmpDirectory};
use tempfile::tempdir;

/// Denies every move into `cache_dir`, as a read-only cache directory would.
struct DeniedFs {
    cache_dir: PathBuf,
}

impl AtomicFsOps for DeniedFs {
    fn open_for_move(&self, path: &Path) -> Result<MoveHandle, FsError> {
        NativeFs.open_for_move(path)
    }

    fn move_by_handle(&self, handle: &mut MoveHandle, dest: &Path, replace: bool) -> Result<(), FsError> {
        if dest.parent() == Some(self.cache_dir.as_path()) {
            return Err(FsError::AccessDenied(dest.to_path_buf()));
        }
        NativeFs.move_by_handle(handle, dest, replace)
    }

    fn open_directory_read_lock(&self, path: &Path) -> Result<DirReadLock, FsError> {
        NativeFs.open_directory_read_lock(path)
    }
}

fn denied_cache(root: &Path) -> SharedFileCache<DeniedFs> {
    let cache_dir = root.join("cache");
    let cache = SharedFileCache::with_fs(
        cache_dir.clone(),
        TmpDirectory::new(root.join("tmp")),
        DeniedFs { cache_dir },
    );
    cache.create_dirs().unwrap();
    cache
}

#[test]
fn denied_add_is_not_reported_as_existing() {
    let td = tempdir().unwrap();
    let cache = denied_cache(td.path());
    let staging = cache.tmp_directory().temporary_path();
    fs::create_dir_all(&staging).unwrap();
    fs::write(staging.join("setup.exe"), b"test").unwrap();
    let entry = cache
        .prepare_new_entry(&staging, &SourcePackageMetadata::new("Test"))
        .unwrap();

    let err = cache.add_entry_locked("KEY", &entry).unwrap_err();
    assert!(
        matches!(err, CacheError::Fs(FsError::AccessDenied(_))),
        "got {err:?}"
    );
    assert!(entry.dir().is_dir(), "the staged entry stays with the caller");
}

#[test]
fn retrieve_returns_when_the_cache_is_not_writable() {
    let td = tempdir().unwrap();
    let root = td.path().to_path_buf();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let cache = denied_cache(&root);
        let result = retrieve(&cache, &SourcePackageMetadata::new("Test"), None, |dir| {
            fs::write(dir.join("setup.exe"), b"test")?;
            Ok(())
        });
        let staging_left = fs::read_dir(cache.tmp_directory().path()).unwrap().count();
        let _ = tx.send((result.map(|lock| lock.key().to_string()), staging_left));
    });

    let (result, staging_left) = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("retrieve keeps retrying a denied add");
    let err = result.unwrap_err();
    assert!(err.is_retryable(), "got {err:?}");
    assert!(matches!(err, CacheError::Fs(FsError::AccessDenied(_))), "got {err:?}");
    assert_eq!(staging_left, 0);
}

#[test]
fn existing_target_still_counts_as_added_concurrently() {
    let td = tempdir().unwrap();
    let cache = denied_cache(td.path());
    fs::create_dir_all(cache.path().join("KEY")).unwrap();

    let staging = cache.tmp_directory().temporary_path();
    fs::create_dir_all(&staging).unwrap();
    fs::write(staging.join("setup.exe"), b"test").unwrap();
    let entry = cache
        .prepare_new_entry(&staging, &SourcePackageMetadata::new("Test"))
        .unwrap();

    let err = cache.add_entry_locked("KEY", &entry).unwrap_err();
    assert!(matches!(err, CacheError::AlreadyExists(ref k) if k == "KEY"), "got {err:?}");
}
