//! Shared, content-keyed download cache.
//!
//! Layout:
//! - each non-hidden subdirectory of the cache directory is an entry, named by its key;
//! - each entry holds exactly 2 files: the payload (any name) and the provenance log
//!   `referencingPackages.json-list`. A payload that is itself called like the log gets
//!   a `_` prefix when the entry is prepared.
//!
//! Entries are only ever added and removed with atomic renames, so several processes
//! can share one cache without any further coordination. A reader holds an open
//! handle to the payload, which blocks deletion of the entry until it is released.

pub mod cleanup;
mod entry;
mod key;
pub mod provenance;
pub mod retrieve;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::config::{LockRetryPolicy, PathConfig};
use crate::errors::{CacheError, FsError};
use crate::fs_ops::{AtomicFsOps, NativeFs, TmpDirectory};
use crate::platform::{open_shared_read, DirReadLock};

pub use entry::{CacheEntryInfo, CacheEntryLock, NewCacheEntry};
pub use key::validate_key;
pub use provenance::SourcePackageMetadata;

/// Reserved name of the provenance log inside each entry.
pub const METADATA_FILE_NAME: &str = "referencingPackages.json-list";

/// Paths of the two files of an entry, plus what enumeration reports about them.
struct EntryContent {
    metadata: PathBuf,
    payload: PathBuf,
    payload_size: u64,
    last_use_time: SystemTime,
}

#[derive(Debug)]
pub struct SharedFileCache<F: AtomicFsOps = NativeFs> {
    path: PathBuf,
    /// Same volume as `path`; used for staging new entries and removing old ones.
    tmp: TmpDirectory,
    fs: F,
    retry: LockRetryPolicy,
}

impl SharedFileCache<NativeFs> {
    pub fn new(path: impl Into<PathBuf>, tmp: TmpDirectory) -> Self {
        Self::with_fs(path, tmp, NativeFs)
    }

    /// Cache over `download_cache`, staging in `download_tmp`.
    pub fn from_paths(paths: &PathConfig, retry: LockRetryPolicy) -> Self {
        Self::new(
            paths.download_cache.clone(),
            TmpDirectory::new(paths.download_tmp.clone()),
        )
        .with_retry_policy(retry)
    }
}

impl<F: AtomicFsOps> SharedFileCache<F> {
    pub fn with_fs(path: impl Into<PathBuf>, tmp: TmpDirectory, fs: F) -> Self {
        Self {
            path: path.into(),
            tmp,
            fs,
            retry: LockRetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: LockRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tmp_directory(&self) -> &TmpDirectory {
        &self.tmp
    }

    /// Create the cache and tmp directories if they are missing.
    pub fn create_dirs(&self) -> Result<(), FsError> {
        for dir in [self.path.as_path(), self.tmp.path()] {
            fs::create_dir_all(dir).map_err(|e| FsError::io("create directory", dir, e))?;
        }
        Ok(())
    }

    /// Lock the entry directory: reading and writing inside is allowed, deleting it is not.
    ///
    /// `Ok(None)` if the entry does not exist. Another process holding the directory in
    /// an incompatible mode (typically mid-delete) is retried for a short while, then
    /// reported as `InUse`. Opening it with delete sharing instead would let the deleting
    /// process move it from under us, so this spins.
    fn lock_entry_directory(&self, dir: &Path) -> Result<Option<DirReadLock>, FsError> {
        let mut attempt = 0;
        loop {
            match self.fs.open_directory_read_lock(dir) {
                Ok(lock) => return Ok(Some(lock)),
                Err(FsError::NotFound(_)) => return Ok(None),
                Err(FsError::InUse(_)) if attempt < self.retry.attempts => {
                    attempt += 1;
                    thread::sleep(self.retry.interval);
                }
                Err(e) => {
                    if attempt > 0 {
                        debug!(path = %dir.display(), attempt, "entry directory still locked, giving up");
                    }
                    return Err(e);
                }
            }
        }
    }

    // Expects the entry to be locked already. `Ok(None)` if the directory is gone: on
    // Unix a reader may lock the inode of an entry a concurrent delete has just moved out.
    fn entry_content(&self, key: &str, dir: &Path) -> Result<Option<EntryContent>, CacheError> {
        let read_dir = match fs::read_dir(dir) {
            Ok(r) => r,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(key, "cache entry vanished while being locked");
                return Ok(None);
            }
            Err(e) => return Err(FsError::io("list entry", dir, e).into()),
        };

        let mut files = Vec::with_capacity(2);
        for item in read_dir {
            let item = item.map_err(|e| FsError::io("list entry", dir, e))?;
            let meta = match item.metadata() {
                Ok(m) => m,
                // deleted between listing and stat
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(FsError::io("stat", &item.path(), e).into()),
            };
            if meta.is_file() {
                files.push((item.file_name(), item.path(), meta));
            }
        }

        if files.len() != 2 {
            let reason = if files.len() > 2 {
                "entry contains extra files"
            } else {
                "entry is missing files"
            };
            return Err(CacheError::invalid(key, reason));
        }

        let metadata_idx = files
            .iter()
            .position(|(name, _, _)| name == METADATA_FILE_NAME)
            .ok_or_else(|| CacheError::invalid(key, "metadata file is missing"))?;
        let (_, metadata, metadata_meta) = files.swap_remove(metadata_idx);
        let (_, payload, payload_meta) = files.remove(0);

        let last_use_time = metadata_meta
            .modified()
            .map_err(|e| FsError::io("read modification time", &metadata, e))?;
        Ok(Some(EntryContent {
            metadata,
            payload,
            payload_size: payload_meta.len(),
            last_use_time,
        }))
    }

    fn entry_info(&self, key: &str) -> Result<Option<CacheEntryInfo>, CacheError> {
        let dir = self.path.join(key);
        let Some(_dir_lock) = self.lock_entry_directory(&dir)? else {
            return Ok(None);
        };

        let Some(content) = self.entry_content(key, &dir)? else {
            return Ok(None);
        };
        let Some(source_packages) = provenance::read_metadata_file(&content.metadata)? else {
            if vanished(&dir) {
                return Ok(None);
            }
            return Err(CacheError::invalid(key, "metadata file has gone missing"));
        };

        Ok(Some(CacheEntryInfo {
            key: key.to_string(),
            path: content.payload,
            size: content.payload_size,
            last_use_time: content.last_use_time,
            source_packages,
        }))
    }

    /// List all valid entries.
    ///
    /// Invalid entries are passed to `on_invalid` and skipped. Entries deleted by another
    /// process during the scan are silently left out, as are entries still locked by a
    /// concurrent delete after the retry window.
    pub fn enumerate_entries(
        &self,
        mut on_invalid: impl FnMut(CacheError),
    ) -> Result<Vec<CacheEntryInfo>, CacheError> {
        let read_dir = match fs::read_dir(&self.path) {
            Ok(r) => r,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FsError::io("list cache", &self.path, e).into()),
        };

        let mut entries = Vec::new();
        for item in read_dir.filter_map(Result::ok) {
            if !item.file_type().map(|t| t.is_dir()).unwrap_or(false) || is_hidden(&item) {
                continue;
            }
            let Some(key) = item.file_name().to_str().map(str::to_owned) else {
                continue;
            };

            match self.entry_info(&key) {
                Ok(Some(info)) => entries.push(info),
                Ok(None) => {}
                Err(e @ CacheError::InvalidEntry { .. }) => on_invalid(e),
                Err(e) if e.is_retryable() => {
                    warn!(key = %key, "skipping cache entry locked by another process: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        debug!(count = entries.len(), "enumerated cache entries");
        Ok(entries)
    }

    /// Look up `key`, record `consumer` in its provenance log and return a lock over the
    /// payload. `Ok(None)` if the entry does not exist.
    pub fn get_entry_locked(
        &self,
        key: &str,
        consumer: &SourcePackageMetadata,
    ) -> Result<Option<CacheEntryLock>, CacheError> {
        validate_key(key)?;

        let dir = self.path.join(key);
        // the directory lock only needs to live until the payload handle is open; that
        // handle alone keeps the entry from being deleted
        let Some(_dir_lock) = self.lock_entry_directory(&dir)? else {
            return Ok(None);
        };

        let Some(content) = self.entry_content(key, &dir)? else {
            return Ok(None);
        };
        let file = match open_shared_read(&content.payload) {
            Ok(f) => f,
            Err(FsError::NotFound(_)) if vanished(&dir) => return Ok(None),
            Err(FsError::NotFound(_)) => {
                return Err(CacheError::invalid(key, "entry file has gone missing"));
            }
            Err(e) => return Err(e.into()),
        };

        match provenance::add_record(&content.metadata, consumer) {
            Ok(()) => {}
            Err(FsError::NotFound(_)) if vanished(&dir) => return Ok(None),
            Err(FsError::NotFound(_)) => {
                return Err(CacheError::invalid(key, "metadata file has gone missing"));
            }
            Err(e) => return Err(e.into()),
        }

        debug!(key, package = %consumer.package_name, "cache hit");
        Ok(Some(CacheEntryLock::new(key, content.payload, file)))
    }

    /// Remove an entry: move it out of the cache, then delete it. No-op if it does not
    /// exist; `InUse` if it, or anything inside it, is open.
    pub fn delete_entry(&self, key: &str) -> Result<(), CacheError> {
        validate_key(key)?;

        let src = self.path.join(key);
        let dest = self.tmp.temporary_path();

        let mut handle = match self.fs.open_for_move(&src) {
            Ok(h) => h,
            Err(FsError::NotFound(_)) => {
                debug!(key, "cache entry to delete does not exist");
                return Ok(());
            }
            Err(FsError::InUse(_)) => return Err(CacheError::InUse(key.to_string())),
            Err(e) => return Err(e.into()),
        };

        match self.fs.move_by_handle(&mut handle, &dest, false) {
            Ok(()) => {}
            Err(FsError::AccessDenied(_)) => return Err(CacheError::InUse(key.to_string())),
            Err(e) => return Err(e.into()),
        }
        // no way to delete through the handle; close it and delete by path
        drop(handle);

        self.fs.force_delete_directory_tree(&dest)?;
        info!(key, "deleted cache entry");
        Ok(())
    }

    pub fn delete_entry_info(&self, entry: &CacheEntryInfo) -> Result<(), CacheError> {
        self.delete_entry(&entry.key)
    }

    /// Turn `staging_dir` (which must hold exactly one file and nothing else) into an
    /// entry ready for `add_entry_locked`, recording `consumer` as its first user.
    ///
    /// `staging_dir` should be allocated from `tmp_directory()`, so that the final move
    /// stays on one volume.
    pub fn prepare_new_entry(
        &self,
        staging_dir: &Path,
        consumer: &SourcePackageMetadata,
    ) -> Result<NewCacheEntry, CacheError> {
        let payload = entry::single_payload_file(staging_dir)?;
        let mut file_name = payload
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                CacheError::InvalidNewEntry(format!(
                    "Cache entry file name is not valid UTF-8: '{}'",
                    payload.display()
                ))
            })?;

        if file_name == METADATA_FILE_NAME {
            file_name = format!("_{file_name}");
            let renamed = staging_dir.join(&file_name);
            fs::rename(&payload, &renamed).map_err(|e| FsError::io("rename entry file", &payload, e))?;
            debug!(from = %payload.display(), to = %renamed.display(), "renamed payload colliding with metadata file");
        }

        provenance::create_metadata_file(&staging_dir.join(METADATA_FILE_NAME), consumer)?;
        Ok(NewCacheEntry {
            dir: staging_dir.to_path_buf(),
            file_name,
        })
    }

    /// Atomically move a prepared entry into the cache under `key` and lock it.
    ///
    /// `AlreadyExists` if another process committed `key` first; the staged directory
    /// is left untouched so the caller can discard it and read the winner instead.
    pub fn add_entry_locked(&self, key: &str, new_entry: &NewCacheEntry) -> Result<CacheEntryLock, CacheError> {
        validate_key(key)?;

        let target = self.path.join(key);
        let mut handle = self.fs.open_for_move(&new_entry.dir)?;
        match self.fs.move_by_handle(&mut handle, &target, false) {
            Ok(()) => {}
            Err(FsError::TargetExists(_)) => {
                debug!(key, "cache entry was added concurrently");
                return Err(CacheError::AlreadyExists(key.to_string()));
            }
            // on Windows the winner's entry being open shows up as access denied; anything
            // else denied (e.g. a read-only cache) is a real failure
            Err(FsError::AccessDenied(p)) => {
                if fs::symlink_metadata(&target).is_ok() {
                    debug!(key, "cache entry was added concurrently and is in use");
                    return Err(CacheError::AlreadyExists(key.to_string()));
                }
                return Err(FsError::AccessDenied(p).into());
            }
            Err(e) => return Err(e.into()),
        }

        let payload = target.join(&new_entry.file_name);
        let file = match open_shared_read(&payload) {
            Ok(f) => f,
            Err(FsError::NotFound(_)) => {
                return Err(CacheError::invalid(key, "entry file has gone missing"));
            }
            Err(e) => return Err(e.into()),
        };
        drop(handle);

        info!(key, file = %new_entry.file_name, "added cache entry");
        Ok(CacheEntryLock::new(key, payload, file))
    }
}

/// True if a locked entry directory no longer sits at `dir` (moved out by a delete).
fn vanished(dir: &Path) -> bool {
    matches!(fs::symlink_metadata(dir), Err(e) if e.kind() == io::ErrorKind::NotFound)
}

#[cfg(windows)]
fn is_hidden(item: &fs::DirEntry) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;

    let dot = item.file_name().to_string_lossy().starts_with('.');
    dot || item
        .metadata()
        .map(|m| m.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0)
        .unwrap_or(false)
}

#[cfg(not(windows))]
fn is_hidden(item: &fs::DirEntry) -> bool {
    item.file_name().to_string_lossy().starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_in(root: &Path) -> SharedFileCache {
        let cache = SharedFileCache::new(root.join("cache"), TmpDirectory::new(root.join("tmp")));
        cache.create_dirs().unwrap();
        cache
    }

    #[test]
    fn missing_entry_is_a_miss() {
        let td = tempfile::tempdir().unwrap();
        let cache = cache_in(td.path());
        let c = SourcePackageMetadata::new("Foo");
        assert!(cache.get_entry_locked("ABCD", &c).unwrap().is_none());
        cache.delete_entry("ABCD").unwrap();
    }

    #[test]
    fn hidden_directories_are_ignored() {
        let td = tempfile::tempdir().unwrap();
        let cache = cache_in(td.path());
        fs::create_dir_all(cache.path().join(".staging")).unwrap();
        let mut invalid = 0;
        let entries = cache.enumerate_entries(|_| invalid += 1).unwrap();
        assert!(entries.is_empty());
        assert_eq!(invalid, 0);
    }

    #[test]
    fn payload_named_like_the_log_is_prefixed() {
        let td = tempfile::tempdir().unwrap();
        let cache = cache_in(td.path());
        let staging = cache.tmp_directory().temporary_path();
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join(METADATA_FILE_NAME), "payload").unwrap();

        let entry = cache
            .prepare_new_entry(&staging, &SourcePackageMetadata::new("Foo"))
            .unwrap();
        assert_eq!(entry.file_name(), "_referencingPackages.json-list");
        assert_eq!(fs::read_to_string(staging.join(entry.file_name())).unwrap(), "payload");

        let lock = cache.add_entry_locked("K1", &entry).unwrap();
        assert!(lock.path().ends_with("K1/_referencingPackages.json-list"));
    }

    #[test]
    fn invalid_key_is_rejected_before_touching_disk() {
        let td = tempfile::tempdir().unwrap();
        let cache = cache_in(td.path());
        let err = cache.delete_entry("../escape").unwrap_err();
        assert!(matches!(err, CacheError::InvalidKey(_)));
    }
}
