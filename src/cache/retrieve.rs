//! Cached retrieval: serve a file from the cache, or populate it and add it.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{entry::single_payload_file, CacheEntryLock, NewCacheEntry, SharedFileCache, SourcePackageMetadata};
use crate::errors::{CacheError, FsError};
use crate::fs_ops::{force_delete_directory, AtomicFsOps};

/// Uppercase hex SHA-256 of a file; the format used for cache keys.
pub fn sha256_file(path: &Path) -> Result<String, FsError> {
    let mut file = File::open(path).map_err(|e| FsError::io("open for hashing", path, e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| FsError::io("hash file", path, e))?;
    Ok(hex::encode_upper(hasher.finalize()))
}

/// Retrieve a file through the cache.
///
/// With `expected_hash`, a cached entry is returned directly, without re-hashing (the
/// payload was verified when it was added). Otherwise `populate` is called with a fresh
/// staging directory on the cache volume; it must leave exactly one file there. The
/// file is hashed, checked against `expected_hash`, and added under its hash.
///
/// The staging directory is removed on every error path.
pub fn retrieve<F, P>(
    cache: &SharedFileCache<F>,
    consumer: &SourcePackageMetadata,
    expected_hash: Option<&str>,
    populate: P,
) -> Result<CacheEntryLock, CacheError>
where
    F: AtomicFsOps,
    P: FnOnce(&Path) -> anyhow::Result<()>,
{
    let expected = expected_hash.map(str::to_ascii_uppercase);

    if let Some(hash) = expected.as_deref() {
        if let Some(lock) = get_entry_locked_with_cleanup(cache, hash, consumer)? {
            info!(key = hash, "file retrieved from the local cache");
            return Ok(lock);
        }
        debug!(key = hash, "file not found in the local cache");
    } else {
        debug!("no hash provided, cannot look the file up in the local cache");
    }

    let staging = cache.tmp_directory().temporary_path();
    debug!(path = %staging.display(), "using staging directory");
    fs::create_dir_all(&staging).map_err(|e| FsError::io("create staging directory", &staging, e))?;

    let result = populate_and_add(cache, consumer, expected.as_deref(), &staging, populate);
    if result.is_err() {
        if let Err(e) = force_delete_directory(&staging) {
            warn!(path = %staging.display(), "failed to remove staging directory: {e}");
        }
    }
    result
}

fn populate_and_add<F, P>(
    cache: &SharedFileCache<F>,
    consumer: &SourcePackageMetadata,
    expected: Option<&str>,
    staging: &Path,
    populate: P,
) -> Result<CacheEntryLock, CacheError>
where
    F: AtomicFsOps,
    P: FnOnce(&Path) -> anyhow::Result<()>,
{
    populate(staging).map_err(CacheError::Populate)?;

    let file = single_payload_file(staging)?;
    let hash = sha256_file(&file)?;
    if let Some(expected) = expected {
        if hash != expected {
            return Err(CacheError::IncorrectHash {
                key: expected.to_string(),
                expected: expected.to_string(),
                actual: hash,
            });
        }
    }

    debug!(key = %hash, "adding the file to the local cache");
    let entry = cache.prepare_new_entry(staging, consumer)?;
    add_entry_to_cache(cache, &hash, &entry, consumer)
}

/// Add `entry`; if the key was added concurrently, use the existing entry instead and
/// discard ours. A winner that disappears again before we can lock it is retried.
fn add_entry_to_cache<F: AtomicFsOps>(
    cache: &SharedFileCache<F>,
    key: &str,
    entry: &NewCacheEntry,
    consumer: &SourcePackageMetadata,
) -> Result<CacheEntryLock, CacheError> {
    loop {
        match cache.add_entry_locked(key, entry) {
            Ok(lock) => return Ok(lock),
            Err(CacheError::AlreadyExists(_)) => {
                debug!(key, "file is already cached");
                let Some(lock) = get_entry_locked_with_cleanup(cache, key, consumer)? else {
                    continue;
                };
                debug!(key, "deleting staged copy, the file already exists in the local cache");
                // on failure the lock is dropped along with the error
                force_delete_directory(entry.dir())?;
                return Ok(lock);
            }
            Err(e) => return Err(e),
        }
    }
}

/// `get_entry_locked`, deleting an invalid entry and reporting it as a miss.
/// If the invalid entry cannot be deleted, the original error is returned.
pub fn get_entry_locked_with_cleanup<F: AtomicFsOps>(
    cache: &SharedFileCache<F>,
    key: &str,
    consumer: &SourcePackageMetadata,
) -> Result<Option<CacheEntryLock>, CacheError> {
    match cache.get_entry_locked(key, consumer) {
        Err(e @ CacheError::InvalidEntry { .. }) => {
            warn!(key, "found an invalid download cache entry, replacing: {e}");
            match cache.delete_entry(key) {
                Ok(()) => Ok(None),
                Err(del) => {
                    debug!(key, "deleting the invalid entry failed: {del}");
                    Err(e)
                }
            }
        }
        other => other,
    }
}
