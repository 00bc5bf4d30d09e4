//! Cache entry handles and metadata.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::provenance::SourcePackageMetadata;
use crate::errors::{CacheError, FsError};

/// Metadata of a valid cache entry, as returned by enumeration.
#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
    pub key: String,
    /// Path of the payload file.
    pub path: PathBuf,
    /// Size of the payload, in bytes.
    pub size: u64,
    pub last_use_time: SystemTime,
    /// Packages that used this entry.
    pub source_packages: Vec<SourcePackageMetadata>,
}

impl CacheEntryInfo {
    /// Comma-separated consumer list, e.g. "7zip v23.01, Foo".
    pub fn owners(&self) -> String {
        self.source_packages
            .iter()
            .map(SourcePackageMetadata::display_name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A held read handle to the payload of a cache entry. While it is alive no process
/// can delete the entry; dropping it (or calling `unlock`) releases it.
#[derive(Debug)]
pub struct CacheEntryLock {
    key: String,
    path: PathBuf,
    file: File,
}

impl CacheEntryLock {
    pub(crate) fn new(key: &str, path: PathBuf, file: File) -> Self {
        Self {
            key: key.to_string(),
            path,
            file,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Path of the payload file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The handle holding the lock, open for reading.
    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn unlock(self) {
        drop(self);
    }
}

/// A staged entry: a directory next to the cache holding the payload and its log,
/// ready to be moved into place by `add_entry_locked`.
#[derive(Debug, Clone)]
pub struct NewCacheEntry {
    pub(crate) dir: PathBuf,
    pub(crate) file_name: String,
}

impl NewCacheEntry {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

/// The single file inside a staging directory.
/// Errors with `InvalidNewEntry` if the directory is missing, has a subdirectory,
/// or does not hold exactly one file.
pub(crate) fn single_payload_file(dir: &Path) -> Result<PathBuf, CacheError> {
    let read_dir = match fs::read_dir(dir) {
        Ok(r) => r,
        Err(_) if !dir.is_dir() => {
            return Err(CacheError::InvalidNewEntry(format!(
                "Attempted to add a cache entry from a non-existent directory: '{}'",
                dir.display()
            )));
        }
        Err(e) => return Err(FsError::io("list directory", dir, e).into()),
    };

    let mut files = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|e| FsError::io("list directory", dir, e))?;
        let ft = entry
            .file_type()
            .map_err(|e| FsError::io("stat", &entry.path(), e))?;
        if ft.is_dir() {
            return Err(CacheError::InvalidNewEntry(format!(
                "Attempted to add a cache entry containing a subdirectory: '{}'",
                dir.display()
            )));
        }
        files.push(entry.path());
    }

    match files.len() {
        1 => Ok(files.remove(0)),
        0 => Err(CacheError::InvalidNewEntry(format!(
            "Attempted to add a cache entry without a file: '{}'",
            dir.display()
        ))),
        _ => Err(CacheError::InvalidNewEntry(format!(
            "Attempted to add a cache entry containing multiple files: '{}'",
            dir.display()
        ))),
    }
}
