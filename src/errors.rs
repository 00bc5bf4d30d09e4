//! Typed error definitions for pog_cache.
//! Filesystem races (locked, vanished, already-exists) are steady-state conditions when
//! several processes share the cache, so each one gets its own variant instead of an
//! opaque io::Error.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures of the low-level handle-based primitives.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    #[error("Path is in use by another process: {0}")]
    InUse(PathBuf),

    #[error("Move target already exists: {0}")]
    TargetExists(PathBuf),

    /// The destination, or an entry inside the moved directory, is open elsewhere
    /// (or we lack the permission to move it).
    #[error("Access denied while moving to {0}")]
    AccessDenied(PathBuf),

    #[error("{op} '{}': {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FsError {
    pub fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        FsError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Stable numeric code for logs and the CLI exit status.
    pub fn code(&self) -> i32 {
        match self {
            FsError::NotFound(_) => 10,
            FsError::InUse(_) => 11,
            FsError::TargetExists(_) => 12,
            FsError::AccessDenied(_) => 13,
            FsError::Io { .. } => 19,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }

    /// Locked by someone else; worth retrying once they are gone.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FsError::InUse(_) | FsError::AccessDenied(_))
    }
}

/// Failures of the shared download cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid cache entry, {reason}: '{key}'")]
    InvalidEntry { key: String, reason: String },

    #[error("Cache entry already exists: '{0}'")]
    AlreadyExists(String),

    #[error("Cannot delete the cache entry, it is currently in use: '{0}'")]
    InUse(String),

    #[error("Invalid cache entry key: '{0}'")]
    InvalidKey(String),

    #[error("{0}")]
    InvalidNewEntry(String),

    #[error("File retrieved for '{key}' has an incorrect checksum (expected '{expected}', actual '{actual}')")]
    IncorrectHash {
        key: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("Failed to populate a new cache entry: {0}")]
    Populate(#[source] anyhow::Error),
}

impl CacheError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        CacheError::InvalidEntry {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            CacheError::InvalidEntry { .. } => 20,
            CacheError::AlreadyExists(_) => 21,
            CacheError::InUse(_) => 22,
            CacheError::InvalidKey(_) => 23,
            CacheError::InvalidNewEntry(_) => 24,
            CacheError::IncorrectHash { .. } => 25,
            CacheError::Fs(e) => e.code(),
            CacheError::Populate(_) => 29,
        }
    }

    /// Key of the entry this error is about, when there is one.
    pub fn entry_key(&self) -> Option<&str> {
        match self {
            CacheError::InvalidEntry { key, .. }
            | CacheError::IncorrectHash { key, .. }
            | CacheError::AlreadyExists(key)
            | CacheError::InUse(key)
            | CacheError::InvalidKey(key) => Some(key),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            CacheError::InUse(_) => true,
            CacheError::Fs(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Failures of the install directory transaction.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The waiter gave up while files in the directory were still locked.
    #[error("Cannot overwrite an existing package installation, files are in use: {0}")]
    Cancelled(PathBuf),

    /// Moving the new directory in failed and so did restoring the previous one.
    /// The previous directory is left at `backup`; the next recovery restores it.
    #[error(
        "Failed to move the new app directory into place ({cause}), and restoring the previous one from '{}' also failed: {rollback}",
        backup.display()
    )]
    RollbackFailed {
        backup: PathBuf,
        cause: FsError,
        rollback: FsError,
    },

    #[error("Invalid install source: {0}")]
    InvalidSource(String),

    #[error("Archive extraction failed: {0}")]
    Extraction(#[source] anyhow::Error),

    #[error(transparent)]
    Fs(#[from] FsError),
}

impl TransactionError {
    pub fn code(&self) -> i32 {
        match self {
            TransactionError::Cancelled(_) => 30,
            TransactionError::RollbackFailed { .. } => 31,
            TransactionError::InvalidSource(_) => 32,
            TransactionError::Extraction(_) => 33,
            TransactionError::Fs(e) => e.code(),
        }
    }

    /// True when the package directory may be left without a live `app` directory.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransactionError::RollbackFailed { .. })
    }
}
