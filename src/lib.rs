//! pog_cache library crate.
//!
//! A process-safe shared download cache plus the atomic directory primitives a package
//! installer uses to swap a package's `app` directory for a new one.
//!
//! Modules:
//! - `fs_ops`: handle-based atomic move/delete/lock-probe primitives (`AtomicFsOps`)
//! - `cache`: the content-keyed `SharedFileCache`, cached retrieval and clearing
//! - `install`: `DirectoryTransaction` with rollback, crash recovery and archive staging
//! - `config`, `errors`, `output`, `shutdown`, `platform`: supporting pieces

pub mod cache;
pub mod cli;
pub mod config;
pub mod errors;
pub mod fs_ops;
pub mod install;
pub mod output;
pub mod platform;
pub mod shutdown;

pub use cache::{
    CacheEntryInfo, CacheEntryLock, NewCacheEntry, SharedFileCache, SourcePackageMetadata,
    METADATA_FILE_NAME,
};
pub use config::{
    default_config_path, default_log_path, Config, LockRetryPolicy, LogLevel, PathConfig,
};
pub use config::paths::path_has_symlink_ancestor;
pub use errors::{CacheError, FsError, TransactionError};
pub use fs_ops::{AtomicFsOps, NativeFs, TmpDirectory};
pub use install::{
    BoundedRetry, DirectoryTransaction, InstallSession, LockedFileWaiter, NoWait, PackagePaths,
    ReplaceReport, WaitDecision,
};
