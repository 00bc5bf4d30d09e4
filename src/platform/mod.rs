//! Platform-specific helpers.
//! This module hides OS differences (Unix/Windows) behind a uniform API so
//! the rest of the codebase can remain platform-agnostic.
//!
//! Windows gets real share-mode semantics from `CreateFileW` and renames through
//! `SetFileInformationByHandle`. Unix has no equivalent, so share modes are emulated
//! with advisory `flock` locks; only processes using these helpers are seen as
//! "in use" there. Before a directory is moved its entries are try-locked one at a
//! time and released, so a reader that takes its lock after the probe passed that
//! entry is not detected.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::{
    clear_readonly, move_by_handle, open_directory_read_lock, open_for_move,
    open_log_file_secure_append, open_metadata_file, open_shared_read, same_volume,
    write_config_secure_new_0600, DirReadLock, MoveHandle,
};

#[cfg(windows)]
pub use windows::{
    clear_readonly, move_by_handle, open_directory_read_lock, open_for_move,
    open_log_file_secure_append, open_metadata_file, open_shared_read, same_volume,
    write_config_secure_new_0600, DirReadLock, MoveHandle,
};
