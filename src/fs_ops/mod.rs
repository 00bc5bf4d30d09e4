//! Filesystem primitives: handle-based atomic moves, forced deletion and scratch paths.

mod atomic;
mod delete;
mod tmp;

pub use atomic::{AtomicFsOps, NativeFs};
pub use delete::force_delete_directory;
pub use tmp::{new_scratch_path, TmpDirectory};
pub use crate::platform::{DirReadLock, MoveHandle};
