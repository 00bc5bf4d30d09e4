//! Unix implementations of the handle-based primitives.
//!
//! Share modes are emulated with `flock` (via fs2):
//! - a move handle holds an exclusive lock on the object itself;
//! - a directory read lock and a payload read handle hold shared locks;
//! - moving a directory first takes exclusive locks on every entry inside it, so a
//!   shared lock held anywhere in the tree is reported as `AccessDenied`.
//!
//! flock locks belong to the open file description, so two handles opened by the same
//! process conflict exactly like handles from two processes.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::trace;
use walkdir::WalkDir;

use crate::errors::FsError;

/// Open handle used to move a file or directory. The handle follows the object
/// across `move_by_handle` calls and releases its lock on drop.
#[derive(Debug)]
pub struct MoveHandle {
    file: File,
    path: PathBuf,
}

impl MoveHandle {
    /// Current location of the referenced object.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read lock over a directory: other readers are fine, moving it is not.
#[derive(Debug)]
pub struct DirReadLock {
    _file: File,
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn open_err(op: &'static str, path: &Path, e: io::Error) -> FsError {
    match e.kind() {
        io::ErrorKind::NotFound => FsError::NotFound(path.to_path_buf()),
        _ => FsError::io(op, path, e),
    }
}

pub fn open_for_move(path: &Path) -> Result<MoveHandle, FsError> {
    let file = File::open(path).map_err(|e| open_err("open for move", path, e))?;
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(MoveHandle {
            file,
            path: path.to_path_buf(),
        }),
        Err(e) if is_contended(&e) => Err(FsError::InUse(path.to_path_buf())),
        Err(e) => Err(FsError::io("lock for move", path, e)),
    }
}

pub fn open_directory_read_lock(path: &Path) -> Result<DirReadLock, FsError> {
    let file = File::open(path).map_err(|e| open_err("open directory", path, e))?;
    match FileExt::try_lock_shared(&file) {
        Ok(()) => Ok(DirReadLock { _file: file }),
        Err(e) if is_contended(&e) => Err(FsError::InUse(path.to_path_buf())),
        Err(e) => Err(FsError::io("lock directory", path, e)),
    }
}

/// Open a file for reading while preventing anyone from moving or deleting it.
pub fn open_shared_read(path: &Path) -> Result<File, FsError> {
    let file = File::open(path).map_err(|e| open_err("open for reading", path, e))?;
    match FileExt::try_lock_shared(&file) {
        Ok(()) => Ok(file),
        Err(e) if is_contended(&e) => Err(FsError::InUse(path.to_path_buf())),
        Err(e) => Err(FsError::io("lock for reading", path, e)),
    }
}

/// Open a provenance log; callers take fs2 range locks themselves.
pub fn open_metadata_file(path: &Path, write: bool) -> Result<File, FsError> {
    OpenOptions::new()
        .read(true)
        .write(write)
        .open(path)
        .map_err(|e| open_err("open metadata file", path, e))
}

/// Try-lock every entry below `root` exclusively, one at a time. Each lock is released
/// before the next entry is opened, so at most one descriptor is held however large
/// the tree is. A reader that locks an entry after the probe is not seen.
fn probe_tree(root: &Path, reported: &Path) -> Result<(), FsError> {
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                let io_err = e
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("filesystem loop"));
                if io_err.kind() == io::ErrorKind::NotFound {
                    continue;
                }
                return Err(FsError::io("walk directory", &path, io_err));
            }
        };
        let ft = entry.file_type();
        if !(ft.is_file() || ft.is_dir()) {
            // symlinks, fifos and sockets
            continue;
        }
        let file = match File::open(entry.path()) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Err(FsError::AccessDenied(reported.to_path_buf()));
            }
            Err(e) => return Err(FsError::io("open for move", entry.path(), e)),
        };
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => drop(file),
            Err(e) if is_contended(&e) => {
                trace!(path = %entry.path().display(), "entry locked by another handle");
                return Err(FsError::AccessDenied(reported.to_path_buf()));
            }
            Err(e) => return Err(FsError::io("lock for move", entry.path(), e)),
        }
    }
    Ok(())
}

/// rename(2) that refuses to replace an existing target.
fn rename_no_replace(src: &Path, dst: &Path) -> io::Result<()> {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_src = CString::new(src.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains null byte"))?;
        let c_dst = CString::new(dst.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains null byte"))?;
        let rc = unsafe {
            libc::renameat2(
                libc::AT_FDCWD,
                c_src.as_ptr(),
                libc::AT_FDCWD,
                c_dst.as_ptr(),
                libc::RENAME_NOREPLACE as libc::c_uint,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            // filesystem or kernel without RENAME_NOREPLACE; use the checked fallback
            Some(libc::EINVAL) | Some(libc::ENOSYS) => {}
            _ => return Err(err),
        }
    }

    // Narrower guarantee: another process may create `dst` between the check and the
    // rename. Non-empty directories are still never replaced by rename(2).
    if fs::symlink_metadata(dst).is_ok() {
        return Err(io::Error::from_raw_os_error(libc::EEXIST));
    }
    fs::rename(src, dst)
}

pub fn move_by_handle(handle: &mut MoveHandle, dest: &Path, replace: bool) -> Result<(), FsError> {
    let is_dir = handle
        .file
        .metadata()
        .map_err(|e| FsError::io("stat", &handle.path, e))?
        .is_dir();

    if is_dir {
        probe_tree(&handle.path, dest)?;
    }
    // lock on the replaced target, held until the rename
    let mut _target_guard = None;

    if handle.path == dest {
        // self-move: the probe above is all there is to do
        return Ok(());
    }

    if replace {
        if let Ok(meta) = fs::symlink_metadata(dest) {
            if meta.is_dir() {
                let target = File::open(dest).map_err(|e| open_err("open move target", dest, e))?;
                match FileExt::try_lock_exclusive(&target) {
                    Ok(()) => _target_guard = Some(target),
                    Err(e) if is_contended(&e) => return Err(FsError::AccessDenied(dest.to_path_buf())),
                    Err(e) => return Err(FsError::io("lock move target", dest, e)),
                }
                probe_tree(dest, dest)?;
            }
        }
    }

    let result = if replace {
        fs::rename(&handle.path, dest)
    } else {
        rename_no_replace(&handle.path, dest)
    };

    match result {
        Ok(()) => {
            handle.path = dest.to_path_buf();
            Ok(())
        }
        Err(e) => Err(match e.raw_os_error() {
            Some(libc::EEXIST) | Some(libc::ENOTEMPTY) => FsError::TargetExists(dest.to_path_buf()),
            Some(libc::EACCES) | Some(libc::EPERM) | Some(libc::EBUSY) => {
                FsError::AccessDenied(dest.to_path_buf())
            }
            Some(libc::ENOENT) => FsError::NotFound(handle.path.clone()),
            _ => FsError::io("move", &handle.path, e),
        }),
    }
}

/// Make `path` writable by its owner. Returns true if it was read-only.
pub fn clear_readonly(path: &Path) -> io::Result<bool> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok(false);
    }
    let mut perms = meta.permissions();
    if perms.mode() & 0o200 != 0 {
        return Ok(false);
    }
    perms.set_mode(perms.mode() | 0o200);
    fs::set_permissions(path, perms)?;
    Ok(true)
}

/// Open log file for appending; set 0600 only when creating a new file.
/// If the file already exists, we preserve its existing permissions to avoid
/// clobbering administrator adjustments (e.g. group-readable for log shipping).
pub fn open_log_file_secure_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let existed = path.exists();
    let f = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600) // applies on create
        .open(path)?;
    if !existed {
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
    Ok(f)
}

/// Create a new config file with mode 0600, refusing to follow a symlink at `path`.
pub fn write_config_secure_new_0600(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::io::Write;

    let mut f = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)?;
    f.write_all(contents)?;
    f.sync_all()
}

/// True if both paths live on the same filesystem (atomic renames are possible).
pub fn same_volume(a: &Path, b: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    Ok(fs::metadata(a)?.dev() == fs::metadata(b)?.dev())
}
