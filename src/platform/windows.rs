//! Windows implementations of the handle-based primitives.
//!
//! Notes:
//! - `MoveFileExW` silently falls back to copy+delete when a plain rename is not
//!   possible, so all moves go through `SetFileInformationByHandle(FileRenameInfo)`.
//! - Opening with `DELETE` access separates the two Access Denied causes that
//!   `MoveFileExW` conflates: missing permission (the open fails) and a locked entry
//!   inside the directory (the rename fails).
//! - `FILE_SHARE_READ` everywhere, because e.g. Explorer likes to hold read handles
//!   to directories.

use std::ffi::c_void;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::fs::OpenOptionsExt;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use std::path::{Path, PathBuf};

use windows_sys::Win32::Foundation::{
    ERROR_ACCESS_DENIED, ERROR_ALREADY_EXISTS, ERROR_FILE_EXISTS, ERROR_FILE_NOT_FOUND,
    ERROR_PATH_NOT_FOUND, ERROR_SHARING_VIOLATION, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FileRenameInfo, SetFileInformationByHandle, DELETE, FILE_FLAG_BACKUP_SEMANTICS,
    FILE_GENERIC_READ, FILE_RENAME_INFO, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};

use crate::errors::FsError;

/// Open handle used to move a file or directory. The handle follows the object
/// across `move_by_handle` calls and is closed on drop.
#[derive(Debug)]
pub struct MoveHandle {
    handle: OwnedHandle,
    path: PathBuf,
}

impl MoveHandle {
    /// Location of the referenced object as of the last successful move.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read handle over a directory: other readers are fine, moving it is not.
#[derive(Debug)]
pub struct DirReadLock {
    _handle: OwnedHandle,
}

fn to_wide(path: &Path) -> Vec<u16> {
    path.as_os_str().encode_wide().chain(std::iter::once(0)).collect()
}

fn classify(op: &'static str, path: &Path, e: io::Error) -> FsError {
    match e.raw_os_error().map(|c| c as u32) {
        Some(ERROR_FILE_NOT_FOUND) | Some(ERROR_PATH_NOT_FOUND) => FsError::NotFound(path.to_path_buf()),
        Some(ERROR_SHARING_VIOLATION) => FsError::InUse(path.to_path_buf()),
        _ => FsError::io(op, path, e),
    }
}

fn create_file(path: &Path, access: u32, op: &'static str) -> Result<OwnedHandle, FsError> {
    let wide = to_wide(path);
    let handle: HANDLE = unsafe {
        CreateFileW(
            wide.as_ptr(),
            access,
            FILE_SHARE_READ,
            std::ptr::null(),
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS,
            std::ptr::null_mut(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(classify(op, path, io::Error::last_os_error()));
    }
    Ok(unsafe { OwnedHandle::from_raw_handle(handle as RawHandle) })
}

/// Open a filesystem object (file/directory) for later moving it with `move_by_handle`.
pub fn open_for_move(path: &Path) -> Result<MoveHandle, FsError> {
    let handle = create_file(path, DELETE, "open for move")?;
    Ok(MoveHandle {
        handle,
        path: path.to_path_buf(),
    })
}

pub fn open_directory_read_lock(path: &Path) -> Result<DirReadLock, FsError> {
    let handle = create_file(path, FILE_GENERIC_READ, "open directory")?;
    Ok(DirReadLock { _handle: handle })
}

/// Open a file for reading; the share mode forbids deleting or renaming it meanwhile.
pub fn open_shared_read(path: &Path) -> Result<File, FsError> {
    OpenOptions::new()
        .read(true)
        .share_mode(FILE_SHARE_READ)
        .open(path)
        .map_err(|e| classify("open for reading", path, e))
}

/// Open a provenance log; callers take fs2 range locks themselves.
pub fn open_metadata_file(path: &Path, write: bool) -> Result<File, FsError> {
    OpenOptions::new()
        .read(true)
        .write(write)
        .share_mode(FILE_SHARE_READ | FILE_SHARE_WRITE)
        .open(path)
        .map_err(|e| classify("open metadata file", path, e))
}

pub fn move_by_handle(handle: &mut MoveHandle, dest: &Path, replace: bool) -> Result<(), FsError> {
    // FileRenameInfo without a root directory handle needs a full path
    let full_dest = std::path::absolute(dest).map_err(|e| FsError::io("resolve move target", dest, e))?;
    let name: Vec<u16> = full_dest.as_os_str().encode_wide().collect();
    let name_bytes = name.len() * std::mem::size_of::<u16>();
    let size = std::mem::size_of::<FILE_RENAME_INFO>() + name_bytes;
    // u64 backing keeps the struct aligned
    let mut buf = vec![0u64; size.div_ceil(8)];
    let info = buf.as_mut_ptr() as *mut FILE_RENAME_INFO;

    let ok = unsafe {
        // ReplaceIfExists aliases the low byte of Flags
        (*info).Anonymous.Flags = u32::from(replace);
        (*info).RootDirectory = std::ptr::null_mut();
        (*info).FileNameLength = name_bytes as u32;
        std::ptr::copy_nonoverlapping(
            name.as_ptr(),
            std::ptr::addr_of_mut!((*info).FileName) as *mut u16,
            name.len(),
        );
        SetFileInformationByHandle(
            handle.handle.as_raw_handle() as HANDLE,
            FileRenameInfo,
            info as *const c_void,
            size as u32,
        )
    };
    if ok != 0 {
        handle.path = dest.to_path_buf();
        return Ok(());
    }

    let e = io::Error::last_os_error();
    Err(match e.raw_os_error().map(|c| c as u32) {
        Some(ERROR_ALREADY_EXISTS) | Some(ERROR_FILE_EXISTS) => FsError::TargetExists(dest.to_path_buf()),
        Some(ERROR_ACCESS_DENIED) | Some(ERROR_SHARING_VIOLATION) => FsError::AccessDenied(dest.to_path_buf()),
        Some(ERROR_FILE_NOT_FOUND) | Some(ERROR_PATH_NOT_FOUND) => FsError::NotFound(dest.to_path_buf()),
        _ => FsError::io("move", &handle.path, e),
    })
}

/// Clear the read-only attribute. Returns true if it was set.
#[allow(clippy::permissions_set_readonly_false)]
pub fn clear_readonly(path: &Path) -> io::Result<bool> {
    let meta = fs::symlink_metadata(path)?;
    let mut perms = meta.permissions();
    if !perms.readonly() {
        return Ok(false);
    }
    perms.set_readonly(false);
    fs::set_permissions(path, perms)?;
    Ok(true)
}

/// Open log file for appending (best-effort; no symlink defense available via std on Windows).
pub fn open_log_file_secure_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    OpenOptions::new().create(true).append(true).open(path)
}

pub fn write_config_secure_new_0600(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::io::Write;

    let mut f = OpenOptions::new().write(true).create_new(true).open(path)?;
    f.write_all(contents)?;
    f.sync_all()
}

/// True if both paths resolve to the same volume (drive or UNC share).
pub fn same_volume(a: &Path, b: &Path) -> io::Result<bool> {
    use std::path::Component;

    fn prefix(p: &Path) -> io::Result<Option<std::ffi::OsString>> {
        let full = fs::canonicalize(p)?;
        Ok(full.components().next().and_then(|c| match c {
            Component::Prefix(pre) => Some(pre.as_os_str().to_ascii_uppercase()),
            _ => None,
        }))
    }
    Ok(prefix(a)? == prefix(b)?)
}
