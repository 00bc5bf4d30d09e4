//! Staging a new app directory from an archive or a single file, then committing it.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use super::paths::PackagePaths;
use super::transaction::{DirectoryTransaction, RecoveryReport, ReplaceReport};
use super::waiter::LockedFileWaiter;
use crate::errors::{FsError, TransactionError};
use crate::fs_ops::{force_delete_directory, AtomicFsOps, NativeFs};

/// Extracts `archive` into `target` (which exists and is empty). With `subdirectory`,
/// extracting only that part of the archive is allowed but not required.
pub trait ArchiveExtractor {
    fn extract(&self, archive: &Path, target: &Path, subdirectory: Option<&str>) -> anyhow::Result<()>;
}

impl<T: Fn(&Path, &Path, Option<&str>) -> anyhow::Result<()>> ArchiveExtractor for T {
    fn extract(&self, archive: &Path, target: &Path, subdirectory: Option<&str>) -> anyhow::Result<()> {
        self(archive, target, subdirectory)
    }
}

/// Join a relative path below `root`, rejecting anything that could escape it.
fn join_within(root: &Path, relative: &str) -> Option<PathBuf> {
    let rel = Path::new(relative);
    if relative.is_empty() || rel.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir)) {
        return None;
    }
    Some(root.join(rel))
}

/// One install into a package directory: recovery on start, staging, commit.
/// Scratch directories are removed when the session is dropped.
pub struct InstallSession<F: AtomicFsOps = NativeFs> {
    txn: DirectoryTransaction<F>,
    recovery: RecoveryReport,
}

impl InstallSession<NativeFs> {
    pub fn begin(package_dir: &Path, waiter: &mut dyn LockedFileWaiter) -> Result<Self, TransactionError> {
        Self::begin_with_fs(package_dir, NativeFs, waiter)
    }
}

impl<F: AtomicFsOps> InstallSession<F> {
    pub fn begin_with_fs(
        package_dir: &Path,
        fs: F,
        waiter: &mut dyn LockedFileWaiter,
    ) -> Result<Self, TransactionError> {
        let mut txn = DirectoryTransaction::with_fs(PackagePaths::new(package_dir), fs);
        let recovery = txn.recover(waiter)?;
        Ok(Self { txn, recovery })
    }

    pub fn paths(&self) -> &PackagePaths {
        self.txn.paths()
    }

    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn transaction(&self) -> &DirectoryTransaction<F> {
        &self.txn
    }

    /// Extract `archive` and stage the used part of it as the new app directory, or as
    /// `target` (a relative path) inside it.
    ///
    /// The used directory is `subdirectory` if given (a file there selects its parent),
    /// otherwise the single top-level directory when the archive has nothing else at
    /// its root, otherwise the whole extraction root.
    pub fn stage_archive(
        &mut self,
        extractor: &dyn ArchiveExtractor,
        archive: &Path,
        subdirectory: Option<&str>,
        target: Option<&str>,
    ) -> Result<(), TransactionError> {
        let paths = self.txn.paths().clone();
        let target_dir = match target {
            None => paths.new_app.clone(),
            Some(t) => join_within(&paths.new_app, t).ok_or_else(|| {
                TransactionError::InvalidSource(format!(
                    "target must be a relative path that does not escape the app directory, got '{t}'"
                ))
            })?,
        };
        force_delete_directory(&paths.extraction)?;
        fs::create_dir_all(&paths.extraction)
            .map_err(|e| FsError::io("create extraction directory", &paths.extraction, e))?;

        extractor
            .extract(archive, &paths.extraction, subdirectory)
            .map_err(TransactionError::Extraction)?;

        let used = extracted_subdirectory(&paths.extraction, subdirectory)?;
        debug!(used = %used.display(), "resolved source directory");

        if !target_dir.exists() {
            if let Some(parent) = target_dir.parent() {
                fs::create_dir_all(parent).map_err(|e| FsError::io("create directory", parent, e))?;
            }
            self.txn.fs().move_atomically(&used, &target_dir)?;
        } else {
            // several archives staged into one directory
            merge_directory_contents(self.txn.fs(), &used, &target_dir)?;
        }

        // remove anything unused from the extraction dir
        force_delete_directory(&paths.extraction)?;
        self.txn.mark_new_ready()
    }

    /// Stage a single non-archive file at `target_name` inside the new app directory.
    pub fn stage_file(&mut self, source: &Path, target_name: &str) -> Result<(), TransactionError> {
        let paths = self.txn.paths().clone();
        let target = join_within(&paths.new_app, target_name).ok_or_else(|| {
            TransactionError::InvalidSource(format!(
                "target must be a relative file path inside the app directory, got '{target_name}'"
            ))
        })?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| FsError::io("create directory", parent, e))?;
        }
        fs::copy(source, &target).map_err(|e| FsError::io("copy file", source, e))?;
        debug!(source = %source.display(), target = %target.display(), "staged file");
        self.txn.mark_new_ready()
    }

    /// Swap the staged app directory in. See `DirectoryTransaction::commit`.
    pub fn commit(&mut self, waiter: &mut dyn LockedFileWaiter) -> Result<ReplaceReport, TransactionError> {
        self.txn.commit(waiter)
    }
}

impl<F: AtomicFsOps> Drop for InstallSession<F> {
    fn drop(&mut self) {
        // the backup is not touched here; if it is still around, so is the reason it
        // could not be deleted
        let paths = self.txn.paths();
        for dir in [&paths.delete_tmp, &paths.extraction, &paths.new_app] {
            if let Err(e) = force_delete_directory(dir) {
                warn!(path = %dir.display(), "failed to remove installer scratch directory: {e}");
            }
        }
    }
}

fn extracted_subdirectory(root: &Path, subdirectory: Option<&str>) -> Result<PathBuf, TransactionError> {
    let Some(sub) = subdirectory else {
        let mut items = fs::read_dir(root)
            .map_err(|e| FsError::io("list extraction directory", root, e))?
            .take(2)
            .filter_map(Result::ok)
            .collect::<Vec<_>>();
        if items.len() == 1 && items[0].file_type().map(|t| t.is_dir()).unwrap_or(false) {
            debug!("archive root contains a single directory, using it instead of the root");
            return Ok(items.remove(0).path());
        }
        debug!("archive root contains multiple items, using the archive root directly");
        return Ok(root.to_path_buf());
    };

    let path = join_within(root, sub).ok_or_else(|| {
        TransactionError::InvalidSource(format!(
            "subdirectory must be a relative path that does not escape the archive, got '{sub}'"
        ))
    })?;
    let meta = fs::symlink_metadata(&path).map_err(|_| {
        TransactionError::InvalidSource(format!(
            "subdirectory '{sub}' does not exist inside the archive"
        ))
    })?;
    if meta.is_dir() {
        Ok(path)
    } else {
        // a single file was requested; use the directory it is in
        Ok(path.parent().unwrap_or(root).to_path_buf())
    }
}

fn merge_directory_contents<F: AtomicFsOps>(fs_ops: &F, src: &Path, dest: &Path) -> Result<(), TransactionError> {
    for item in fs::read_dir(src).map_err(|e| FsError::io("list directory", src, e))? {
        let item = item.map_err(|e| FsError::io("list directory", src, e))?;
        let target = dest.join(item.file_name());
        fs_ops.move_atomically(&item.path(), &target)?;
    }
    Ok(())
}
