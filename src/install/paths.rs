//! Reserved directory names inside a package directory.

use std::path::{Path, PathBuf};

/// Live app directory.
pub const APP_DIR_NAME: &str = "app";
/// The previous app directory while it is being replaced.
pub const APP_BACKUP_DIR_NAME: &str = ".POG_INTERNAL_app_old";
/// Archives are extracted here before the used subdirectory is moved to the new app dir.
pub const TMP_EXTRACTION_DIR_NAME: &str = ".POG_INTERNAL_install_tmp";
/// The new app directory, before it is swapped in.
pub const NEW_APP_DIR_NAME: &str = ".POG_INTERNAL_app_new";
/// Landing zone for directories that are deleted atomically.
pub const TMP_DELETE_DIR_NAME: &str = ".POG_INTERNAL_delete_tmp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagePaths {
    pub root: PathBuf,
    pub app: PathBuf,
    pub backup: PathBuf,
    pub new_app: PathBuf,
    pub extraction: PathBuf,
    pub delete_tmp: PathBuf,
}

impl PackagePaths {
    pub fn new(package_dir: impl Into<PathBuf>) -> Self {
        let root = package_dir.into();
        Self {
            app: root.join(APP_DIR_NAME),
            backup: root.join(APP_BACKUP_DIR_NAME),
            new_app: root.join(NEW_APP_DIR_NAME),
            extraction: root.join(TMP_EXTRACTION_DIR_NAME),
            delete_tmp: root.join(TMP_DELETE_DIR_NAME),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scratch directories that only survive an interrupted install.
    pub fn orphan_candidates(&self) -> [&Path; 3] {
        [&self.extraction, &self.new_app, &self.delete_tmp]
    }

    /// Any internal directory is present, so an earlier install was interrupted.
    pub fn needs_recovery(&self) -> bool {
        self.backup.exists() || self.orphan_candidates().iter().any(|p| p.exists())
    }
}
