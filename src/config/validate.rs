//! Config validation logic.
//! Creates the cache layout if missing, probes writability, and checks that the
//! cache and its tmp directory allow atomic renames between them.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, error, info};

use crate::platform::same_volume;

use super::types::{Config, PathConfig};

impl Config {
    /// Validate the cache root and create `download_cache`/`download_tmp` below it.
    /// Returns the canonicalized layout.
    pub fn validate(&self) -> Result<PathConfig> {
        let paths = self.paths();

        ensure_dir_is_or_create(&paths.cache_root, "cache_root")?;
        ensure_dir_is_or_create(&paths.download_cache, "download_cache")?;
        ensure_dir_is_or_create(&paths.download_tmp, "download_tmp")?;
        ensure_writable(&paths.download_cache, "download_cache")?;
        ensure_writable(&paths.download_tmp, "download_tmp")?;

        // dunce keeps Windows paths free of the \\?\ prefix
        let canonical = PathConfig {
            cache_root: dunce::canonicalize(&paths.cache_root)
                .with_context(|| format!("resolve '{}'", paths.cache_root.display()))?,
            download_cache: dunce::canonicalize(&paths.download_cache)
                .with_context(|| format!("resolve '{}'", paths.download_cache.display()))?,
            download_tmp: dunce::canonicalize(&paths.download_tmp)
                .with_context(|| format!("resolve '{}'", paths.download_tmp.display()))?,
        };

        if !same_volume(&canonical.download_cache, &canonical.download_tmp)? {
            error!(
                "download_tmp '{}' is on a different volume than download_cache '{}'",
                canonical.download_tmp.display(),
                canonical.download_cache.display()
            );
            bail!(
                "download_tmp '{}' must be on the same volume as download_cache '{}'",
                canonical.download_tmp.display(),
                canonical.download_cache.display()
            );
        }

        info!(
            "Config validated: cache='{}' tmp='{}' log_file='{}'",
            canonical.download_cache.display(),
            canonical.download_tmp.display(),
            self.log_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<none>".into())
        );
        Ok(canonical)
    }
}

/// Ensure directory exists (create if missing). If exists, it must be a directory.
fn ensure_dir_is_or_create(path: &Path, name: &str) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            error!("{name} exists but isn't a directory: {}", path.display());
            bail!("{name} exists but isn't a directory: {}", path.display());
        }
    } else {
        fs::create_dir_all(path).with_context(|| {
            format!("Failed to create {name} directory '{}'", path.display())
        })?;
        info!("Created {name} directory: {}", path.display());
    }
    Ok(())
}

/// Ensure directory is writable using a non-destructive probe file.
fn ensure_writable(path: &Path, name: &str) -> Result<()> {
    let probe = crate::fs_ops::new_scratch_path(path).with_extension("probe");
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&probe)
        .with_context(|| {
            format!("Cannot write to {name} '{}'; check permissions", path.display())
        })?;
    let _ = fs::remove_file(&probe);
    debug!("{name} writable: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_creates_layout() {
        let td = tempfile::tempdir().unwrap();
        let cfg = Config::new(td.path().join("root"));
        let paths = cfg.validate().unwrap();
        assert!(paths.download_cache.is_dir());
        assert!(paths.download_tmp.is_dir());
        assert!(paths.download_cache.ends_with("download_cache"));
    }

    #[test]
    fn validate_rejects_file_as_root() {
        let td = tempfile::tempdir().unwrap();
        let f = td.path().join("root");
        fs::write(&f, "").unwrap();
        assert!(Config::new(&f).validate().is_err());
    }
}
