//! Default path helpers and symlink checks.
//! Determines OS-appropriate config/cache/log paths.

use dirs::{cache_dir, config_dir, data_dir};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::{APP_DIR_NAME, CONFIG_ENV_VAR};

/// Config path: `$POG_CACHE_CONFIG` if set, else the OS config dir.
/// A relative override is resolved against the current directory; a directory
/// override gets `config.xml` appended.
pub fn default_config_path() -> io::Result<PathBuf> {
    if let Some(p) = env::var_os(CONFIG_ENV_VAR) {
        let mut path = PathBuf::from(p);
        if path.is_relative() {
            path = env::current_dir()?.join(path);
        }
        if path.is_dir() {
            path.push("config.xml");
        }
        return Ok(path);
    }
    config_dir()
        .map(|base| base.join(APP_DIR_NAME).join("config.xml"))
        .or_else(|| {
            env::var_os("HOME").map(|h| {
                PathBuf::from(h)
                    .join(".config")
                    .join(APP_DIR_NAME)
                    .join("config.xml")
            })
        })
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no config directory available"))
}

/// OS-appropriate cache root (`<cache dir>/pog_cache`), falling back to a relative
/// directory if the platform reports none.
pub fn default_cache_root() -> PathBuf {
    cache_dir()
        .map(|base| base.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(APP_DIR_NAME).join("cache"))
}

/// OS-appropriate default log file path (data dir).
pub fn default_log_path() -> io::Result<PathBuf> {
    let base = data_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no data directory available"))?;
    // best-effort; opening the log reports the real error
    let _ = fs::create_dir_all(&base);
    Ok(base.join("pog_cache.log"))
}

/// Return true if any existing ancestor of `path` is a symlink.
pub fn path_has_symlink_ancestor(path: &Path) -> io::Result<bool> {
    let mut p = path.parent();
    while let Some(anc) = p {
        if anc.exists() {
            let meta = fs::symlink_metadata(anc)?;
            if meta.file_type().is_symlink() {
                return Ok(true);
            }
        }
        p = anc.parent();
    }
    Ok(false)
}
