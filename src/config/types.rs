//! Core configuration types.
//! - Config holds runtime settings with sensible defaults.
//! - LogLevel represents verbosity with simple parsing helpers.
//! - LockRetryPolicy bounds the spin on contended cache entry directories.
//! - PathConfig derives the on-disk cache layout from the cache root.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use super::paths;
use super::{
    DEFAULT_LOCK_RETRY_ATTEMPTS, DEFAULT_LOCK_RETRY_INTERVAL, DOWNLOAD_CACHE_DIR_NAME,
    DOWNLOAD_TMP_DIR_NAME,
};

/// Program-defined verbosity levels exposed to users/config.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Only errors
    Quiet,
    /// Informational output (default)
    #[default]
    Normal,
    /// More info (like verbose)
    Info,
    /// Debug/trace
    Debug,
}

impl LogLevel {
    /// Parse common string names into our LogLevel (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" | "error" | "none" => Some(LogLevel::Quiet),
            "normal" | "warn" => Some(LogLevel::Normal),
            "info" | "verbose" => Some(LogLevel::Info),
            "debug" | "trace" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Normal => "normal",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid log level: '{s}'"))
    }
}

/// How long to spin on a cache entry directory that another process holds open in an
/// incompatible mode (typically because it is being deleted).
///
/// The defaults (30 attempts, 1 ms apart) keep the total wait around 30 ms, which is
/// negligible for a user but long enough to ride out a concurrent delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for LockRetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_LOCK_RETRY_ATTEMPTS,
            interval: DEFAULT_LOCK_RETRY_INTERVAL,
        }
    }
}

impl LockRetryPolicy {
    /// Fail on the first conflict.
    pub fn no_retry() -> Self {
        Self {
            attempts: 0,
            interval: Duration::ZERO,
        }
    }
}

/// Runtime configuration, constructed once by the binary and passed down.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the cache; the download cache and its tmp directory live below it
    pub cache_root: PathBuf,
    /// Console verbosity
    pub log_level: LogLevel,
    /// Optional path to a log file
    pub log_file: Option<PathBuf>,
    pub lock_retry: LockRetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_root: paths::default_cache_root(),
            log_level: LogLevel::Normal,
            log_file: None,
            lock_retry: LockRetryPolicy::default(),
        }
    }
}

impl Config {
    /// Construct a Config with an explicit cache root; other fields use defaults.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Default::default()
        }
    }

    pub fn paths(&self) -> PathConfig {
        PathConfig::new(&self.cache_root)
    }
}

/// Directory layout below the cache root.
///
/// `download_tmp` must be on the same volume as `download_cache`: entries are
/// staged in it and moved into the cache with an atomic rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConfig {
    pub cache_root: PathBuf,
    pub download_cache: PathBuf,
    pub download_tmp: PathBuf,
}

impl PathConfig {
    pub fn new(cache_root: &Path) -> Self {
        Self {
            cache_root: cache_root.to_path_buf(),
            download_cache: cache_root.join(DOWNLOAD_CACHE_DIR_NAME),
            download_tmp: cache_root.join(DOWNLOAD_TMP_DIR_NAME),
        }
    }
}
