//! CLI definition and parsing.
//! Defines Args and provides parse() for command-line handling.
//!
//! Notes:
//! - --debug is a shorthand for --log-level debug.
//! - CLI flags override values loaded from config.xml.

use chrono::{DateTime, Local, NaiveDate};
use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;
use std::time::SystemTime;

use crate::config::types::{Config, LogLevel};

/// Maintenance tool for the shared pog download cache and package directories.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Inspect and maintain the shared pog download cache")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Override the cache root (normally configured via XML).
    #[arg(long, global = true, value_hint = ValueHint::DirPath, help = "Override the cache root directory")]
    pub cache_root: Option<PathBuf>,

    /// Enable debug logging (equivalent to `--log-level debug`).
    #[arg(
        short = 'd',
        long,
        global = true,
        help = "Enable debug logging (shorthand for --log-level debug)"
    )]
    pub debug: bool,

    /// Set log level. One of: quiet, normal, info, debug.
    #[arg(long, global = true, help = "Set log level: quiet, normal, info, debug")]
    pub log_level: Option<String>,

    /// Print where pog_cache will look for the config file (or POG_CACHE_CONFIG if set), then exit.
    #[arg(long, help = "Print the config file location used by pog_cache and exit")]
    pub print_config: bool,

    /// Emit logs and listings in structured JSON.
    #[arg(long, global = true, help = "Emit logs and listings in structured JSON")]
    pub json: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List cache entries with size, last use and the packages that used them.
    List,
    /// Remove cache entries not used in the last N days, or since a date.
    Clear {
        /// Only remove entries last used more than this many days ago.
        #[arg(long, default_value_t = 0)]
        days: u64,
        /// Only remove entries last used before this date (YYYY-MM-DD, local midnight,
        /// or RFC 3339).
        #[arg(long, value_name = "DATE", conflicts_with = "days", value_parser = parse_cutoff_date)]
        before: Option<SystemTime>,
        /// Do not ask for confirmation.
        #[arg(long, short = 'f')]
        force: bool,
    },
    /// Delete a single cache entry by key.
    Delete {
        #[arg(value_name = "KEY")]
        key: String,
    },
    /// Recover a package directory after an interrupted install.
    Recover {
        #[arg(value_name = "PACKAGE_DIR", value_hint = ValueHint::DirPath)]
        package_dir: PathBuf,
    },
    /// List files under a directory that are held open by running programs.
    Locked {
        #[arg(value_name = "DIR", value_hint = ValueHint::DirPath)]
        dir: PathBuf,
    },
}

impl Args {
    /// Effective log level derived from flags.
    /// Precedence: --debug > --log-level value > None (use config default).
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        if self.debug {
            return Some(LogLevel::Debug);
        }
        self.log_level.as_deref().and_then(LogLevel::parse)
    }

    /// Apply CLI overrides to a loaded Config (in-place). No-ops for unset flags.
    pub fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(root) = &self.cache_root {
            cfg.cache_root = root.clone();
        }
        if let Some(level) = self.effective_log_level() {
            cfg.log_level = level;
        }
    }
}

/// Parse a `--before` cutoff: a plain date means local midnight at its start.
pub fn parse_cutoff_date(s: &str) -> Result<SystemTime, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.into());
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("expected YYYY-MM-DD or an RFC 3339 timestamp, got '{s}'"))?;
    date.and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map(SystemTime::from)
        .ok_or_else(|| format!("'{s}' has no local midnight"))
}

pub fn parse() -> Args {
    Args::parse()
}
