//! XML configuration support.
//! - Loads settings from config.xml (quick_xml).
//! - Creates a secure template if missing (unless POG_CACHE_CONFIG is set).
//!
//! Notes:
//! - This module only reads/writes the config file; directory validation happens elsewhere.
//! - Unknown XML fields are a hard error to surface misconfigurations early.

use anyhow::{Context, Result};
use quick_xml::de::from_str as from_xml_str;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::paths::{default_cache_root, default_config_path, path_has_symlink_ancestor};
use super::types::{Config, LockRetryPolicy, LogLevel};
use super::{CONFIG_ENV_VAR, DEFAULT_LOCK_RETRY_ATTEMPTS, DEFAULT_LOCK_RETRY_INTERVAL};

use crate::platform::write_config_secure_new_0600;

/// Struct mirroring the XML config for deserialization.
#[derive(Debug, Deserialize)]
#[serde(rename = "config")]
#[serde(deny_unknown_fields)]
struct XmlConfig {
    cache_root: Option<String>,
    log_level: Option<String>,
    log_file: Option<String>,
    #[serde(default, deserialize_with = "de_u64_trimmed_opt")]
    lock_retry_attempts: Option<u64>,
    #[serde(default, deserialize_with = "de_u64_trimmed_opt")]
    lock_retry_interval_ms: Option<u64>,
}

// Custom deserializer that trims surrounding whitespace for optional u64
fn de_u64_trimmed_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| s.trim().parse::<u64>().ok()))
}

fn non_empty_trimmed(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

// Map XmlConfig -> Config; missing or empty fields keep their defaults.
fn xml_to_config(parsed: XmlConfig) -> Config {
    let mut cfg = Config::default();

    if let Some(root) = non_empty_trimmed(parsed.cache_root.as_deref()) {
        cfg.cache_root = PathBuf::from(root);
    }
    if let Some(level) = non_empty_trimmed(parsed.log_level.as_deref()).and_then(LogLevel::parse) {
        cfg.log_level = level;
    }
    cfg.log_file = non_empty_trimmed(parsed.log_file.as_deref()).map(PathBuf::from);

    cfg.lock_retry = LockRetryPolicy {
        attempts: parsed
            .lock_retry_attempts
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(DEFAULT_LOCK_RETRY_ATTEMPTS),
        interval: parsed
            .lock_retry_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_LOCK_RETRY_INTERVAL),
    };
    cfg
}

/// Load a Config from a specific XML file path.
pub fn load_config_from_xml_path(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read config xml '{}'", path.display()))?;
    let parsed: XmlConfig = from_xml_str(&contents)
        .with_context(|| format!("parse config xml '{}'", path.display()))?;
    debug!("Loaded config from {}", path.display());
    Ok(xml_to_config(parsed))
}

/// Load the config from `$POG_CACHE_CONFIG` or the default path.
/// Returns Ok(None) if the file does not exist.
pub fn load_config() -> Result<Option<Config>> {
    let path = default_config_path().context("resolve config path")?;
    if !path.exists() {
        debug!("No config file at {}", path.display());
        return Ok(None);
    }
    load_config_from_xml_path(&path).map(Some)
}

/// Create default template config file and parent directory.
/// Refuses to write below a symlinked ancestor.
pub fn create_template_config(path: &Path) -> Result<()> {
    if path_has_symlink_ancestor(path)? {
        anyhow::bail!(
            "Refusing to create config: ancestor of {} is a symlink",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create '{}'", parent.display()))?;
    }

    let content = format!(
        "<!--\n  pog_cache configuration (XML)\n\n    cache_root              -> directory holding download_cache/ and download_tmp/\n    log_level               -> quiet | normal | info | debug\n    log_file                -> path to log file (optional)\n    lock_retry_attempts     -> retries on a cache entry being deleted concurrently\n    lock_retry_interval_ms  -> delay between those retries\n\n  CLI flags override XML values.\n-->\n<config>\n  <cache_root>{}</cache_root>\n  <log_level>normal</log_level>\n  <log_file></log_file>\n  <lock_retry_attempts>{}</lock_retry_attempts>\n  <lock_retry_interval_ms>{}</lock_retry_interval_ms>\n</config>\n",
        default_cache_root().display(),
        DEFAULT_LOCK_RETRY_ATTEMPTS,
        DEFAULT_LOCK_RETRY_INTERVAL.as_millis()
    );

    write_config_secure_new_0600(path, content.as_bytes())
        .with_context(|| format!("write config '{}'", path.display()))?;
    info!("Created template config at {}", path.display());
    Ok(())
}

/// Create the default config if POG_CACHE_CONFIG is not set; return the created path
/// so the CLI can inform the user.
pub fn ensure_default_config_exists() -> Option<PathBuf> {
    if env::var_os(CONFIG_ENV_VAR).is_some() {
        return None;
    }
    let cfg_path = default_config_path().ok()?;
    if cfg_path.exists() {
        return None;
    }
    match create_template_config(&cfg_path) {
        Ok(()) => Some(cfg_path),
        Err(e) => {
            debug!("Failed to create template config at {}: {e:#}", cfg_path.display());
            None
        }
    }
}
