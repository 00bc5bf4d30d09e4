//! Config module.
//! Provides configuration types, default paths, XML loading, and validation.

pub mod paths;
pub mod types;
mod validate;
pub mod xml;

use std::time::Duration;

pub use paths::{default_cache_root, default_config_path, default_log_path};
pub use types::{Config, LockRetryPolicy, LogLevel, PathConfig};
pub use xml::{create_template_config, ensure_default_config_exists, load_config, load_config_from_xml_path};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV_VAR: &str = "POG_CACHE_CONFIG";
pub const APP_DIR_NAME: &str = "pog_cache";

pub const DOWNLOAD_CACHE_DIR_NAME: &str = "download_cache";
pub const DOWNLOAD_TMP_DIR_NAME: &str = "download_tmp";

pub const DEFAULT_LOCK_RETRY_ATTEMPTS: u32 = 30;
pub const DEFAULT_LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(1);
