//! Cache key validation. A key becomes a directory name, so it must be a single
//! path segment that is valid on every supported platform.

use crate::errors::CacheError;

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

fn is_reserved_dos_name(key: &str) -> bool {
    // `NUL.txt` is as reserved as `NUL`
    let stem = key.split('.').next().unwrap_or(key).trim_end();
    RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(stem))
}

pub fn validate_key(key: &str) -> Result<(), CacheError> {
    let invalid = || Err(CacheError::InvalidKey(key.to_string()));

    if key.is_empty() || key == "." || key == ".." {
        return invalid();
    }
    if key
        .chars()
        .any(|c| c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
    {
        return invalid();
    }
    if key.ends_with('.') || key.ends_with(' ') {
        return invalid();
    }
    if is_reserved_dos_name(key) {
        return invalid();
    }
    Ok(())
}
