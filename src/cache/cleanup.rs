//! Age-based cache clearing.

use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use super::{CacheEntryInfo, SharedFileCache};
use crate::errors::CacheError;
use crate::fs_ops::AtomicFsOps;
use crate::shutdown;

/// Asked once, with every candidate (sorted by size, largest first) and their total size.
pub trait ConfirmClear {
    fn confirm(&mut self, entries: &[CacheEntryInfo], total_size: u64) -> bool;
}

impl<T: FnMut(&[CacheEntryInfo], u64) -> bool> ConfirmClear for T {
    fn confirm(&mut self, entries: &[CacheEntryInfo], total_size: u64) -> bool {
        self(entries, total_size)
    }
}

#[derive(Debug, Default, Clone)]
pub struct ClearReport {
    /// Entries older than the cutoff.
    pub candidates: usize,
    pub removed: usize,
    pub freed_bytes: u64,
    /// Keys that could not be removed because another process is reading them.
    pub skipped_in_use: Vec<String>,
    /// Keys of structurally invalid entries that were deleted on the way.
    pub invalid_removed: Vec<String>,
    /// The confirmation was declined.
    pub declined: bool,
    /// A shutdown was requested before all candidates were removed.
    pub interrupted: bool,
}

/// Cutoff for entries that were not used in the last `days` days.
pub fn cutoff_days_ago(days: u64) -> SystemTime {
    SystemTime::now()
        .checked_sub(Duration::from_secs(days.saturating_mul(24 * 60 * 60)))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Remove entries last used before `cutoff`, after `confirm` agrees.
///
/// Invalid entries are always removed. Entries in use are reported and skipped; the
/// rest are still removed.
pub fn clear_older_than<F: AtomicFsOps>(
    cache: &SharedFileCache<F>,
    cutoff: SystemTime,
    confirm: &mut dyn ConfirmClear,
) -> Result<ClearReport, CacheError> {
    let mut report = ClearReport::default();

    let mut invalid = Vec::new();
    let entries = cache.enumerate_entries(|e| {
        if let Some(key) = e.entry_key() {
            warn!("Invalid cache entry encountered, deleting: {e}");
            invalid.push(key.to_string());
        }
    })?;
    for key in invalid {
        match cache.delete_entry(&key) {
            Ok(()) => report.invalid_removed.push(key),
            Err(CacheError::InUse(_)) => {
                warn!(key = %key, "cannot delete the invalid entry, it is currently in use");
            }
            Err(e) => return Err(e),
        }
    }

    let mut candidates: Vec<CacheEntryInfo> =
        entries.into_iter().filter(|e| e.last_use_time < cutoff).collect();
    report.candidates = candidates.len();
    if candidates.is_empty() {
        info!("no cache entries older than the cutoff, nothing to remove");
        return Ok(report);
    }

    candidates.sort_by(|a, b| b.size.cmp(&a.size));
    let total: u64 = candidates.iter().map(|e| e.size).sum();
    if !confirm.confirm(&candidates, total) {
        report.declined = true;
        return Ok(report);
    }

    for entry in &candidates {
        if shutdown::is_requested() {
            report.interrupted = true;
            break;
        }
        match cache.delete_entry_info(entry) {
            Ok(()) => {
                report.removed += 1;
                report.freed_bytes += entry.size;
            }
            Err(CacheError::InUse(_)) => {
                warn!(
                    key = %entry.key,
                    "Cannot clear a cache entry for '{}', it is currently in use by another process",
                    entry.owners()
                );
                report.skipped_in_use.push(entry.key.clone());
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        removed = report.removed,
        freed_bytes = report.freed_bytes,
        "cleared cache entries"
    );
    Ok(report)
}
