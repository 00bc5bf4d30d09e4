//! Process-wide shutdown coordination.
//! A flag set by the ctrlc handler so long-running loops (cache clearing, waiting on
//! locked files) can stop between steps.
//!
//! Relaxed atomics are sufficient for a one-way "stop" flag, and `request()` is safe
//! to call from signal handlers.

use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Request a cooperative shutdown (idempotent).
#[inline]
pub fn request() {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

#[inline]
pub fn is_requested() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}

/// Clear the flag; tests share one process.
#[inline]
pub fn reset() {
    SHUTDOWN.store(false, Ordering::Relaxed);
}
