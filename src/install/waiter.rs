//! Strategies for waiting on files locked by running programs.
//!
//! Replacing an app directory cannot proceed while a program inside it runs, and only
//! a human closing that program resolves it. The transaction therefore does not time
//! out; it asks a `LockedFileWaiter` after every failed attempt.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitDecision {
    /// Try again (the user says the programs are closed).
    Retry,
    /// Give up; the transaction fails with `Cancelled`.
    Cancel,
}

pub trait LockedFileWaiter {
    /// Called each time `dir` could not be moved. `locked` lists the files known to be
    /// open, and may be empty when the lock could not be attributed to a file.
    fn wait(&mut self, dir: &Path, locked: &[PathBuf]) -> WaitDecision;

    /// Non-blocking notice that `dir` is currently in use, so the user can close the
    /// programs while other work proceeds.
    fn notify(&mut self, dir: &Path, locked: &[PathBuf]) {
        let _ = (dir, locked);
    }
}

impl<T: FnMut(&Path, &[PathBuf]) -> WaitDecision> LockedFileWaiter for T {
    fn wait(&mut self, dir: &Path, locked: &[PathBuf]) -> WaitDecision {
        self(dir, locked)
    }
}

/// Cancel on the first conflict; for non-interactive runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWait;

impl LockedFileWaiter for NoWait {
    fn wait(&mut self, dir: &Path, locked: &[PathBuf]) -> WaitDecision {
        debug!(dir = %dir.display(), locked = locked.len(), "directory in use, not waiting");
        WaitDecision::Cancel
    }
}

/// Sleep and retry a fixed number of times, then cancel.
#[derive(Debug, Clone)]
pub struct BoundedRetry {
    remaining: u32,
    interval: Duration,
    waits: u32,
}

impl BoundedRetry {
    pub fn new(max_retries: u32, interval: Duration) -> Self {
        Self {
            remaining: max_retries,
            interval,
            waits: 0,
        }
    }

    /// How many times `wait` was called so far.
    pub fn waits(&self) -> u32 {
        self.waits
    }
}

impl LockedFileWaiter for BoundedRetry {
    fn wait(&mut self, dir: &Path, _locked: &[PathBuf]) -> WaitDecision {
        self.waits += 1;
        if self.remaining == 0 {
            return WaitDecision::Cancel;
        }
        self.remaining -= 1;
        debug!(dir = %dir.display(), remaining = self.remaining, "directory in use, retrying");
        thread::sleep(self.interval);
        WaitDecision::Retry
    }
}
