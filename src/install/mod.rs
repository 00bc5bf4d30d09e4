//! Installing into a package directory: staging a new `app` directory and swapping it
//! in with rollback and crash recovery.

pub mod extract;
pub mod paths;
pub mod transaction;
pub mod waiter;

pub use extract::{ArchiveExtractor, InstallSession};
pub use paths::PackagePaths;
pub use transaction::{DirectoryTransaction, RecoveryReport, ReplaceReport, TransactionState};
pub use waiter::{BoundedRetry, LockedFileWaiter, NoWait, WaitDecision};
