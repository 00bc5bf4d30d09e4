//! Application orchestrator.
//! Loads/merges config, initializes logging, installs signal handlers, validates the
//! cache layout and dispatches the subcommand.

use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::{debug, error, info};

use pog_cache::cache::cleanup::{clear_older_than, cutoff_days_ago};
use pog_cache::cli::{Args, Command};
use pog_cache::config::{ensure_default_config_exists, load_config, CONFIG_ENV_VAR};
use pog_cache::install::transaction::RecoveryReport;
use pog_cache::output as out;
use pog_cache::{
    default_config_path, shutdown, AtomicFsOps, CacheEntryInfo, CacheError, Config,
    DirectoryTransaction, FsError, LockedFileWaiter, NativeFs, PackagePaths, SharedFileCache,
    TransactionError, WaitDecision,
};

use crate::logging::init_tracing;

/// Run the CLI application.
pub fn run(args: Args) -> Result<()> {
    // Handle --print-config before logging init
    if args.print_config {
        if let Ok(cfg_env) = std::env::var(CONFIG_ENV_VAR) {
            out::print_info(&format!("Using {CONFIG_ENV_VAR} (explicit):\n  {cfg_env}\n"));
            out::print_info(&format!(
                "To override, unset {CONFIG_ENV_VAR} or set it to another file."
            ));
            return Ok(());
        }
        match default_config_path() {
            Ok(p) => {
                out::print_info(&format!("Default pog_cache config path:\n  {}\n", p.display()));
                if p.exists() {
                    out::print_info("A config file already exists at that location.");
                } else {
                    out::print_info("No config file exists there yet. Run without --print-config to create a template.");
                }
            }
            Err(e) => {
                out::print_error(&format!("Could not determine a default config path: {e}"));
            }
        }
        return Ok(());
    }

    if let Some(path) = ensure_default_config_exists() {
        out::print_success(&format!(
            "A template pog_cache config was written to: {}",
            path.display()
        ));
        out::print_info(&format!(
            "Edit it to move the cache root or change the log level. To use a different location set {CONFIG_ENV_VAR}."
        ));
    }

    // Config file values first, CLI flags win.
    let mut cfg = load_config()?.unwrap_or_default();
    args.apply_overrides(&mut cfg);

    // Initialize logging and capture the guard so we can drop it on signal
    let guard_opt = init_tracing(&cfg.log_level, cfg.log_file.as_deref(), args.json).map_err(|e| {
        out::print_error(&format!("Failed to initialize logging: {e}"));
        e
    })?;

    // Guard needs to be dropped on SIGINT to flush logs
    let guard_slot = Arc::new(Mutex::new(guard_opt));
    {
        let guard_slot = Arc::clone(&guard_slot);
        ctrlc::set_handler(move || {
            shutdown::request();
            out::print_warn("Received interrupt; stopping after the current step...");
            if let Ok(mut g) = guard_slot.lock() {
                let _ = g.take(); // drop guard here to flush tracing_appender
            }
        })
        .context("install signal handler")?;
    }

    debug!("Starting pog_cache: {:?}", args);

    let result = dispatch(&args, &cfg);
    if let Err(e) = &result {
        report_error(e);
    }

    // Ensure logs are flushed before exit
    if let Ok(mut g) = guard_slot.lock() {
        let _ = g.take();
    }

    result
}

fn dispatch(args: &Args, cfg: &Config) -> Result<()> {
    let command = args.command.clone().unwrap_or(Command::List);
    match command {
        Command::List => {
            let cache = open_cache(cfg)?;
            list_entries(&cache, args.json)
        }
        Command::Clear { days, before, force } => {
            let cache = open_cache(cfg)?;
            let (cutoff, since) = match before {
                Some(cutoff) => (cutoff, format!("last used before {}", format_time(cutoff))),
                None => (cutoff_days_ago(days), format!("older than {days} days")),
            };
            clear(&cache, cutoff, &since, force)
        }
        Command::Delete { key } => {
            let cache = open_cache(cfg)?;
            match cache.delete_entry(&key) {
                Ok(()) => {
                    out::print_success(&format!("Deleted cache entry '{key}'"));
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }
        Command::Recover { package_dir } => recover(&package_dir),
        Command::Locked { dir } => {
            let locked = NativeFs.locked_entries(&dir)?;
            if locked.is_empty() {
                out::print_info(&format!("No locked files under {}", dir.display()));
            }
            for p in locked {
                out::print_user(&p.display().to_string());
            }
            Ok(())
        }
    }
}

fn open_cache(cfg: &Config) -> Result<SharedFileCache> {
    let paths = cfg.validate()?;
    debug!(
        cache = %paths.download_cache.display(),
        tmp = %paths.download_tmp.display(),
        "using cache directories"
    );
    Ok(SharedFileCache::from_paths(&paths, cfg.lock_retry))
}

fn list_entries(cache: &SharedFileCache, json: bool) -> Result<()> {
    let mut entries = cache.enumerate_entries(|e| {
        out::print_warn(&format!("{e}"));
    })?;
    entries.sort_by(|a, b| b.last_use_time.cmp(&a.last_use_time));

    if json {
        let values: Vec<serde_json::Value> = entries.iter().map(entry_json).collect();
        out::print_user(&serde_json::to_string_pretty(&values)?);
        return Ok(());
    }
    if entries.is_empty() {
        out::print_info("The download cache is empty.");
        return Ok(());
    }
    for e in &entries {
        out::print_user(&format!(
            "{}\t{}\t{}\t{}",
            e.key,
            human_size(e.size),
            format_time(e.last_use_time),
            e.owners()
        ));
    }
    let total: u64 = entries.iter().map(|e| e.size).sum();
    out::print_info(&format!("{} entries, {} total", entries.len(), human_size(total)));
    Ok(())
}

fn entry_json(e: &CacheEntryInfo) -> serde_json::Value {
    serde_json::json!({
        "key": e.key,
        "path": e.path,
        "size": e.size,
        "last_use_time": format_time(e.last_use_time),
        "source_packages": e.source_packages,
    })
}

fn clear(cache: &SharedFileCache, cutoff: SystemTime, since: &str, force: bool) -> Result<()> {
    let mut confirm = |entries: &[CacheEntryInfo], total: u64| {
        for e in entries {
            out::print_user(&format!("  {}\t{}\t{}", e.key, human_size(e.size), e.owners()));
        }
        if force {
            return true;
        }
        prompt_yes_no(&format!(
            "Remove {} cache entries ({})?",
            entries.len(),
            human_size(total)
        ))
    };
    let report = clear_older_than(cache, cutoff, &mut confirm)?;

    for key in &report.skipped_in_use {
        out::print_warn(&format!("Skipped '{key}', it is in use by another process"));
    }
    if report.declined {
        out::print_info("Nothing removed.");
    } else if report.candidates == 0 {
        out::print_info(&format!("No cache entries {since}."));
    } else {
        out::print_success(&format!(
            "Removed {} of {} entries, freed {}",
            report.removed,
            report.candidates,
            human_size(report.freed_bytes)
        ));
    }
    if report.interrupted {
        out::print_warn("Clearing was interrupted before all entries were removed.");
    }
    Ok(())
}

/// Interactive waiter: on conflicts print the locked files and wait for Enter.
struct PromptWaiter;

impl LockedFileWaiter for PromptWaiter {
    fn wait(&mut self, dir: &Path, locked: &[PathBuf]) -> WaitDecision {
        print_locked(dir, locked);
        if shutdown::is_requested() {
            return WaitDecision::Cancel;
        }
        if prompt_yes_no("Close the programs above and retry?") {
            WaitDecision::Retry
        } else {
            WaitDecision::Cancel
        }
    }

    fn notify(&mut self, dir: &Path, locked: &[PathBuf]) {
        print_locked(dir, locked);
    }
}

fn print_locked(dir: &Path, locked: &[PathBuf]) {
    out::print_warn(&format!("{} is in use by another program", dir.display()));
    for p in locked {
        out::print_user(&format!("  {}", p.display()));
    }
}

fn recover(package_dir: &Path) -> Result<()> {
    let mut txn = DirectoryTransaction::new(PackagePaths::new(package_dir));
    let report: RecoveryReport = txn.recover(&mut PromptWaiter)?;
    if report.is_noop() {
        out::print_info(&format!("{} is consistent, nothing to recover.", package_dir.display()));
        return Ok(());
    }
    for p in &report.removed_orphans {
        info!(path = %p.display(), "removed leftover directory");
    }
    if report.restored_backup {
        out::print_success("Restored the previous app directory from its backup.");
    } else {
        out::print_success("Removed leftovers of an interrupted install.");
    }
    Ok(())
}

fn prompt_yes_no(question: &str) -> bool {
    print!("{question} [y/N] ");
    let _ = io::stdout().flush();
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => false,
        Ok(_) => matches!(line.trim(), "y" | "Y" | "yes" | "Yes"),
    }
}

fn format_time(t: SystemTime) -> String {
    let dt: chrono::DateTime<chrono::Local> = t.into();
    dt.format("%Y-%m-%d %H:%M").to_string()
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn report_error(e: &anyhow::Error) {
    if let Some(ce) = e.downcast_ref::<CacheError>() {
        let code = ce.code();
        match ce {
            CacheError::InUse(key) => {
                error!(code, kind = "in_use", key = %key, "Cache entry is in use by another process")
            }
            CacheError::InvalidKey(key) => {
                error!(code, kind = "invalid_key", key = %key, "Not a valid cache key")
            }
            CacheError::InvalidEntry { key, reason } => {
                error!(code, kind = "invalid_entry", key = %key, %reason, "Cache entry is invalid")
            }
            _ => error!(code, kind = "cache_error", error = %ce, "Cache operation failed"),
        }
    } else if let Some(te) = e.downcast_ref::<TransactionError>() {
        let code = te.code();
        match te {
            TransactionError::Cancelled(path) => {
                error!(code, kind = "cancelled", path = %path.display(), "Cancelled while files were in use")
            }
            TransactionError::RollbackFailed { backup, .. } => {
                error!(code, kind = "rollback_failed", backup = %backup.display(), error = %te, "Package directory needs manual repair")
            }
            _ => error!(code, kind = "transaction_error", error = %te, "Recovery failed"),
        }
    } else if let Some(fe) = e.downcast_ref::<FsError>() {
        error!(code = fe.code(), kind = "fs_error", error = %fe, "Filesystem operation failed");
    } else {
        error!(error = ?e, "Command failed");
    }
}
