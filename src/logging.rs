//! Tracing initialization for the pog_cache binary.
//!
//! - Console verbosity follows LogLevel; `POG_CACHE_LOG` may refine it with EnvFilter
//!   directives (e.g. `pog_cache::cache=trace`).
//! - Console output goes to stderr so listings on stdout stay scriptable.
//! - A log file, when configured and not below a symlink, gets a non-blocking layer.

use anyhow::Result;
use chrono::Local;
use pog_cache::output as out;
use pog_cache::platform::open_log_file_secure_append;
use pog_cache::{default_log_path, path_has_symlink_ancestor, LogLevel};
use std::fmt as stdfmt;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt as tsfmt;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry;
use tracing_subscriber::Registry;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

const LOG_ENV_VAR: &str = "POG_CACHE_LOG";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Human-friendly timestamp formatter (DD/MM/YY HH:MM:SS)
struct LocalHumanTime;
impl FormatTime for LocalHumanTime {
    fn format_time(&self, w: &mut tsfmt::format::Writer<'_>) -> stdfmt::Result {
        write!(w, "{}", Local::now().format("%d/%m/%y %H:%M:%S"))
    }
}

#[inline]
fn to_level_filter(lvl: &LogLevel) -> LevelFilter {
    match lvl {
        LogLevel::Quiet => LevelFilter::ERROR,
        LogLevel::Normal => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
    }
}

fn build_filter(level: LevelFilter) -> EnvFilter {
    let base = EnvFilter::builder().with_default_directive(level.into());
    match std::env::var(LOG_ENV_VAR) {
        Ok(directives) if !directives.trim().is_empty() => base.parse_lossy(directives),
        _ => base.parse_lossy(""),
    }
}

/// Console layer on stderr, JSON or compact.
fn console_layer(json: bool) -> BoxedLayer {
    let layer = tsfmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(LocalHumanTime)
        .with_target(json);
    if json {
        layer.json().boxed()
    } else {
        layer.compact().boxed()
    }
}

fn file_layer(writer: NonBlocking, json: bool) -> BoxedLayer {
    let layer = tsfmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_timer(LocalHumanTime)
        .with_target(true)
        .with_thread_ids(true);
    if json {
        layer.json().boxed()
    } else {
        layer.compact().boxed()
    }
}

/// Open `path` for appending behind a non-blocking writer. `None` (after a short note on
/// stderr) when an ancestor is a symlink or the file cannot be opened.
fn maybe_open_non_blocking_writer(path: &Path) -> Option<(NonBlocking, WorkerGuard)> {
    match path_has_symlink_ancestor(path) {
        Ok(false) => {}
        Ok(true) => {
            eprintln!(
                "Refusing to enable file logging: ancestor of {} is a symlink.",
                path.display()
            );
            return None;
        }
        Err(e) => {
            eprintln!("Error checking log path {} for symlinks: {e}", path.display());
            return None;
        }
    }

    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    match open_log_file_secure_append(path) {
        Ok(file) => Some(tracing_appender::non_blocking(file)),
        Err(e) => {
            eprintln!("Failed to open log file {}: {e}", path.display());
            None
        }
    }
}

/// Initialize tracing. Returns the WorkerGuard of the file writer, if one was opened;
/// it must be held until shutdown so buffered lines are flushed.
pub fn init_tracing(
    lvl: &LogLevel,
    log_file: Option<&Path>,
    json: bool,
) -> Result<Option<WorkerGuard>> {
    let mut layers = vec![console_layer(json)];
    let mut guard = None;

    if let Some(path) = log_file {
        if let Some((writer, g)) = maybe_open_non_blocking_writer(path) {
            layers.push(file_layer(writer, json));
            guard = Some(g);
        } else {
            out::print_warn(&format!(
                "File logging to '{}' was not enabled; logs go to the console only.",
                path.display()
            ));
            if let Ok(def) = default_log_path() {
                out::print_info(&format!("The default log path is {}", def.display()));
            }
        }
    }

    registry()
        .with(layers)
        .with(build_filter(to_level_filter(lvl)))
        .try_init()?;
    Ok(guard)
}
