//! Rolling file logs for master stores.
//!
//! # Responsibility
//! - Start one `flexi_logger` backend per process from a [`LogConfig`].
//! - Provide the line hygiene helpers used by store and notifier logs.
//!
//! # Invariants
//! - Store logs carry ids, tokens, counts and durations, never entity payloads.
//! - Starting twice with the same settings is a no-op; different settings
//!   are rejected instead of silently ignored.
//! - Nothing here panics.

use crate::config::LogConfig;
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "chronomaster";
const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;
const KEEP_ROTATED_FILES: usize = 5;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

/// Settings of the running logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingStatus {
    pub level: LevelFilter,
    pub directory: PathBuf,
}

struct ActiveLogger {
    status: LoggingStatus,
    _handle: LoggerHandle,
}

/// Starts logging from `config`.
///
/// Returns `Ok(false)` when `config.directory` is unset and nothing was
/// started.
pub fn init_logging_from(config: &LogConfig) -> Result<bool, String> {
    let Some(directory) = config.directory.as_deref() else {
        return Ok(false);
    };
    init_logging(&config.level, directory)?;
    Ok(true)
}

/// Starts rolling file logging at `level` under the absolute `directory`.
///
/// # Errors
/// - Unknown level names.
/// - Empty or relative directories, or ones that cannot be created.
/// - Logging already running with a different level or directory.
pub fn init_logging(level: &str, directory: &str) -> Result<(), String> {
    let wanted = LoggingStatus {
        level: parse_level(level)?,
        directory: absolute_dir(directory)?,
    };

    let active = ACTIVE.get_or_try_init(|| start_logger(&wanted))?;
    if active.status != wanted {
        return Err(format!(
            "logging already running at level={} dir=`{}`; refusing level={} dir=`{}`",
            active.status.level,
            active.status.directory.display(),
            wanted.level,
            wanted.directory.display()
        ));
    }
    Ok(())
}

/// Level and directory of the running logger, if any.
pub fn logging_status() -> Option<LoggingStatus> {
    ACTIVE.get().map(|active| active.status.clone())
}

/// `debug` in debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn start_logger(status: &LoggingStatus) -> Result<ActiveLogger, String> {
    std::fs::create_dir_all(&status.directory).map_err(|err| {
        format!(
            "cannot create log directory `{}`: {err}",
            status.directory.display()
        )
    })?;

    let handle = Logger::try_with_str(status.level.to_string().to_ascii_lowercase())
        .map_err(|err| format!("invalid log level `{}`: {err}", status.level))?
        .log_to_file(
            FileSpec::default()
                .directory(status.directory.as_path())
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(ROTATE_AT_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(KEEP_ROTATED_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| format!("cannot start logger: {err}"))?;

    install_panic_hook();
    info!(
        "event=logging_init module=logging status=ok level={} log_dir={} version={}",
        status.level,
        status.directory.display(),
        env!("CARGO_PKG_VERSION")
    );

    Ok(ActiveLogger {
        status: status.clone(),
        _handle: handle,
    })
}

fn parse_level(level: &str) -> Result<LevelFilter, String> {
    let normalized = level.trim().to_ascii_lowercase();
    let name = if normalized == "warning" {
        "warn"
    } else {
        normalized.as_str()
    };
    match name.parse::<LevelFilter>() {
        Ok(LevelFilter::Off) | Err(_) => Err(format!(
            "unsupported log level `{}`; expected trace|debug|info|warn|error",
            level.trim()
        )),
        Ok(filter) => Ok(filter),
    }
}

fn absolute_dir(directory: &str) -> Result<PathBuf, String> {
    let trimmed = directory.trim();
    if trimmed.is_empty() {
        return Err("log directory cannot be empty".to_string());
    }
    let path = Path::new(trimmed);
    if !path.is_absolute() {
        return Err(format!("log directory must be absolute, got `{trimmed}`"));
    }
    Ok(path.to_path_buf())
}

fn install_panic_hook() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info.location().map_or_else(
            || "unknown".to_string(),
            |loc| format!("{}:{}", loc.file(), loc.line()),
        );
        error!(
            "event=panic_captured module=logging status=error location={} payload={}",
            location,
            panic_payload_summary(panic_info.payload())
        );
        previous(panic_info);
    }));
}

/// Collapses `value` onto one line and caps it at `max_chars`.
pub(crate) fn sanitize_message(value: &str, max_chars: usize) -> String {
    let single_line = value.replace(['\n', '\r'], " ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let mut capped: String = single_line.chars().take(max_chars).collect();
    capped.push_str("...");
    capped
}

/// Bounded text of a panic payload.
pub(crate) fn panic_payload_summary(payload: &(dyn std::any::Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    sanitize_message(&message, MAX_PANIC_PAYLOAD_CHARS)
}
