//! Logging system configuration and initialization
//!
//! - Console output and an optional log file (plain or JSON)
//! - The previous log file is renamed with its timestamp on startup
//! - Old log files are cleaned up according to `max_files`/`keep_only_latest`
//! - `RUST_LOG` overrides the configured filter

use anyhow::{Result, anyhow};
use chrono::{DateTime, Local};
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

// Keeps the non-blocking file writers alive for the life of the process
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<WorkerGuard>> = Mutex::new(Vec::new());
}

/// Targets that are noisy below TRACE.
const QUIET_TARGETS: &[(&str, &str)] = &[
    ("sqlx::query", "warn"),
    ("sqlx::sqlite", "warn"),
    ("tokio", "info"),
    ("runtime", "warn"),
];

/// Local wall-clock timestamps, matching how the run window is evaluated.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f %:z"))
    }
}

/// `logs/` next to the executable, or under the working directory.
pub fn default_log_directory() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_default()
        .join("logs")
}

pub fn log_directory(config: &LoggingConfig) -> PathBuf {
    config.directory.clone().unwrap_or_else(default_log_directory)
}

/// Filter from `RUST_LOG`, else from the configured level and module filters.
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(&config.level)
        .map_err(|e| anyhow!("Invalid log level {:?}: {e}", config.level))?;

    if !config.level.to_ascii_lowercase().contains("trace") {
        for (target, level) in QUIET_TARGETS {
            filter = filter.add_directive(format!("{target}={level}").parse()?);
        }
    }

    let mut modules: Vec<_> = config.module_filters.iter().collect();
    modules.sort();
    for (module, level) in modules {
        let directive = format!("{module}={level}");
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| anyhow!("Invalid module filter {directive:?}: {e}"))?,
        );
    }

    Ok(filter)
}

/// Initialize the global subscriber. Fails if one is already installed.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(config)?;
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut log_path = None;

    if config.file_output {
        let log_dir = log_directory(config);
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {}: {e}", log_dir.display()))?;

        let rotated = rotate_existing_log_file(&log_dir, &config.file_name)?;
        if config.auto_cleanup_logs {
            cleanup_old_logs(&log_dir, config)?;
        }

        let (file_writer, guard) = non_blocking(rolling::never(&log_dir, &config.file_name));
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("Log guard registry poisoned"))?
            .push(guard);

        let file_layer = if config.json_format {
            fmt::Layer::new()
                .json()
                .with_writer(file_writer)
                .with_timer(LocalTimer)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::Layer::new()
                .with_writer(file_writer)
                .with_timer(LocalTimer)
                .with_target(true)
                .with_ansi(false)
                .boxed()
        };
        layers.push(file_layer);
        log_path = Some((log_dir.join(&config.file_name), rotated));
    }

    if config.console_output {
        layers.push(
            fmt::Layer::new()
                .with_writer(std::io::stderr)
                .with_timer(LocalTimer)
                .with_target(false)
                .boxed(),
        );
    }

    if layers.is_empty() {
        return Err(anyhow!("No logging output configured"));
    }

    Registry::default()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {e}"))?;

    info!(
        level = %config.level,
        json = config.json_format,
        console = config.console_output,
        "Logging system initialized"
    );
    if let Some((path, rotated)) = log_path {
        info!(path = %path.display(), "Writing log file");
        if let Some(rotated) = rotated {
            info!(file = %rotated, "Rotated previous log file");
        }
    }
    Ok(())
}

/// Rename an existing `file_name` to `<stem>.<timestamp>.log`.
///
/// Returns the new name when a file was rotated.
fn rotate_existing_log_file(log_dir: &Path, file_name: &str) -> Result<Option<String>> {
    let current = log_dir.join(file_name);
    if !current.exists() {
        return Ok(None);
    }

    let metadata = std::fs::metadata(&current)
        .map_err(|e| anyhow!("Failed to get log file metadata: {e}"))?;
    let file_time = metadata
        .modified()
        .or_else(|_| metadata.created())
        .unwrap_or_else(|_| std::time::SystemTime::now());
    let stamp: DateTime<Local> = file_time.into();

    let stem = file_name.trim_end_matches(".log");
    let rotated_name = format!("{stem}.{}.log", stamp.format("%Y%m%dT%H%M%S"));
    let rotated = log_dir.join(&rotated_name);
    std::fs::rename(&current, &rotated).map_err(|e| {
        anyhow!("Failed to rotate log file {} to {}: {e}", current.display(), rotated.display())
    })?;

    Ok(Some(rotated_name))
}

/// Delete old `.log` files, newest kept first.
fn cleanup_old_logs(log_dir: &Path, config: &LoggingConfig) -> Result<usize> {
    let mut log_files = Vec::new();
    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_log = path.extension().is_some_and(|ext| ext == "log");
        if !is_log || !path.is_file() {
            continue;
        }
        if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
            log_files.push((path, modified));
        }
    }
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let keep = if config.keep_only_latest { 1 } else { config.max_files as usize };
    let mut removed = 0;
    for (path, _) in log_files.iter().skip(keep) {
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove old log file {}: {e}", path.display()),
        }
    }
    Ok(removed)
}
