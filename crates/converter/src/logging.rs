//! Logging setup shared by the converter and supervisor binaries.
//!
//! Logs go to stderr and to a file. The filter comes from `RUST_LOG` and
//! defaults to `info`; the file layer can be restricted further.

use chrono::{Local, NaiveDate};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to open log file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("A global logger is already installed: {0}")]
    AlreadyInitialized(String),
}

/// `<log_folder>/<YYYYMM>/<name>_error_<YYYYMMDD>.log`
pub fn converter_log_path(log_folder: &Path, name: &str, date: NaiveDate) -> PathBuf {
    log_folder
        .join(date.format("%Y%m").to_string())
        .join(format!("{}_error_{}.log", name, date.format("%Y%m%d")))
}

/// `<folder>/manager_<YYYYMMDD>.log`
pub fn supervisor_log_path(folder: &Path, date: NaiveDate) -> PathBuf {
    folder.join(format!("manager_{}.log", date.format("%Y%m%d")))
}

fn open_append(path: &Path) -> Result<File, LoggingError> {
    let open = || -> io::Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(path)
    };
    open().map_err(|source| LoggingError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Install the global subscriber: stderr plus `file` at `file_level` and above.
pub fn init_logging(file: &Path, file_level: LevelFilter) -> Result<(), LoggingError> {
    let log_file = open_append(file)?;
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().compact().with_writer(io::stderr))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(log_file))
                .with_filter(file_level),
        )
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

/// Logging for one converter instance: warnings and errors also land in
/// today's per-instance error log.
pub fn init_converter_logging(log_folder: &Path, name: &str) -> Result<PathBuf, LoggingError> {
    let path = converter_log_path(log_folder, name, Local::now().date_naive());
    init_logging(&path, LevelFilter::WARN)?;
    Ok(path)
}

/// Logging for the supervisor: everything enabled goes to the manager log.
pub fn init_supervisor_logging(folder: &Path) -> Result<PathBuf, LoggingError> {
    let path = supervisor_log_path(folder, Local::now().date_naive());
    init_logging(&path, LevelFilter::TRACE)?;
    Ok(path)
}
