//! Converter supervisor
//!
//! Runs one converter process per configured base folder, relaunches any that
//! exit, and optionally records their resource usage to CSV.

pub mod monitor_log;
pub mod process;
pub mod usage;

use std::path::PathBuf;
use thiserror::Error;

pub use monitor_log::MonitorLog;
pub use process::{Instance, RunningInstance, Supervisor};
pub use usage::{UsageSample, UsageSampler};

/// Error type for supervisor operations
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The converter program could not be launched
    #[error("Failed to launch converter '{name}': {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },

    /// No instance at this index
    #[error("No instance with index {0}")]
    NoSuchInstance(usize),

    /// Monitoring data could not be written
    #[error("Failed to write monitoring data to {path}: {source}")]
    Csv {
        path: PathBuf,
        source: std::io::Error,
    },
}
