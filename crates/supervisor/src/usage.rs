//! Resource usage sampling for supervised converters using sysinfo.

use crate::process::RunningInstance;
use chrono::Local;
use sysinfo::{Networks, Pid, ProcessesToUpdate, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Column names of a usage row, in order.
pub const USAGE_COLUMNS: [&str; 8] = [
    "timestamp",
    "arguments",
    "cpu_percent",
    "memory_mb",
    "disk_read_mb",
    "disk_write_mb",
    "network_sent_mb",
    "network_recv_mb",
];

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Usage of one converter process at one instant.
///
/// Disk figures are cumulative for the process; network figures are
/// cumulative for the whole host, since per-process traffic is not available.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageSample {
    pub timestamp: String,
    pub instance: String,
    pub cpu_percent: f32,
    pub memory_mb: f64,
    pub disk_read_mb: f64,
    pub disk_write_mb: f64,
    pub network_sent_mb: f64,
    pub network_recv_mb: f64,
}

impl UsageSample {
    /// Values in [`USAGE_COLUMNS`] order.
    pub fn fields(&self) -> [String; 8] {
        [
            self.timestamp.clone(),
            self.instance.clone(),
            self.cpu_percent.to_string(),
            self.memory_mb.to_string(),
            self.disk_read_mb.to_string(),
            self.disk_write_mb.to_string(),
            self.network_sent_mb.to_string(),
            self.network_recv_mb.to_string(),
        ]
    }
}

/// Keeps sysinfo state between samples so CPU usage has a baseline.
pub struct UsageSampler {
    system: System,
    networks: Networks,
}

impl Default for UsageSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            networks: Networks::new_with_refreshed_list(),
        }
    }

    /// Sample every running instance. Processes that vanished since the
    /// supervisor last looked are left out.
    pub fn sample(&mut self, running: &[RunningInstance]) -> Vec<UsageSample> {
        if running.is_empty() {
            return Vec::new();
        }

        let pids: Vec<Pid> = running.iter().map(|r| Pid::from_u32(r.pid)).collect();
        self.system.refresh_processes(ProcessesToUpdate::Some(&pids));
        self.networks.refresh();

        let (sent, received) = self
            .networks
            .list()
            .values()
            .fold((0u64, 0u64), |(sent, received), data| {
                (
                    sent.saturating_add(data.total_transmitted()),
                    received.saturating_add(data.total_received()),
                )
            });
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

        running
            .iter()
            .filter_map(|instance| {
                let process = self.system.process(Pid::from_u32(instance.pid))?;
                let disk = process.disk_usage();
                Some(UsageSample {
                    timestamp: timestamp.clone(),
                    instance: instance.name.clone(),
                    cpu_percent: process.cpu_usage(),
                    memory_mb: bytes_to_mb(process.memory()),
                    disk_read_mb: bytes_to_mb(disk.total_read_bytes),
                    disk_write_mb: bytes_to_mb(disk.total_written_bytes),
                    network_sent_mb: bytes_to_mb(sent),
                    network_recv_mb: bytes_to_mb(received),
                })
            })
            .collect()
    }
}
