//! Supervisor entry point
//!
//! Starts every configured converter instance, checks on them periodically and
//! restarts the ones that exited. Usage samples are buffered and flushed to CSV
//! on an interval and on Ctrl-C.

use chrono::Local;
use clap::Parser;
use png2jpg_supervisor::{MonitorLog, Supervisor, UsageSampler};
use png2jpg_watch::{init_supervisor_logging, Config};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Launch and keep alive one png2jpg converter per base folder
#[derive(Parser, Debug)]
#[command(name = "png2jpg-supervisor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml), also passed to each converter
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

fn every(secs: u64) -> tokio::time::Interval {
    let mut ticker = interval(Duration::from_secs(secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let settings = config.supervisor.clone();

    if let Err(e) = init_supervisor_logging(&settings.csv_folder) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let start_stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    info!(
        instances = settings.instances.len(),
        check_interval_secs = settings.check_interval_secs,
        "Supervisor starting"
    );
    if settings.enable_monitoring {
        info!(interval_secs = settings.monitoring_interval_secs, "Sampling converter resource usage");
    }
    if settings.enable_csv {
        info!(
            interval_secs = settings.csv_save_interval_secs,
            folder = %settings.csv_folder.display(),
            "Saving monitoring data to CSV"
        );
    }

    let mut supervisor = Supervisor::from_config(&config, &args.config);
    supervisor.start_all();

    let mut sampler = UsageSampler::new();
    let mut monitor_log = MonitorLog::new(&settings.csv_folder, start_stamp);

    let mut monitor_tick = every(settings.monitoring_interval_secs);
    let mut check_tick = every(settings.check_interval_secs);
    let mut save_tick = every(settings.csv_save_interval_secs);

    loop {
        tokio::select! {
            _ = monitor_tick.tick(), if settings.enable_monitoring => {
                let samples = sampler.sample(&supervisor.running());
                if settings.enable_csv {
                    monitor_log.push(samples);
                }
            }
            _ = check_tick.tick() => {
                let restarted = supervisor.check_and_restart();
                if restarted > 0 {
                    info!(restarted, "Relaunched converters");
                }
            }
            _ = save_tick.tick(), if settings.enable_csv => {
                if let Err(e) = monitor_log.flush() {
                    error!(error = %e, "Monitoring data not saved, keeping it buffered");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, saving monitoring data and exiting");
                if let Err(e) = monitor_log.flush() {
                    error!(error = %e, "Monitoring data not saved");
                }
                break;
            }
        }
    }

    ExitCode::SUCCESS
}
