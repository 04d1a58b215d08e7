//! CLI entry point for one converter instance
//!
//! Loads the configuration, resolves the base folder and runs the scan loop
//! until the process is killed. Configuration problems exit non-zero before
//! the first cycle.

use clap::Parser;
use png2jpg_watch::{init_converter_logging, Config, Daemon};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

/// Watch a base folder and convert finished PNG images to JPEG
#[derive(Parser, Debug)]
#[command(name = "png2jpg-convert")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Run a single scan cycle and exit
    #[arg(long, default_value = "false")]
    once: bool,

    /// Base folder identifier from the [base_folders] table
    base_name: String,

    /// Pin the ledger period: YYYYMM (monthly) or YYYYMMDD (daily)
    period: Option<String>,
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

    let started = Daemon::start(&config, &args.base_name, args.period.as_deref(), |base| {
        init_converter_logging(&config.paths.log_folder, &base.name)
    });
    let mut daemon = match started {
        Ok((daemon, error_log)) => {
            info!(error_log = %error_log.display(), "Logging initialized");
            daemon
        }
        Err(e) => {
            eprintln!("Failed to start converter: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.once {
        let report = daemon.run_cycle().await;
        info!(?report, "Single cycle finished");
        return ExitCode::SUCCESS;
    }

    daemon.run().await;
    ExitCode::SUCCESS
}
