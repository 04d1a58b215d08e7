//! Converter instance: the scan/convert cycle for one base folder.
//!
//! Each cycle walks the current period's month folder, skips files the ledger
//! already has at their current modification time, waits for the rest to be
//! stable, converts them one at a time and saves the ledger after every
//! success. The cycle repeats on a fixed interval until the process is killed.

use crate::codec::{ImageCodec, JpegCodec};
use crate::color_mode::{ColorMode, ColorModeResolver};
use crate::layout::OutputLayout;
use crate::ledger::ProcessedLedger;
use crate::logging::LoggingError;
use crate::period::{Period, PeriodError};
use crate::pipeline::{ConversionOutcome, ConversionPipeline, ConvertError};
use crate::scan::{FolderScanner, StructuralFilter};
use crate::stability::StabilityGate;
use png2jpg_watch_config::{BaseFolder, Config, ConfigError, PartitionGranularity};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Error type for daemon startup
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed period argument
    #[error("Invalid period: {0}")]
    Period(#[from] PeriodError),

    /// Logging could not be set up
    #[error("Logging setup failed: {0}")]
    Logging(#[from] LoggingError),
}

/// A conversion running on the blocking pool.
type ConversionWorker = JoinHandle<Result<ConversionOutcome, ConvertError>>;

/// Where the active period comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodSource {
    /// Fixed for the lifetime of the process.
    Pinned(Period),
    /// Follows the local clock at the given granularity.
    Clock(PartitionGranularity),
}

impl PeriodSource {
    pub fn current(&self) -> Period {
        match self {
            PeriodSource::Pinned(period) => *period,
            PeriodSource::Clock(granularity) => Period::current(*granularity),
        }
    }
}

/// Counters for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub scanned: usize,
    pub outside_period: usize,
    pub unchanged: usize,
    pub unstable: usize,
    /// Due files skipped because a timed-out conversion of them is still running.
    pub in_flight: usize,
    pub backfilled: usize,
    pub converted: usize,
    pub failed: usize,
    pub ledger_save_failures: usize,
}

/// One converter instance bound to one base folder.
pub struct Daemon<C: ImageCodec = JpegCodec> {
    base_folder: BaseFolder,
    period_source: PeriodSource,
    period: Period,
    scanner: FolderScanner,
    ledger: ProcessedLedger,
    gate: StabilityGate,
    resolver: ColorModeResolver,
    pipeline: ConversionPipeline<C>,
    interval: Duration,
    conversion_timeout: Option<Duration>,
    backfill: bool,
    ledger_dirty: bool,
    abandoned: HashMap<PathBuf, ConversionWorker>,
}

impl Daemon {
    /// Build an instance for `base_name` using the JPEG codec.
    ///
    /// # Arguments
    /// * `config` - Loaded and validated configuration
    /// * `base_name` - Base folder identifier (case-insensitive)
    /// * `period` - Optional pinned period, `YYYYMM` or `YYYYMMDD`
    ///
    /// # Returns
    /// * `Err(DaemonError)` - Unknown base folder or malformed period
    pub fn new(config: &Config, base_name: &str, period: Option<&str>) -> Result<Self, DaemonError> {
        Self::with_codec(config, base_name, period, JpegCodec)
    }

    /// Validate the arguments, install logging, then build the instance.
    ///
    /// Logging comes up before the ledger is loaded so that load problems
    /// are recorded. `init_logging` receives the resolved base folder and is
    /// not called when the base folder or period is invalid.
    pub fn start<G, F>(
        config: &Config,
        base_name: &str,
        period: Option<&str>,
        init_logging: F,
    ) -> Result<(Self, G), DaemonError>
    where
        F: FnOnce(&BaseFolder) -> Result<G, LoggingError>,
    {
        let base_folder = config.resolve_base_folder(base_name)?;
        if let Some(arg) = period {
            Period::parse(arg)?;
        }
        let logging = init_logging(&base_folder)?;
        let daemon = Self::new(config, base_name, period)?;
        Ok((daemon, logging))
    }
}

impl<C: ImageCodec> Daemon<C> {
    /// Build an instance with a specific codec.
    pub fn with_codec(
        config: &Config,
        base_name: &str,
        period: Option<&str>,
        codec: C,
    ) -> Result<Self, DaemonError> {
        let base_folder = config.resolve_base_folder(base_name)?;
        let period_source = match period {
            Some(arg) => PeriodSource::Pinned(Period::parse(arg)?),
            None => PeriodSource::Clock(config.scan.partition),
        };
        let period = period_source.current();

        let layout = OutputLayout::new(&config.paths.output_base_folder, &base_folder.name);
        let ledger = load_ledger(&layout, &period);

        let scanner = FolderScanner::new(&base_folder.root, StructuralFilter::from_config(&config.scan));
        let pipeline = ConversionPipeline::new(codec, layout, &base_folder.root, config.image.jpg_quality);
        let conversion_timeout = match config.scan.conversion_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            base_folder,
            period_source,
            period,
            scanner,
            ledger,
            gate: StabilityGate::new(Duration::from_secs(config.scan.stability_wait_secs)),
            resolver: ColorModeResolver::new(config.image.color_mode),
            pipeline,
            interval: Duration::from_secs(config.scan.interval_secs),
            conversion_timeout,
            backfill: config.scan.backfill_existing_artifacts,
            ledger_dirty: false,
            abandoned: HashMap::new(),
        })
    }

    pub fn base_folder(&self) -> &BaseFolder {
        &self.base_folder
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn ledger(&self) -> &ProcessedLedger {
        &self.ledger
    }

    pub fn color_mode(&self) -> ColorMode {
        self.resolver.current()
    }

    pub fn pipeline(&self) -> &ConversionPipeline<C> {
        &self.pipeline
    }

    /// Switch to a fresh ledger when the clock has moved into a new period.
    fn roll_period(&mut self) {
        let current = self.period_source.current();
        if current == self.period {
            return;
        }
        if self.ledger_dirty {
            self.save_ledger();
        }
        info!(from = %self.period, to = %current, "Period changed, switching ledger");
        self.period = current;
        self.ledger = load_ledger(self.pipeline.layout(), &current);
        self.ledger_dirty = false;
    }

    fn save_ledger(&mut self) -> bool {
        match self.ledger.save() {
            Ok(report) => {
                debug!(
                    ledger = %self.ledger.file().display(),
                    written = report.written,
                    dropped = report.dropped.len(),
                    "Saved ledger"
                );
                self.ledger_dirty = false;
                true
            }
            Err(e) => {
                error!(error = %e, "Ledger save failed, keeping in-memory state");
                self.ledger_dirty = true;
                false
            }
        }
    }

    /// Resolve a sampled color mode from `path` if still needed.
    async fn resolve_color_mode(&mut self, path: &Path) -> ColorMode {
        if self.resolver.needs_sample() {
            let pipeline = self.pipeline.clone();
            let input = path.to_path_buf();
            let sampled = tokio::task::spawn_blocking(move || pipeline.native_mode_of(&input)).await;
            match sampled {
                Ok(Ok(native)) => {
                    let mode = self.resolver.observe_sample(&native);
                    info!(sample = %path.display(), native = %native, ?mode, "Sampled color mode");
                }
                Ok(Err(e)) => warn!(error = %e, "Color mode sample unreadable, using color for now"),
                Err(e) => warn!(error = %e, "Color mode sample failed, using color for now"),
            }
        }
        self.resolver.current()
    }

    /// Run one full scan/convert cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.roll_period();

        self.abandoned.retain(|_, worker| !worker.is_finished());

        let mut report = CycleReport::default();
        let year_month = self.period.year_month();
        let scanner = self.scanner.clone();

        for candidate in scanner.candidates(&year_month) {
            report.scanned += 1;
            let path = candidate.path.as_path();

            if !self.period.admits(candidate.modified_secs) {
                report.outside_period += 1;
                continue;
            }

            if !self.ledger.is_due(path, candidate.modified_secs) {
                report.unchanged += 1;
                continue;
            }

            if self.abandoned.contains_key(path) {
                report.in_flight += 1;
                debug!(path = %path.display(), "Timed-out conversion still running, skipping");
                continue;
            }

            if self.backfill && self.ledger.get(path).is_none() {
                if let Ok(artifact) = self.pipeline.artifact_path(path) {
                    if artifact.exists() {
                        self.ledger.record(path, candidate.modified_secs);
                        report.backfilled += 1;
                        debug!(path = %path.display(), "Artifact exists, recorded without converting");
                        if !self.save_ledger() {
                            report.ledger_save_failures += 1;
                        }
                        continue;
                    }
                }
            }

            if !self.gate.is_stable(path).await {
                report.unstable += 1;
                continue;
            }

            let mode = self.resolve_color_mode(path).await;
            let attempt = convert_blocking(
                &self.pipeline,
                path,
                mode,
                self.conversion_timeout,
                &mut self.abandoned,
            )
            .await;
            match attempt {
                Ok(outcome) => {
                    report.converted += 1;
                    info!(
                        source = %outcome.source.display(),
                        artifact = %outcome.artifact.display(),
                        mode = ?outcome.written_mode,
                        "Converted"
                    );
                    if let Err(e) = self.ledger.record_success(path) {
                        error!(
                            path = %path.display(),
                            error = %e,
                            "Converted but could not read source mtime, not recorded"
                        );
                        continue;
                    }
                    if !self.save_ledger() {
                        report.ledger_save_failures += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    error!(path = %path.display(), error = %e, "Conversion failed");
                }
            }
        }

        if self.ledger_dirty && !self.save_ledger() {
            report.ledger_save_failures += 1;
        }
        report
    }

    /// Run cycles forever, sleeping the configured interval between them.
    pub async fn run(&mut self) {
        info!(
            base_folder = %self.base_folder.name,
            root = %self.base_folder.root.display(),
            period = %self.period,
            "Watching"
        );
        loop {
            let report = self.run_cycle().await;
            if report.converted > 0 || report.failed > 0 {
                info!(?report, "Cycle finished");
            } else {
                debug!(?report, "Cycle finished");
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

fn load_ledger(layout: &OutputLayout, period: &Period) -> ProcessedLedger {
    let file = layout.ledger_path(period);
    match ProcessedLedger::load(&file) {
        Ok(ledger) => ledger,
        Err(e) => {
            error!(error = %e, "Ledger load failed, starting empty");
            ProcessedLedger::empty(file)
        }
    }
}

/// Run one conversion on the blocking pool, bounded by `timeout` if set.
///
/// A timed-out conversion is abandoned, not cancelled: the worker may still
/// publish its file later, and the source stays due. Its handle goes into
/// `abandoned` so no second conversion of the same file starts while it
/// still owns the destination's temp file.
async fn convert_blocking<C: ImageCodec>(
    pipeline: &ConversionPipeline<C>,
    path: &Path,
    mode: ColorMode,
    timeout: Option<Duration>,
    abandoned: &mut HashMap<PathBuf, ConversionWorker>,
) -> Result<ConversionOutcome, ConvertError> {
    let worker = pipeline.clone();
    let input = path.to_path_buf();
    let mut task: ConversionWorker = tokio::task::spawn_blocking(move || worker.convert(&input, mode));

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                abandoned.insert(path.to_path_buf(), task);
                return Err(ConvertError::Timeout {
                    path: path.to_path_buf(),
                    secs: limit.as_secs(),
                })
            }
        },
        None => task.await,
    };

    joined.map_err(|e| ConvertError::Worker {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?
}
