//! PNG to JPEG watch converter
//!
//! Periodically re-scans one base folder for finished PNG images, converts each
//! to JPEG exactly once per modification time, and keeps a durable ledger of
//! what has been converted.

pub mod codec;
pub mod color_mode;
pub mod daemon;
pub mod layout;
pub mod ledger;
pub mod logging;
pub mod period;
pub mod pipeline;
pub mod publish;
pub mod scan;
pub mod stability;

pub use png2jpg_watch_config as config;
pub use png2jpg_watch_config::Config;

pub use codec::{CodecError, ImageCodec, JpegCodec, JpegMode, PixelMode};
pub use color_mode::{ColorMode, ColorModeResolver};
pub use daemon::{CycleReport, Daemon, DaemonError, PeriodSource};
pub use layout::OutputLayout;
pub use ledger::{LedgerError, ProcessedLedger, SaveReport};
pub use logging::{init_converter_logging, init_supervisor_logging, LoggingError};
pub use period::{Period, PeriodError};
pub use pipeline::{ConversionOutcome, ConversionPipeline, ConvertError};
pub use scan::{FolderScanner, ScanCandidate, StructuralFilter};
pub use stability::{StabilityGate, StabilityResult};
