//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A value parsed but is out of range or empty
    Invalid(String),
    /// The requested base folder identifier is not in `[base_folders]`
    UnknownBaseFolder(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
            ConfigError::UnknownBaseFolder(name) => {
                write!(f, "Base folder '{}' is not defined in [base_folders]", name)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Output and log locations
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PathsConfig {
    /// Root of the converted tree and the ledger partitions
    #[serde(default)]
    pub output_base_folder: PathBuf,
    /// Root of the per-day error logs
    #[serde(default)]
    pub log_folder: PathBuf,
}

/// How the converter picks the JPEG color mode for a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColorModeSetting {
    /// Keep each image's native mode (grayscale stays grayscale, the rest becomes RGB)
    #[default]
    Unset,
    /// Force every output to 8-bit grayscale
    Grayscale,
    /// Force every output to RGB
    Color,
    /// Decide once per run from the first candidate found
    Sample,
}

impl std::str::FromStr for ColorModeSetting {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unset" | "auto" => Ok(Self::Unset),
            "grayscale" | "gray" | "l" => Ok(Self::Grayscale),
            "color" | "rgb" => Ok(Self::Color),
            "sample" => Ok(Self::Sample),
            other => Err(ConfigError::Invalid(format!("unknown color mode '{}'", other))),
        }
    }
}

/// Ledger partition size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PartitionGranularity {
    /// One ledger file per calendar month (`YYYYMM`)
    #[default]
    Monthly,
    /// One ledger file per calendar day (`YYYYMMDD`)
    Daily,
}

impl std::str::FromStr for PartitionGranularity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "monthly" | "month" => Ok(Self::Monthly),
            "daily" | "day" => Ok(Self::Daily),
            other => Err(ConfigError::Invalid(format!("unknown partition '{}'", other))),
        }
    }
}

/// Image output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageConfig {
    /// JPEG quality (0-100, default 85)
    #[serde(default = "default_jpg_quality")]
    pub jpg_quality: u8,
    /// Color mode policy for the run
    #[serde(default)]
    pub color_mode: ColorModeSetting,
}

fn default_jpg_quality() -> u8 {
    85
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            jpg_quality: default_jpg_quality(),
            color_mode: ColorModeSetting::default(),
        }
    }
}

/// Scan loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanConfig {
    /// Sleep between scan cycles in seconds (default 1)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Size observation window of the stability gate in seconds (default 1)
    #[serde(default = "default_stability_wait_secs")]
    pub stability_wait_secs: u64,
    /// Ledger partition granularity
    #[serde(default)]
    pub partition: PartitionGranularity,
    /// Per-file conversion timeout in seconds (0 = unbounded)
    #[serde(default)]
    pub conversion_timeout_secs: u64,
    /// Record candidates whose JPEG already exists instead of reconverting them
    #[serde(default)]
    pub backfill_existing_artifacts: bool,
    /// First directory level under a base folder
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    /// Third directory level (camera side) under `<category>/<YYYYMM>`
    #[serde(default = "default_sides")]
    pub sides: Vec<String>,
}

fn default_interval_secs() -> u64 {
    1
}

fn default_stability_wait_secs() -> u64 {
    1
}

fn default_categories() -> Vec<String> {
    ["NG", "OK", "NG_OK"].iter().map(|s| s.to_string()).collect()
}

fn default_sides() -> Vec<String> {
    ["LEFT", "LINE", "LINE_TAP", "LOAD", "LOAD_TAP", "RIGHT", "TOP"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            stability_wait_secs: default_stability_wait_secs(),
            partition: PartitionGranularity::default(),
            conversion_timeout_secs: 0,
            backfill_existing_artifacts: false,
            categories: default_categories(),
            sides: default_sides(),
        }
    }
}

/// Process supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorConfig {
    /// Converter executable launched once per instance
    #[serde(default = "default_converter_program")]
    pub converter_program: PathBuf,
    /// Base folder identifiers to run, one process each
    #[serde(default)]
    pub instances: Vec<String>,
    /// Liveness check interval in seconds (default 10)
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Resource sampling interval in seconds (default 1)
    #[serde(default = "default_monitoring_interval_secs")]
    pub monitoring_interval_secs: u64,
    /// Sample CPU/memory/disk/network usage of the children
    #[serde(default = "default_true")]
    pub enable_monitoring: bool,
    /// Persist samples to CSV
    #[serde(default = "default_true")]
    pub enable_csv: bool,
    /// CSV flush interval in seconds (default 30)
    #[serde(default = "default_csv_save_interval_secs")]
    pub csv_save_interval_secs: u64,
    /// Directory receiving the CSV files and the manager log
    #[serde(default = "default_csv_folder")]
    pub csv_folder: PathBuf,
}

fn default_converter_program() -> PathBuf {
    PathBuf::from("png2jpg-convert")
}

fn default_check_interval_secs() -> u64 {
    10
}

fn default_monitoring_interval_secs() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

fn default_csv_save_interval_secs() -> u64 {
    30
}

fn default_csv_folder() -> PathBuf {
    PathBuf::from(".")
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            converter_program: default_converter_program(),
            instances: Vec::new(),
            check_interval_secs: default_check_interval_secs(),
            monitoring_interval_secs: default_monitoring_interval_secs(),
            enable_monitoring: true,
            enable_csv: true,
            csv_save_interval_secs: default_csv_save_interval_secs(),
            csv_folder: default_csv_folder(),
        }
    }
}

/// A monitored source tree resolved from `[base_folders]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseFolder {
    /// Lower-cased identifier, used in ledger and output paths
    pub name: String,
    /// Absolute source directory
    pub root: PathBuf,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub base_folders: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - PNG2JPG_OUTPUT_BASE_FOLDER -> paths.output_base_folder
    /// - PNG2JPG_LOG_FOLDER -> paths.log_folder
    /// - PNG2JPG_JPG_QUALITY -> image.jpg_quality
    /// - PNG2JPG_COLOR_MODE -> image.color_mode
    /// - PNG2JPG_SCAN_INTERVAL_SECS -> scan.interval_secs
    /// - PNG2JPG_PARTITION -> scan.partition
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("PNG2JPG_OUTPUT_BASE_FOLDER") {
            if !val.is_empty() {
                self.paths.output_base_folder = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("PNG2JPG_LOG_FOLDER") {
            if !val.is_empty() {
                self.paths.log_folder = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("PNG2JPG_JPG_QUALITY") {
            if let Ok(quality) = val.parse::<u8>() {
                self.image.jpg_quality = quality;
            }
        }

        if let Ok(val) = env::var("PNG2JPG_COLOR_MODE") {
            if let Ok(mode) = val.parse::<ColorModeSetting>() {
                self.image.color_mode = mode;
            }
        }

        if let Ok(val) = env::var("PNG2JPG_SCAN_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.scan.interval_secs = secs;
            }
        }

        if let Ok(val) = env::var("PNG2JPG_PARTITION") {
            if let Ok(partition) = val.parse::<PartitionGranularity>() {
                self.scan.partition = partition;
            }
        }
    }

    /// Check ranges and required values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.paths.output_base_folder.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "paths.output_base_folder is required".to_string(),
            ));
        }
        if self.paths.log_folder.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("paths.log_folder is required".to_string()));
        }
        if self.image.jpg_quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "image.jpg_quality must be within 0-100, got {}",
                self.image.jpg_quality
            )));
        }
        if self.scan.categories.is_empty() || self.scan.sides.is_empty() {
            return Err(ConfigError::Invalid(
                "scan.categories and scan.sides must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Look up a base folder by identifier, ignoring case.
    pub fn resolve_base_folder(&self, name: &str) -> Result<BaseFolder, ConfigError> {
        let wanted = name.to_lowercase();
        self.base_folders
            .iter()
            .find(|(key, _)| key.to_lowercase() == wanted)
            .map(|(_, root)| BaseFolder {
                name: wanted.clone(),
                root: root.clone(),
            })
            .ok_or_else(|| ConfigError::UnknownBaseFolder(name.to_string()))
    }
}
