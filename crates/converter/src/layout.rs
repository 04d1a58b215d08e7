//! Output tree layout.
//!
//! Everything a converter instance writes lives under
//! `<output_base>/mccb/<base_folder_name>/`: the converted JPEGs mirror the
//! source tree, and the ledger partitions sit in `Processed_files/<YYYYMM>/`.

use crate::period::Period;
use std::path::{Path, PathBuf};

/// Namespace folder directly under the output base.
pub const OUTPUT_NAMESPACE: &str = "mccb";

/// Folder holding the ledger partitions of one base folder.
pub const LEDGER_FOLDER: &str = "Processed_files";

/// Infix between the base folder name and the period in ledger file names.
pub const LEDGER_FILE_INFIX: &str = "_processed_files_";

/// Extension of converted artifacts.
pub const ARTIFACT_EXTENSION: &str = "jpg";

/// Suffix appended to a destination while it is being written.
pub const TEMP_SUFFIX: &str = ".temp";

/// Path arithmetic for one base folder's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    output_base: PathBuf,
    folder_name: String,
}

impl OutputLayout {
    pub fn new(output_base: impl Into<PathBuf>, folder_name: impl Into<String>) -> Self {
        Self {
            output_base: output_base.into(),
            folder_name: folder_name.into(),
        }
    }

    pub fn folder_name(&self) -> &str {
        &self.folder_name
    }

    /// `<output_base>/mccb/<folder_name>`
    pub fn folder_root(&self) -> PathBuf {
        self.output_base
            .join(OUTPUT_NAMESPACE)
            .join(&self.folder_name)
    }

    /// Destination of the JPEG converted from `input`.
    ///
    /// Returns `None` when `input` is not inside `watch_root`.
    pub fn artifact_path(&self, watch_root: &Path, input: &Path) -> Option<PathBuf> {
        let relative = input.strip_prefix(watch_root).ok()?;
        if relative.as_os_str().is_empty() {
            return None;
        }
        Some(
            self.folder_root()
                .join(relative)
                .with_extension(ARTIFACT_EXTENSION),
        )
    }

    /// `<folder_root>/Processed_files/<YYYYMM>/<name>_processed_files_<key>.txt`
    pub fn ledger_path(&self, period: &Period) -> PathBuf {
        self.folder_root()
            .join(LEDGER_FOLDER)
            .join(period.year_month())
            .join(format!(
                "{}{}{}.txt",
                self.folder_name,
                LEDGER_FILE_INFIX,
                period.key()
            ))
    }
}

/// Constructs the in-progress path for a destination file.
///
/// For example: `/out/img1.jpg` -> `/out/img1.jpg.temp`
pub fn temp_path(destination: &Path) -> PathBuf {
    let mut temp = destination.as_os_str().to_owned();
    temp.push(TEMP_SUFFIX);
    PathBuf::from(temp)
}
