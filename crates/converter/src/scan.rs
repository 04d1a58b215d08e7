//! Folder scanner for discovering PNG files under a base folder.
//!
//! Only files inside the structural schema
//! `<base>/<category>/<YYYYMM>/<side>/**/*.png` are candidates. Directories of
//! the schema that do not exist yet are skipped silently, since the external
//! writer creates them incrementally.

use crate::ledger::system_time_secs;
use png2jpg_watch_config::ScanConfig;
use std::path::{Component, Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Source image extension (case-insensitive matching).
pub const PNG_EXTENSION: &str = "png";

/// A candidate PNG file discovered during a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCandidate {
    /// Full path to the PNG file.
    pub path: PathBuf,
    /// File size in bytes at discovery time.
    pub size_bytes: u64,
    /// Modification time in seconds since the epoch.
    pub modified_secs: f64,
}

/// Checks if a file has a PNG extension (case-insensitive).
pub fn is_png_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(PNG_EXTENSION))
        .unwrap_or(false)
}

/// The directory schema candidates must live in, expressed as data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralFilter {
    categories: Vec<String>,
    sides: Vec<String>,
}

impl StructuralFilter {
    pub fn new(categories: Vec<String>, sides: Vec<String>) -> Self {
        Self { categories, sides }
    }

    pub fn from_config(scan: &ScanConfig) -> Self {
        Self::new(scan.categories.clone(), scan.sides.clone())
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn sides(&self) -> &[String] {
        &self.sides
    }

    /// The `<category>/<YYYYMM>/<side>` directories to walk for a month.
    pub fn side_dirs(&self, root: &Path, year_month: &str) -> Vec<PathBuf> {
        self.categories
            .iter()
            .flat_map(|category| {
                self.sides
                    .iter()
                    .map(move |side| root.join(category).join(year_month).join(side))
            })
            .collect()
    }

    /// Whether `relative` (a path relative to the base folder) is a PNG inside
    /// the schema for `year_month`.
    ///
    /// The file must sit at least one level below the side folder's parent,
    /// i.e. `<category>/<YYYYMM>/<side>/<file>` or deeper.
    pub fn matches(&self, relative: &Path, year_month: &str) -> bool {
        if !is_png_file(relative) {
            return false;
        }

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => match part.to_str() {
                    Some(part) => parts.push(part),
                    None => return false,
                },
                _ => return false,
            }
        }

        if parts.len() < 4 {
            return false;
        }
        self.categories.iter().any(|c| c == parts[0])
            && parts[1] == year_month
            && self.sides.iter().any(|s| s == parts[2])
    }
}

/// Enumerates candidate PNG files under one base folder.
#[derive(Debug, Clone)]
pub struct FolderScanner {
    root: PathBuf,
    filter: StructuralFilter,
}

impl FolderScanner {
    pub fn new(root: impl Into<PathBuf>, filter: StructuralFilter) -> Self {
        Self {
            root: root.into(),
            filter,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walks every side folder of `year_month`.
    ///
    /// Each call starts a fresh walk; nothing is cached between calls. Missing
    /// directories and entries that cannot be read are skipped. Paths that are
    /// not valid UTF-8 are skipped with a warning, since the ledger stores
    /// paths as text and could not record them faithfully.
    pub fn candidates<'a>(&'a self, year_month: &str) -> impl Iterator<Item = ScanCandidate> + 'a {
        let year_month = year_month.to_string();
        self.filter
            .side_dirs(&self.root, &year_month)
            .into_iter()
            .filter(|dir| dir.is_dir())
            .flat_map(|dir| {
                WalkDir::new(dir)
                    .min_depth(1)
                    .into_iter()
                    .filter_map(|e| e.ok())
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                if entry.path().to_str().is_none() {
                    warn!(path = %entry.path().display(), "Skipping file with non-UTF-8 path");
                    return false;
                }
                true
            })
            .filter(move |entry| {
                entry
                    .path()
                    .strip_prefix(&self.root)
                    .map(|relative| self.filter.matches(relative, &year_month))
                    .unwrap_or(false)
            })
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                let modified_secs = metadata.modified().ok().map(system_time_secs)?;
                Some(ScanCandidate {
                    path: entry.into_path(),
                    size_bytes: metadata.len(),
                    modified_secs,
                })
            })
    }
}
