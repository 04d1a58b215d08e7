//! Two-phase publication of converted files.
//!
//! A JPEG is always written to `<dest>.temp` first and then renamed onto
//! `<dest>`. Readers of the output tree therefore see either the previous
//! state or the complete new file, never a partial one.

use crate::layout::temp_path;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while preparing or publishing a destination.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Failed to create the destination directory.
    #[error("Failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    /// Failed to remove a leftover temp or final file.
    #[error("Failed to remove stale file {path}: {source}")]
    RemoveStale { path: PathBuf, source: io::Error },

    /// Failed to rename the temp file onto the final path.
    #[error("Failed to publish {path}: {source}")]
    Rename { path: PathBuf, source: io::Error },
}

impl PublishError {
    /// The underlying I/O error.
    pub fn io_error(&self) -> &io::Error {
        match self {
            PublishError::CreateDir { source, .. }
            | PublishError::RemoveStale { source, .. }
            | PublishError::Rename { source, .. } => source,
        }
    }
}

fn remove_if_present(path: &Path) -> Result<(), PublishError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PublishError::RemoveStale {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Makes `destination` ready to receive a new file.
///
/// Creates missing parent directories and removes any leftover temp file and
/// any previous final file, so an interrupted earlier run never blocks a
/// reconversion. Returns the temp path to write to.
pub fn prepare_destination(destination: &Path) -> Result<PathBuf, PublishError> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|source| PublishError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let temp = temp_path(destination);
    remove_if_present(&temp)?;
    remove_if_present(destination)?;
    Ok(temp)
}

/// Renames `temp` onto `destination`.
///
/// On failure the temp file is removed so it cannot be mistaken for output.
pub fn publish(temp: &Path, destination: &Path) -> Result<(), PublishError> {
    if let Err(source) = fs::rename(temp, destination) {
        let _ = fs::remove_file(temp);
        return Err(PublishError::Rename {
            path: destination.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Removes a temp file left by a failed write. Missing files are ignored.
pub fn discard(temp: &Path) {
    let _ = fs::remove_file(temp);
}
