//! CSV recording of usage samples.
//!
//! Samples are buffered and appended in batches to
//! `<folder>/monitoring_data_<YYYYMMDD>_<start>.csv`, where the date is the
//! day of the write and `<start>` the supervisor's start time. The header is
//! written when a file is created.

use crate::usage::{UsageSample, USAGE_COLUMNS};
use crate::SupervisorError;
use chrono::{Local, NaiveDate};
use std::borrow::Cow;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Quote a field if it contains a delimiter, quote or line break.
pub fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn csv_line<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = fields
        .into_iter()
        .map(|field| csv_field(field.as_ref()).into_owned())
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

/// Buffered CSV writer for usage samples.
#[derive(Debug)]
pub struct MonitorLog {
    folder: PathBuf,
    start_stamp: String,
    pending: Vec<UsageSample>,
}

impl MonitorLog {
    /// `start_stamp` is the `YYYYMMDD_HHMMSS` suffix shared by every file
    /// of this run.
    pub fn new(folder: impl Into<PathBuf>, start_stamp: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            start_stamp: start_stamp.into(),
            pending: Vec::new(),
        }
    }

    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.folder.join(format!(
            "monitoring_data_{}_{}.csv",
            date.format("%Y%m%d"),
            self.start_stamp
        ))
    }

    pub fn push(&mut self, samples: impl IntoIterator<Item = UsageSample>) {
        self.pending.extend(samples);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Append pending samples to today's file.
    pub fn flush(&mut self) -> Result<usize, SupervisorError> {
        self.flush_into(Local::now().date_naive())
    }

    /// Append pending samples to the file for `date`. The buffer is kept if
    /// the write fails.
    pub fn flush_into(&mut self, date: NaiveDate) -> Result<usize, SupervisorError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let path = self.file_for(date);
        self.append(&path)
            .map_err(|source| SupervisorError::Csv { path: path.clone(), source })?;

        let written = self.pending.len();
        self.pending.clear();
        info!(path = %path.display(), rows = written, "Saved monitoring data");
        Ok(written)
    }

    fn append(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let is_new = !path.exists();

        let mut content = String::new();
        if is_new {
            content.push_str(&csv_line(USAGE_COLUMNS));
        }
        for sample in &self.pending {
            content.push_str(&csv_line(sample.fields()));
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(content.as_bytes())?;
        file.flush()
    }
}
