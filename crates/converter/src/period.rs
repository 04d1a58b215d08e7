//! Ledger partition periods.
//!
//! A period is either a calendar month (`YYYYMM`) or a calendar day (`YYYYMMDD`).
//! The scanner always enters the month folder of the period; daily periods
//! additionally restrict candidates to files modified on that day.

use chrono::{Datelike, Local, NaiveDate, TimeZone};
use png2jpg_watch_config::PartitionGranularity;
use thiserror::Error;

/// Error parsing a period argument.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodError {
    /// Not six or eight ASCII digits.
    #[error("period must be YYYYMM or YYYYMMDD, got '{0}'")]
    Format(String),

    /// Digits that do not name a calendar date.
    #[error("'{0}' is not a valid calendar date")]
    InvalidDate(String),
}

/// A ledger partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    granularity: PartitionGranularity,
    date: NaiveDate,
}

impl Period {
    /// Monthly periods are normalized to the first day of the month so that
    /// two dates in the same month compare equal.
    pub fn new(granularity: PartitionGranularity, date: NaiveDate) -> Self {
        let date = match granularity {
            PartitionGranularity::Monthly => {
                NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
            }
            PartitionGranularity::Daily => date,
        };
        Self { granularity, date }
    }

    /// The period containing today's local date.
    pub fn current(granularity: PartitionGranularity) -> Self {
        Self::new(granularity, Local::now().date_naive())
    }

    /// Parse a pinned period. Six digits select a monthly partition, eight
    /// digits a daily one.
    pub fn parse(s: &str) -> Result<Self, PeriodError> {
        if !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(PeriodError::Format(s.to_string()));
        }

        let (granularity, full) = match s.len() {
            6 => (PartitionGranularity::Monthly, format!("{}01", s)),
            8 => (PartitionGranularity::Daily, s.to_string()),
            _ => return Err(PeriodError::Format(s.to_string())),
        };

        let date = NaiveDate::parse_from_str(&full, "%Y%m%d")
            .map_err(|_| PeriodError::InvalidDate(s.to_string()))?;
        Ok(Self::new(granularity, date))
    }

    pub fn granularity(&self) -> PartitionGranularity {
        self.granularity
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Partition key used in the ledger file name.
    pub fn key(&self) -> String {
        match self.granularity {
            PartitionGranularity::Monthly => self.date.format("%Y%m").to_string(),
            PartitionGranularity::Daily => self.date.format("%Y%m%d").to_string(),
        }
    }

    /// The `YYYYMM` folder name scanned for this period.
    pub fn year_month(&self) -> String {
        self.date.format("%Y%m").to_string()
    }

    /// Whether a file modified at `modified_secs` belongs to this period.
    ///
    /// Monthly periods accept everything under their month folder; daily
    /// periods require the local modification date to match.
    pub fn admits(&self, modified_secs: f64) -> bool {
        match self.granularity {
            PartitionGranularity::Monthly => true,
            PartitionGranularity::Daily => local_date_of(modified_secs) == Some(self.date),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

fn local_date_of(secs: f64) -> Option<NaiveDate> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9) as u32;
    Local
        .timestamp_opt(whole as i64, nanos.min(999_999_999))
        .earliest()
        .map(|dt| dt.date_naive())
}
