//! Processed-file ledger.
//!
//! Records, per source path, the modification time of the last successful
//! conversion. A file is due for conversion when it has no entry or its
//! current modification time differs from the recorded one.
//!
//! Persisted form: one `<path>\t<float seconds>` line per entry. Saving merges
//! the partition already on disk with the in-memory entries and rewrites the
//! whole file, dropping entries whose source file no longer exists.

use crate::layout::temp_path;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};

/// Field separator of a ledger line.
pub const LEDGER_DELIMITER: char = '\t';

/// Errors reading or writing a ledger partition.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to read ledger {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to write ledger {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// What a successful save wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveReport {
    /// Entries now in the partition file.
    pub written: usize,
    /// Entries removed because their source file vanished.
    pub dropped: Vec<PathBuf>,
}

/// Seconds since the Unix epoch as a float, matching the ledger format.
pub fn system_time_secs(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

/// Current on-disk modification time of `path`.
pub fn mtime_secs(path: &Path) -> io::Result<f64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(system_time_secs(modified))
}

/// Parse one ledger line into `(path, seconds)`.
///
/// Lines without exactly two fields or with a non-numeric timestamp are
/// rejected.
pub fn parse_line(line: &str) -> Option<(PathBuf, f64)> {
    let line = line.trim();
    let mut fields = line.split(LEDGER_DELIMITER);
    let (path, secs) = match (fields.next(), fields.next(), fields.next()) {
        (Some(path), Some(secs), None) if !path.is_empty() => (path, secs),
        _ => return None,
    };
    let secs: f64 = secs.trim().parse().ok()?;
    if !secs.is_finite() {
        return None;
    }
    Some((PathBuf::from(path), secs))
}

/// Render one ledger line, newline included.
pub fn format_line(path: &Path, secs: f64) -> String {
    format!("{}{}{}\n", path.display(), LEDGER_DELIMITER, secs)
}

fn read_partition(path: &Path) -> Result<HashMap<PathBuf, f64>, LedgerError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(source) => {
            return Err(LedgerError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut entries = HashMap::new();
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Some((source, secs)) => {
                entries.insert(source, secs);
            }
            None => warn!(
                ledger = %path.display(),
                line = number + 1,
                "Skipping malformed ledger line"
            ),
        }
    }
    Ok(entries)
}

/// In-memory view of one ledger partition.
#[derive(Debug, Clone)]
pub struct ProcessedLedger {
    file: PathBuf,
    entries: HashMap<PathBuf, f64>,
}

impl ProcessedLedger {
    /// An empty ledger bound to a partition file that is not read.
    pub fn empty(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            entries: HashMap::new(),
        }
    }

    /// Load a partition file. A missing file yields an empty ledger.
    pub fn load(file: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let file = file.into();
        let entries = read_partition(&file)?;
        debug!(ledger = %file.display(), entries = entries.len(), "Loaded ledger");
        Ok(Self { file, entries })
    }

    /// Partition file this ledger saves to.
    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recorded modification time for `path`, if any.
    pub fn get(&self, path: &Path) -> Option<f64> {
        self.entries.get(path).copied()
    }

    /// True when `path` has never been converted or was modified since.
    pub fn is_due(&self, path: &Path, current_mtime: f64) -> bool {
        match self.entries.get(path) {
            Some(recorded) => *recorded != current_mtime,
            None => true,
        }
    }

    /// Record an entry with a known modification time.
    pub fn record(&mut self, path: impl Into<PathBuf>, mtime: f64) {
        self.entries.insert(path.into(), mtime);
    }

    /// Record a completed conversion of `path`.
    ///
    /// The modification time is read again now rather than reused from the
    /// scan, so a rewrite that landed between scan and conversion is not
    /// masked.
    pub fn record_success(&mut self, path: &Path) -> io::Result<f64> {
        let mtime = mtime_secs(path)?;
        self.entries.insert(path.to_path_buf(), mtime);
        Ok(mtime)
    }

    /// Merge with the partition on disk and rewrite it.
    ///
    /// Entries from the file that are not in memory are kept as long as their
    /// source still exists; in-memory entries win on conflict. Entries for
    /// vanished sources are dropped from both the file and memory, with a
    /// warning. The new content is written to a temporary file and renamed
    /// over the partition.
    pub fn save(&mut self) -> Result<SaveReport, LedgerError> {
        let write_err = |source: io::Error| LedgerError::Write {
            path: self.file.clone(),
            source,
        };

        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let mut merged: BTreeMap<PathBuf, f64> = read_partition(&self.file)?.into_iter().collect();
        for (path, secs) in &self.entries {
            merged.insert(path.clone(), *secs);
        }

        let mut dropped = Vec::new();
        merged.retain(|path, _| {
            if path.exists() {
                true
            } else {
                warn!(path = %path.display(), "Source file vanished, dropping ledger entry");
                dropped.push(path.clone());
                false
            }
        });
        for path in &dropped {
            self.entries.remove(path);
        }

        let mut content = String::new();
        for (path, secs) in &merged {
            content.push_str(&format_line(path, *secs));
        }

        let temp = temp_path(&self.file);
        let written = (|| -> io::Result<()> {
            let mut file = fs::File::create(&temp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp, &self.file)
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(write_err(e));
        }

        Ok(SaveReport {
            written: merged.len(),
            dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn touch(path: &Path, content: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut file = File::create(path).unwrap();
        file.write_all(content).unwrap();
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(
            parse_line("/watch/B/OK/202503/LEFT/img1.png\t1741234567.25"),
            Some((PathBuf::from("/watch/B/OK/202503/LEFT/img1.png"), 1741234567.25))
        );
        assert_eq!(
            parse_line("C:\\watch\\img.png\t1741234567\r\n"),
            Some((PathBuf::from("C:\\watch\\img.png"), 1741234567.0))
        );
        assert_eq!(parse_line("no delimiter"), None);
        assert_eq!(parse_line("a\tb\tc"), None);
        assert_eq!(parse_line("/x.png\tsoon"), None);
        assert_eq!(parse_line("\t12.5"), None);
    }

    #[test]
    fn test_missing_partition_loads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = ProcessedLedger::load(temp_dir.path().join("absent.txt")).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_is_due() {
        let mut ledger = ProcessedLedger::empty("/unused");
        let path = Path::new("/watch/a.png");

        assert!(ledger.is_due(path, 10.0));
        ledger.record(path, 10.0);
        assert!(!ledger.is_due(path, 10.0));
        assert!(ledger.is_due(path, 10.5));
    }

    #[test]
    fn test_record_success_reads_current_mtime() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a.png");
        touch(&source, b"png");

        let mut ledger = ProcessedLedger::empty(temp_dir.path().join("ledger.txt"));
        let recorded = ledger.record_success(&source).unwrap();

        assert_eq!(recorded, mtime_secs(&source).unwrap());
        assert!(!ledger.is_due(&source, recorded));
    }

    #[test]
    fn test_record_success_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut ledger = ProcessedLedger::empty(temp_dir.path().join("ledger.txt"));
        let missing = temp_dir.path().join("gone.png");

        assert!(ledger.record_success(&missing).is_err());
        assert!(ledger.get(&missing).is_none());
    }

    #[test]
    fn test_save_then_load_preserves_entries() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a.png");
        touch(&source, b"png");
        let file = temp_dir.path().join("nested/Processed_files/202503/b_processed_files_202503.txt");

        let mut ledger = ProcessedLedger::empty(&file);
        let mtime = ledger.record_success(&source).unwrap();
        let report = ledger.save().unwrap();
        assert_eq!(report.written, 1);
        assert!(report.dropped.is_empty());
        assert!(!temp_path(&file).exists(), "temp file should be renamed away");

        let reloaded = ProcessedLedger::load(&file).unwrap();
        assert_eq!(reloaded.get(&source), Some(mtime));
    }

    #[test]
    fn test_save_keeps_disk_entries_for_existing_sources() {
        let temp_dir = TempDir::new().unwrap();
        let kept = temp_dir.path().join("kept.png");
        let fresh = temp_dir.path().join("fresh.png");
        touch(&kept, b"png");
        touch(&fresh, b"png");
        let file = temp_dir.path().join("ledger.txt");
        fs::write(&file, format_line(&kept, 42.5)).unwrap();

        // This instance never loaded the file.
        let mut ledger = ProcessedLedger::empty(&file);
        ledger.record(&fresh, 7.0);
        let report = ledger.save().unwrap();
        assert_eq!(report.written, 2);

        let reloaded = ProcessedLedger::load(&file).unwrap();
        assert_eq!(reloaded.get(&kept), Some(42.5));
        assert_eq!(reloaded.get(&fresh), Some(7.0));
    }

    #[test]
    fn test_save_memory_wins_over_disk() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a.png");
        touch(&source, b"png");
        let file = temp_dir.path().join("ledger.txt");
        fs::write(&file, format_line(&source, 1.0)).unwrap();

        let mut ledger = ProcessedLedger::load(&file).unwrap();
        ledger.record(&source, 2.0);
        ledger.save().unwrap();

        assert_eq!(ProcessedLedger::load(&file).unwrap().get(&source), Some(2.0));
    }

    #[test]
    fn test_save_drops_vanished_sources() {
        let temp_dir = TempDir::new().unwrap();
        let alive = temp_dir.path().join("alive.png");
        let gone_on_disk = temp_dir.path().join("gone_disk.png");
        let gone_in_memory = temp_dir.path().join("gone_memory.png");
        touch(&alive, b"png");
        let file = temp_dir.path().join("ledger.txt");
        fs::write(
            &file,
            format!("{}{}", format_line(&alive, 1.0), format_line(&gone_on_disk, 2.0)),
        )
        .unwrap();

        let mut ledger = ProcessedLedger::load(&file).unwrap();
        ledger.record(&gone_in_memory, 3.0);
        let report = ledger.save().unwrap();

        assert_eq!(report.written, 1);
        assert_eq!(report.dropped.len(), 2);
        assert!(report.dropped.contains(&gone_on_disk));
        assert!(report.dropped.contains(&gone_in_memory));
        assert!(ledger.get(&gone_in_memory).is_none());

        let content = fs::read_to_string(&file).unwrap();
        assert_eq!(content, format_line(&alive, 1.0));
    }

    #[test]
    fn test_load_skips_malformed_lines() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("ledger.txt");
        fs::write(&file, "garbage\n/a.png\t5.5\n\n/b.png\tlater\n").unwrap();

        let ledger = ProcessedLedger::load(&file).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(Path::new("/a.png")), Some(5.5));
    }

    #[test]
    fn test_save_rewrites_instead_of_appending() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a.png");
        touch(&source, b"png");
        let file = temp_dir.path().join("ledger.txt");

        let mut ledger = ProcessedLedger::empty(&file);
        ledger.record(&source, 1.0);
        ledger.save().unwrap();
        ledger.record(&source, 2.0);
        ledger.save().unwrap();

        let content = fs::read_to_string(&file).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert_eq!(content, format_line(&source, 2.0));
    }

    #[test]
    fn test_save_aborts_when_partition_unreadable() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a.png");
        touch(&source, b"png");
        let file = temp_dir.path().join("ledger.txt");
        fs::create_dir_all(&file).unwrap();

        let mut ledger = ProcessedLedger::empty(&file);
        ledger.record(&source, 1.0);
        assert!(matches!(ledger.save(), Err(LedgerError::Read { .. })));
        assert_eq!(ledger.get(&source), Some(1.0));
        assert!(file.is_dir());
    }

    #[test]
    fn test_save_failure_keeps_entries() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a.png");
        touch(&source, b"png");
        let blocker = temp_dir.path().join("not-a-dir");
        touch(&blocker, b"");

        let mut ledger = ProcessedLedger::empty(blocker.join("ledger.txt"));
        ledger.record(&source, 1.0);
        assert!(matches!(ledger.save(), Err(LedgerError::Write { .. })));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(&source), Some(1.0));
    }

    // Timestamps must survive the text format bit-for-bit, otherwise an
    // unchanged file would look modified after a restart.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_timestamp_text_is_exact(
            secs in 0.0f64..4_102_444_800.0,
            name in "[a-zA-Z0-9_]{1,16}",
        ) {
            let path = PathBuf::from(format!("/watch/OK/202503/LEFT/{}.png", name));
            let line = format_line(&path, secs);
            let (parsed_path, parsed_secs) = parse_line(&line).unwrap();
            prop_assert_eq!(parsed_path, path);
            prop_assert_eq!(parsed_secs.to_bits(), secs.to_bits());
        }
    }
}
