//! Stability checking module for verifying files are not being written to.
//!
//! Before converting a file, we verify it's stable by checking that its size
//! is non-zero and unchanged over a short wait. This is a heuristic, not a
//! lock: a writer that pauses for exactly the wait window slips through.

use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error};

/// Default wait between the two size reads.
pub const DEFAULT_STABILITY_WAIT: Duration = Duration::from_secs(1);

/// Result of a stability check on a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilityResult {
    /// File size remained unchanged and non-zero during the stability window.
    Stable,
    /// File size changed during the stability window.
    Unstable {
        /// Size when first checked.
        initial_size: u64,
        /// Size after waiting.
        current_size: u64,
    },
    /// File was empty on both reads.
    Empty,
}

impl StabilityResult {
    pub fn is_stable(&self) -> bool {
        matches!(self, StabilityResult::Stable)
    }
}

/// Check if a file is stable by comparing its size before and after a wait period.
///
/// # Arguments
/// * `path` - Path to the file to check
/// * `wait` - How long to wait between the two reads
///
/// # Returns
/// * `Ok(StabilityResult::Stable)` if the size is unchanged and non-zero
/// * `Ok(StabilityResult::Unstable { .. })` if the size changed
/// * `Ok(StabilityResult::Empty)` if the file stayed empty
/// * `Err` if either read fails
pub async fn check_stability(path: &Path, wait: Duration) -> Result<StabilityResult, std::io::Error> {
    let initial_size = tokio::fs::metadata(path).await?.len();

    sleep(wait).await;

    let current_size = tokio::fs::metadata(path).await?.len();
    Ok(compare_sizes(initial_size, current_size))
}

/// Compare two file sizes and return the appropriate StabilityResult.
///
/// This is a pure function extracted for property testing.
#[inline]
pub fn compare_sizes(initial_size: u64, current_size: u64) -> StabilityResult {
    if initial_size != current_size {
        StabilityResult::Unstable {
            initial_size,
            current_size,
        }
    } else if current_size == 0 {
        StabilityResult::Empty
    } else {
        StabilityResult::Stable
    }
}

/// Decides whether a file has finished being written.
#[derive(Debug, Clone, Copy)]
pub struct StabilityGate {
    wait: Duration,
}

impl Default for StabilityGate {
    fn default() -> Self {
        Self::new(DEFAULT_STABILITY_WAIT)
    }
}

impl StabilityGate {
    pub fn new(wait: Duration) -> Self {
        Self { wait }
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// True iff both size reads succeed, agree, and are non-zero.
    ///
    /// I/O failures (vanished file, permission denied) are logged at error
    /// level and count as not stable.
    pub async fn is_stable(&self, path: &Path) -> bool {
        match check_stability(path, self.wait).await {
            Ok(StabilityResult::Stable) => true,
            Ok(result) => {
                debug!(path = %path.display(), ?result, "File not stable yet");
                false
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Stability check failed");
                false
            }
        }
    }
}
