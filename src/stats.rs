//! Scan statistics
//!
//! All counters live in one struct behind one mutex, so a snapshot always
//! satisfies `total_files == positive_count + negative_count + error_count`
//! for every file whose outcome has been recorded.

use parking_lot::Mutex;
use std::path::Path;

/// Outcome of classifying one staged file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Positive,
    Negative,
}

impl From<bool> for Verdict {
    fn from(positive: bool) -> Self {
        if positive {
            Verdict::Positive
        } else {
            Verdict::Negative
        }
    }
}

/// Totals for one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Candidate files dispatched for processing
    pub total_files: u64,
    /// Files the classifier flagged
    pub positive_count: u64,
    /// Files the classifier cleared
    pub negative_count: u64,
    /// Files with no verdict (download or classifier failure)
    pub error_count: u64,
    /// Failures before the classifier ran (pool, open, read, write, timeout)
    pub download_errors: u64,
    /// Failures inside the classifier
    pub classifier_errors: u64,
    /// Bytes successfully staged
    pub bytes_downloaded: u64,
    /// Staged paths of flagged files, in completion order
    pub positive_list: Vec<String>,
}

impl ScanStats {
    /// Files whose outcome has been recorded
    pub fn settled(&self) -> u64 {
        self.positive_count + self.negative_count + self.error_count
    }

    /// Check that every counted file has an outcome
    pub fn is_settled(&self) -> bool {
        self.total_files == self.settled()
    }
}

/// Shared, mutex-guarded [`ScanStats`]
#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<ScanStats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a candidate file before it is downloaded
    pub fn record_candidate(&self) {
        self.inner.lock().total_files += 1;
    }

    /// Count a successful download
    pub fn record_download(&self, bytes: u64) {
        self.inner.lock().bytes_downloaded += bytes;
    }

    /// Record a classifier verdict for a staged file
    pub fn record_verdict(&self, local_path: &Path, verdict: Verdict) {
        let mut stats = self.inner.lock();
        match verdict {
            Verdict::Positive => {
                stats.positive_count += 1;
                stats
                    .positive_list
                    .push(local_path.to_string_lossy().into_owned());
            }
            Verdict::Negative => stats.negative_count += 1,
        }
    }

    /// Record a file that could not be staged
    pub fn record_download_error(&self) {
        let mut stats = self.inner.lock();
        stats.download_errors += 1;
        stats.error_count += 1;
    }

    /// Record a file the classifier failed on
    pub fn record_classifier_error(&self) {
        let mut stats = self.inner.lock();
        stats.classifier_errors += 1;
        stats.error_count += 1;
    }

    /// Copy of the current totals
    pub fn snapshot(&self) -> ScanStats {
        self.inner.lock().clone()
    }

    /// Final totals
    pub fn into_inner(self) -> ScanStats {
        self.inner.into_inner()
    }
}
