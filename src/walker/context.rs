//! Shared state of one scan
//!
//! Everything a directory or file task needs is reachable from one
//! `Arc<WalkContext>`: the session pool, the stats aggregator, the walk
//! counters and the immutable scan settings.

use crate::config::{ScanConfig, StatPolicy};
use crate::content::{CandidateFilter, Classifier};
use crate::download::Downloader;
use crate::error::{SessionOpError, TransportError, TransportResult};
use crate::staging::StagingArea;
use crate::stats::StatsAggregator;
use crate::transport::{Connector, SessionPool};
use regex::Regex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Walk counters, updated lock-free by directory and file tasks
#[derive(Debug, Default)]
pub struct WalkCounters {
    pub dirs_listed: AtomicU64,
    pub listing_errors: AtomicU64,
    pub entries_seen: AtomicU64,
    pub stat_failures: AtomicU64,
    pub stat_retries: AtomicU64,
    pub skipped_files: AtomicU64,
    pub other_entries: AtomicU64,
    pub excluded: AtomicU64,
    pub depth_limited: AtomicU64,
    pub dispatched: AtomicU64,
    pub outstanding: AtomicU64,
    pub peak_outstanding: AtomicU64,
    pub inline_dirs: AtomicU64,
}

impl WalkCounters {
    pub fn record_dir(&self) {
        self.dirs_listed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_listing_error(&self) {
        self.listing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_entries(&self, count: u64) {
        self.entries_seen.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_stat_failure(&self) {
        self.stat_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stat_retry(&self) {
        self.stat_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_file(&self) {
        self.skipped_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_other_entry(&self) {
        self.other_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_excluded(&self) {
        self.excluded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_depth_limited(&self) {
        self.depth_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inline_dir(&self) {
        self.inline_dirs.fetch_add(1, Ordering::Relaxed);
    }

    /// A file task was dispatched and is now outstanding
    pub fn task_started(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let now = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_outstanding.fetch_max(now, Ordering::SeqCst);
    }

    /// A file task finished
    pub fn task_finished(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    /// Plain copy of the counters
    pub fn snapshot(&self) -> WalkSummary {
        WalkSummary {
            dirs_listed: self.dirs_listed.load(Ordering::Relaxed),
            listing_errors: self.listing_errors.load(Ordering::Relaxed),
            entries_seen: self.entries_seen.load(Ordering::Relaxed),
            stat_failures: self.stat_failures.load(Ordering::Relaxed),
            stat_retries: self.stat_retries.load(Ordering::Relaxed),
            skipped_files: self.skipped_files.load(Ordering::Relaxed),
            other_entries: self.other_entries.load(Ordering::Relaxed),
            excluded: self.excluded.load(Ordering::Relaxed),
            depth_limited: self.depth_limited.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            outstanding: self.outstanding.load(Ordering::SeqCst),
            peak_outstanding: self.peak_outstanding.load(Ordering::SeqCst),
            inline_dirs: self.inline_dirs.load(Ordering::Relaxed),
        }
    }
}

/// Walk counters at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkSummary {
    /// Directories listed successfully
    pub dirs_listed: u64,
    /// Directories whose listing failed (subtree skipped)
    pub listing_errors: u64,
    /// Entries returned by listings, excluding `.` and `..`
    pub entries_seen: u64,
    /// Entries whose type could not be determined
    pub stat_failures: u64,
    /// Attribute queries retried
    pub stat_retries: u64,
    /// Files without a recognized extension
    pub skipped_files: u64,
    /// Entries that are neither file nor directory
    pub other_entries: u64,
    /// Paths matched by an exclude pattern
    pub excluded: u64,
    /// Directories not walked because of the depth limit
    pub depth_limited: u64,
    /// File tasks dispatched
    pub dispatched: u64,
    /// File tasks in flight
    pub outstanding: u64,
    /// Highest number of file tasks in flight at once
    pub peak_outstanding: u64,
    /// Directories walked inline because the queue was full
    pub inline_dirs: u64,
}

/// Shared state of one scan
pub struct WalkContext<C: Connector> {
    pub pool: SessionPool<C>,
    pub stats: Arc<StatsAggregator>,
    pub counters: Arc<WalkCounters>,
    pub classifier: Arc<dyn Classifier>,
    pub downloader: Downloader,
    pub staging: StagingArea,
    pub filter: CandidateFilter,
    pub threshold: f32,
    pub cleanup: bool,
    pub exclude_patterns: Vec<Regex>,
    pub max_depth: Option<u32>,
    pub stat_policy: StatPolicy,
    /// Set by the signal handler
    pub shutdown: Arc<AtomicBool>,
    /// Set when the fail-fast stat policy aborts the scan
    pub halted: AtomicBool,
}

impl<C: Connector> WalkContext<C> {
    /// Build a context with fresh stats and counters
    pub fn new(config: &ScanConfig, pool: SessionPool<C>, classifier: Arc<dyn Classifier>) -> Self {
        Self::with_shared(
            config,
            pool,
            classifier,
            Arc::new(StatsAggregator::new()),
            Arc::new(WalkCounters::default()),
            Arc::new(AtomicBool::new(false)),
        )
    }

    /// Build a context around stats, counters and a shutdown flag owned elsewhere
    pub fn with_shared(
        config: &ScanConfig,
        pool: SessionPool<C>,
        classifier: Arc<dyn Classifier>,
        stats: Arc<StatsAggregator>,
        counters: Arc<WalkCounters>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            pool,
            stats,
            counters,
            classifier,
            downloader: Downloader::new(config.chunk_size, config.download_timeout),
            staging: config.staging.clone(),
            filter: config.filter.clone(),
            threshold: config.threshold,
            cleanup: config.cleanup,
            exclude_patterns: config.exclude_patterns.clone(),
            max_depth: config.max_depth,
            stat_policy: config.stat_policy,
            shutdown,
            halted: AtomicBool::new(false),
        }
    }

    /// Check if no new work should be dispatched
    pub fn should_stop(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed) || self.halted.load(Ordering::Relaxed)
    }

    /// Check if a remote path should be excluded
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude_patterns.iter().any(|re| re.is_match(path))
    }

    /// Acquire a session, run `op` on it in a blocking task, release it
    ///
    /// A failure that indicates a dead session marks it broken so it is
    /// replaced rather than handed to the next caller.
    pub async fn with_session<T, F>(&self, op: F) -> Result<T, SessionOpError>
    where
        T: Send + 'static,
        F: FnOnce(&mut C::Session) -> TransportResult<T> + Send + 'static,
    {
        let mut session = self.pool.acquire().await?;

        let joined = tokio::task::spawn_blocking(move || {
            let result = op(session.session());
            if let Err(e) = &result {
                if e.should_reconnect() {
                    session.mark_broken();
                }
            }
            result
        })
        .await;

        let result = joined.map_err(|e| TransportError::SessionLost {
            reason: format!("transport task failed: {}", e),
        })?;
        Ok(result?)
    }
}
