//! Scan coordinator - owns the session pool for the lifetime of one scan
//!
//! The coordinator is responsible for:
//! - Preparing the staging directory
//! - Establishing the session pool (and failing fast when no session works)
//! - Running the tree walk from the configured root
//! - Closing the pool and producing the final report

use crate::config::ScanConfig;
use crate::content::Classifier;
use crate::error::{ConfigError, ScanError, ScanResult};
use crate::stats::{ScanStats, StatsAggregator};
use crate::transport::{Connector, SessionPool};
use crate::walker::context::{WalkContext, WalkCounters, WalkSummary};
use crate::walker::tree::TreeWalker;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of a finished scan
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// Per-file outcomes and the positive list
    pub stats: ScanStats,

    /// Directory and dispatch counters
    pub walk: WalkSummary,

    /// Where the scan read from
    pub endpoint: String,

    /// Root path that was walked
    pub root: String,

    /// Sessions the pool was asked for
    pub sessions_requested: usize,

    /// Sessions actually established at startup
    pub sessions_established: usize,

    /// Broken sessions replaced during the scan
    pub sessions_replaced: u64,

    /// Sessions discarded as broken
    pub sessions_broken: u64,

    pub threshold: f32,

    /// Name of the classifier used
    pub classifier: String,

    /// Wall-clock start of the scan
    pub started_at: DateTime<Utc>,

    pub duration: Duration,

    /// False when the scan was interrupted before the tree was exhausted
    pub completed: bool,
}

impl ScanReport {
    /// Classified files per second
    pub fn files_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.stats.total_files as f64 / secs
        } else {
            0.0
        }
    }
}

/// Live progress of a running scan
#[derive(Debug, Clone)]
pub struct ScanProgress {
    /// Directories listed
    pub dirs: u64,

    /// Candidate files found
    pub candidates: u64,

    pub positive: u64,

    pub negative: u64,

    /// Download and classifier errors
    pub errors: u64,

    /// Bytes downloaded
    pub bytes: u64,

    /// File tasks in flight
    pub outstanding: u64,

    pub elapsed: Duration,
}

impl ScanProgress {
    /// Calculate candidates per second rate
    pub fn files_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.candidates as f64 / secs
        } else {
            0.0
        }
    }
}

/// Read-only view of a scan's counters for progress display
#[derive(Clone)]
pub struct ProgressHandle {
    stats: Arc<StatsAggregator>,
    counters: Arc<WalkCounters>,
    started: Instant,
}

impl ProgressHandle {
    pub fn snapshot(&self) -> ScanProgress {
        let stats = self.stats.snapshot();
        let walk = self.counters.snapshot();
        ScanProgress {
            dirs: walk.dirs_listed,
            candidates: stats.total_files,
            positive: stats.positive_count,
            negative: stats.negative_count,
            errors: stats.error_count,
            bytes: stats.bytes_downloaded,
            outstanding: walk.outstanding,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Coordinates one scan of a remote tree
pub struct ScanCoordinator<C: Connector> {
    config: ScanConfig,
    connector: C,
    classifier: Arc<dyn Classifier>,
    stats: Arc<StatsAggregator>,
    counters: Arc<WalkCounters>,
    shutdown: Arc<AtomicBool>,
}

impl<C: Connector> ScanCoordinator<C> {
    /// Create a coordinator; no connection is made until [`run`](Self::run)
    pub fn new(config: ScanConfig, connector: C, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            config,
            connector,
            classifier,
            stats: Arc::new(StatsAggregator::new()),
            counters: Arc::new(WalkCounters::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a clone of the shutdown flag (for signal handlers)
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Handle for polling progress while the scan runs
    pub fn progress_handle(&self) -> ProgressHandle {
        ProgressHandle {
            stats: Arc::clone(&self.stats),
            counters: Arc::clone(&self.counters),
            started: Instant::now(),
        }
    }

    /// Run the scan to completion (or until interrupted)
    pub async fn run(self) -> ScanResult<ScanReport> {
        let Self {
            config,
            connector,
            classifier,
            stats,
            counters,
            shutdown,
        } = self;

        let start_time = Instant::now();
        let started_at: DateTime<Utc> = Utc::now();
        let endpoint = connector.endpoint();

        info!(
            endpoint = %endpoint,
            root = %config.root,
            connections = config.connections,
            threshold = config.threshold,
            classifier = classifier.name(),
            "Starting scan"
        );

        config
            .staging
            .prepare()
            .map_err(|e| ConfigError::InvalidStagingDir {
                path: config.staging.dir().to_path_buf(),
                reason: e.to_string(),
            })?;

        // Connecting blocks, keep it off the runtime threads
        let requested = config.connections;
        let acquire_timeout = config.acquire_timeout;
        let pool = tokio::task::spawn_blocking(move || {
            SessionPool::new(connector, requested, acquire_timeout)
        })
        .await
        .map_err(|e| ScanError::TaskFailed(e.to_string()))?;

        if pool.capacity() == 0 {
            return Err(ScanError::NoSessions {
                endpoint,
                requested,
            });
        }
        if pool.capacity() < requested {
            warn!(
                requested,
                established = pool.capacity(),
                "Running with fewer sessions than requested"
            );
        }

        let classifier_name = classifier.name().to_string();
        let ctx = Arc::new(WalkContext::with_shared(
            &config,
            pool.clone(),
            classifier,
            Arc::clone(&stats),
            Arc::clone(&counters),
            Arc::clone(&shutdown),
        ));
        let walker = TreeWalker::new(
            ctx,
            config.max_outstanding,
            config.max_concurrent_dirs,
            config.queue_size,
        );

        let walked = walker.walk(&config.root).await;
        pool.close();
        let walk = walked?;

        let completed = !shutdown.load(Ordering::SeqCst);
        if !completed {
            info!("Scan interrupted, report is partial");
        }

        let stats = stats.snapshot();
        let duration = start_time.elapsed();
        debug!(started_at = %started_at.to_rfc3339(), "Scan started at");

        info!(
            files = stats.total_files,
            positive = stats.positive_count,
            negative = stats.negative_count,
            errors = stats.error_count,
            dirs = walk.dirs_listed,
            duration_secs = duration.as_secs(),
            "Scan completed"
        );

        Ok(ScanReport {
            stats,
            walk,
            endpoint,
            root: config.root.clone(),
            sessions_requested: pool.requested(),
            sessions_established: pool.capacity(),
            sessions_replaced: pool.replaced_sessions(),
            sessions_broken: pool.broken_sessions(),
            threshold: config.threshold,
            classifier: classifier_name,
            started_at,
            duration,
            completed,
        })
    }
}
