//! Concurrent tree walker
//!
//! A dispatcher receives directory tasks from a bounded channel and spawns
//! one task per directory, limited by a directory semaphore. Each directory
//! task lists its directory, queries the type of every entry and:
//! - queues subdirectories (or walks them inline when the queue is full)
//! - dispatches candidate files as classification tasks
//!
//! Classification tasks are bounded by a second semaphore: a directory task
//! waits for a permit before dispatching a file, so no more than
//! `max_outstanding` files are ever in flight. The walk ends when the
//! pending-directory counter drains; every file permit is then reacquired,
//! which proves all classification work has finished.
//!
//! Sessions are only held for one list or stat call at a time, so directory
//! tasks waiting on file permits never starve file tasks of sessions.

use crate::config::StatPolicy;
use crate::error::{ScanError, ScanResult, SessionOpError, TransportError};
use crate::transport::types::{is_special_name, join_remote, DirEntry, EntryType};
use crate::transport::{Connector, Session};
use crate::walker::context::{WalkContext, WalkCounters, WalkSummary};
use crate::walker::processor::process_file;
use crate::walker::queue::{DirTask, PendingDirs};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

/// First backoff between attribute-query retries (doubles each attempt)
const STAT_RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// Longest pause between two attempts
const MAX_STAT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Pause before retry number `attempt` (1-based): doubling, capped
fn retry_backoff(attempt: u32) -> Duration {
    STAT_RETRY_BACKOFF
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(MAX_STAT_RETRY_BACKOFF)
}

/// Marks a classification task finished on drop
struct Outstanding(Arc<WalkCounters>);

impl Drop for Outstanding {
    fn drop(&mut self) {
        self.0.task_finished();
    }
}

/// Walks a remote tree and dispatches candidate files
pub struct TreeWalker<C: Connector> {
    ctx: Arc<WalkContext<C>>,
    file_slots: Arc<Semaphore>,
    max_outstanding: usize,
    dir_slots: Arc<Semaphore>,
    max_dirs: usize,
    queue_size: usize,
    abort: Arc<Mutex<Option<ScanError>>>,
}

impl<C: Connector> Clone for TreeWalker<C> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            file_slots: Arc::clone(&self.file_slots),
            max_outstanding: self.max_outstanding,
            dir_slots: Arc::clone(&self.dir_slots),
            max_dirs: self.max_dirs,
            queue_size: self.queue_size,
            abort: Arc::clone(&self.abort),
        }
    }
}

impl<C: Connector> TreeWalker<C> {
    /// Create a walker; all limits are clamped to at least 1
    pub fn new(
        ctx: Arc<WalkContext<C>>,
        max_outstanding: usize,
        max_dirs: usize,
        queue_size: usize,
    ) -> Self {
        let max_outstanding = max_outstanding.max(1);
        let max_dirs = max_dirs.max(1);
        Self {
            ctx,
            file_slots: Arc::new(Semaphore::new(max_outstanding)),
            max_outstanding,
            dir_slots: Arc::new(Semaphore::new(max_dirs)),
            max_dirs,
            queue_size: queue_size.max(1),
            abort: Arc::new(Mutex::new(None)),
        }
    }

    pub fn context(&self) -> &Arc<WalkContext<C>> {
        &self.ctx
    }

    /// Ceiling on classification tasks in flight
    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding
    }

    /// Walk the tree below `root` and wait for every dispatched file
    ///
    /// Listing failures and undeterminable entries are counted and skipped;
    /// only the fail-fast attribute policy turns a per-entry failure into an
    /// error, and even then in-flight classification work is joined first.
    pub async fn walk(&self, root: &str) -> ScanResult<WalkSummary> {
        let (task_tx, mut task_rx) = mpsc::channel::<DirTask>(self.queue_size);
        let pending = PendingDirs::new();

        info!(
            root = %root,
            max_outstanding = self.max_outstanding,
            max_dirs = self.max_dirs,
            "Starting walk"
        );

        pending.add();
        if task_tx.send(DirTask::root(root.to_string())).await.is_err() {
            pending.done();
        }

        // Dispatch loop - ends when no directory is queued or in progress
        loop {
            let task = tokio::select! {
                _ = pending.wait_idle() => break,
                task = task_rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            let guard = pending.guard();
            if self.ctx.should_stop() {
                continue;
            }

            let permit = match Arc::clone(&self.dir_slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => continue,
            };

            let walker = self.clone();
            let tx = task_tx.clone();
            let pending = Arc::clone(&pending);
            tokio::spawn(async move {
                let _guard = guard;
                let _permit = permit;
                walker.walk_subtree(task, tx, pending).await;
            });
        }
        drop(task_tx);

        debug!("Directories done, waiting for in-flight files");
        let _ = self.dir_slots.acquire_many(self.max_dirs as u32).await;
        let _ = self.file_slots.acquire_many(self.max_outstanding as u32).await;

        if let Some(err) = self.abort.lock().take() {
            return Err(err);
        }

        let summary = self.ctx.counters.snapshot();
        info!(
            dirs = summary.dirs_listed,
            listing_errors = summary.listing_errors,
            dispatched = summary.dispatched,
            stat_failures = summary.stat_failures,
            peak_outstanding = summary.peak_outstanding,
            "Walk completed"
        );
        Ok(summary)
    }

    /// Walk one directory, plus any subdirectories that did not fit the queue
    async fn walk_subtree(&self, task: DirTask, tx: mpsc::Sender<DirTask>, pending: Arc<PendingDirs>) {
        let mut stack = vec![task];

        while let Some(dir) = stack.pop() {
            if self.ctx.should_stop() {
                break;
            }

            for sub in self.walk_directory(&dir).await {
                pending.add();
                match tx.try_send(sub) {
                    Ok(()) => {}
                    Err(TrySendError::Full(sub) | TrySendError::Closed(sub)) => {
                        // Still counted by this task's own guard
                        pending.done();
                        self.ctx.counters.record_inline_dir();
                        stack.push(sub);
                    }
                }
            }
        }
    }

    /// List one directory, dispatch its files and return its subdirectories
    async fn walk_directory(&self, dir: &DirTask) -> Vec<DirTask> {
        let counters = &self.ctx.counters;

        let path = dir.path.clone();
        let names = match self.ctx.with_session(move |s| s.list_dir(&path)).await {
            Ok(names) => names,
            Err(e) => {
                warn!(path = %dir.path, error = %e, "Failed to list directory, skipping subtree");
                counters.record_listing_error();
                return Vec::new();
            }
        };
        counters.record_dir();

        let names: Vec<String> = names.into_iter().filter(|n| !is_special_name(n)).collect();
        counters.record_entries(names.len() as u64);
        debug!(path = %dir.path, entries = names.len(), "Listed directory");

        let mut subdirs = Vec::new();
        for name in names {
            if self.ctx.should_stop() {
                break;
            }

            let full_path = join_remote(&dir.path, &name);
            if self.ctx.is_excluded(&full_path) {
                counters.record_excluded();
                continue;
            }

            let Some(entry_type) = self.entry_type(&full_path).await else {
                continue;
            };
            let entry = DirEntry {
                name,
                path: full_path,
                entry_type,
            };

            if entry.is_dir() {
                let within_depth = self.ctx.max_depth.map_or(true, |max| dir.depth < max);
                if within_depth {
                    subdirs.push(dir.child(entry.path));
                } else {
                    counters.record_depth_limited();
                }
            } else if entry.entry_type.may_have_content() {
                if self.ctx.filter.is_candidate(&entry.name) {
                    self.dispatch_file(entry.path).await;
                } else {
                    counters.record_skipped_file();
                }
            } else {
                counters.record_other_entry();
            }
        }

        subdirs
    }

    /// Query an entry's type, applying the attribute-failure policy
    async fn entry_type(&self, path: &str) -> Option<EntryType> {
        let policy = self.ctx.stat_policy;
        let mut attempt = 0u32;

        loop {
            let query_path = path.to_string();
            let err = match self.ctx.with_session(move |s| s.stat(&query_path)).await {
                Ok(stat) => return Some(stat.entry_type),
                Err(e) => e,
            };

            if attempt < policy.retries() && !self.ctx.should_stop() {
                attempt += 1;
                self.ctx.counters.record_stat_retry();
                let backoff = retry_backoff(attempt);
                debug!(path = %path, attempt, error = %err, "Retrying attribute query");
                tokio::time::sleep(backoff).await;
                continue;
            }

            self.ctx.counters.record_stat_failure();
            if policy == StatPolicy::FailFast {
                error!(path = %path, error = %err, "Could not determine entry type, aborting scan");
                let source = match err {
                    SessionOpError::Transport(e) => e,
                    SessionOpError::Pool(e) => TransportError::StatFailed {
                        path: path.to_string(),
                        reason: e.to_string(),
                    },
                };
                self.halt(ScanError::StatAborted {
                    path: path.to_string(),
                    source,
                });
            } else {
                warn!(path = %path, error = %err, "Could not determine entry type, skipping");
            }
            return None;
        }
    }

    /// Wait for a file permit, then spawn the classification task
    async fn dispatch_file(&self, path: String) {
        let permit = match Arc::clone(&self.file_slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        self.ctx.counters.task_started();
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            let _permit = permit;
            let _outstanding = Outstanding(Arc::clone(&ctx.counters));
            process_file(&ctx, path).await;
        });
    }

    /// Record the first fatal error and stop dispatching
    fn halt(&self, err: ScanError) {
        let mut slot = self.abort.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
        self.ctx.halted.store(true, Ordering::Relaxed);
    }
}
