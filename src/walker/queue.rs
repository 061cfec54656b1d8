//! Directory work queue bookkeeping
//!
//! Directory tasks travel through a bounded channel. When the channel is
//! full, the discovering task walks the subdirectory inline instead of
//! waiting, so a full queue applies backpressure without deadlocking the
//! dispatcher.
//!
//! Completion is tracked with a pending counter: a directory is counted
//! before it is queued and uncounted when its task finishes. The counter can
//! only reach zero once every directory is done, at which point the waiting
//! dispatcher is notified.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A task to walk a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirTask {
    /// Full remote path of the directory
    pub path: String,

    /// Depth from the walk root (0 = root)
    pub depth: u32,
}

impl DirTask {
    /// Create the root task
    pub fn root(path: String) -> Self {
        Self { path, depth: 0 }
    }

    /// Task for a subdirectory of this one
    pub fn child(&self, path: String) -> Self {
        Self {
            path,
            depth: self.depth + 1,
        }
    }
}

/// Count of directories queued or being walked
#[derive(Debug, Default)]
pub struct PendingDirs {
    count: AtomicUsize,
    idle: Notify,
}

impl PendingDirs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Count a directory about to be queued
    pub fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Uncount a directory that is finished (or was never queued)
    pub fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_one();
        }
    }

    /// Directories queued or in progress
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until no directory is queued or in progress
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Guard that uncounts one directory when dropped
    pub fn guard(self: &Arc<Self>) -> PendingGuard {
        PendingGuard {
            pending: Arc::clone(self),
        }
    }
}

/// Uncounts one pending directory on drop, including when its task panics
#[derive(Debug)]
pub struct PendingGuard {
    pending: Arc<PendingDirs>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.done();
    }
}
