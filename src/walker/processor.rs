//! Per-file pipeline: filter, stage, classify, record
//!
//! Every candidate ends in exactly one recorded outcome (positive, negative,
//! download error or classifier error), which keeps
//! `total_files == positive + negative + errors` once all tasks are joined.

use crate::error::DownloadResult;
use crate::stats::Verdict;
use crate::transport::Connector;
use crate::walker::context::WalkContext;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How processing one file ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Not a candidate; nothing was recorded
    Skipped,
    /// Classified positive
    Positive,
    /// Classified negative
    Negative,
    /// Never reached the classifier
    DownloadFailed,
    /// The classifier failed to produce a verdict
    ClassifierFailed,
}

/// Process one remote file
pub async fn process_file<C: Connector>(ctx: &WalkContext<C>, remote: String) -> FileOutcome {
    if !ctx.filter.is_candidate(&remote) {
        return FileOutcome::Skipped;
    }

    ctx.stats.record_candidate();
    debug!(path = %remote, "Found candidate file");

    let local = ctx.staging.local_path_for(&remote);

    match stage(ctx, &remote, &local).await {
        Ok(bytes) => ctx.stats.record_download(bytes),
        Err(e) => {
            warn!(path = %remote, error = %e, "Download failed");
            ctx.stats.record_download_error();
            discard_staged(ctx, &local);
            return FileOutcome::DownloadFailed;
        }
    }

    let classifier = Arc::clone(&ctx.classifier);
    let threshold = ctx.threshold;
    let staged = local.clone();
    let verdict = tokio::task::spawn_blocking(move || classifier.classify(&staged, threshold)).await;

    let outcome = match verdict {
        Ok(Ok(positive)) => {
            let verdict = Verdict::from(positive);
            ctx.stats.record_verdict(&local, verdict);
            if positive {
                info!(path = %remote, local = %local.display(), "Flagged");
                FileOutcome::Positive
            } else {
                debug!(path = %remote, "Cleared");
                FileOutcome::Negative
            }
        }
        Ok(Err(e)) => {
            warn!(path = %remote, error = %e, "Classifier failed");
            ctx.stats.record_classifier_error();
            FileOutcome::ClassifierFailed
        }
        Err(e) => {
            warn!(path = %remote, error = %e, "Classifier task failed");
            ctx.stats.record_classifier_error();
            FileOutcome::ClassifierFailed
        }
    };

    discard_staged(ctx, &local);
    outcome
}

/// Acquire a session and copy `remote` into staging
async fn stage<C: Connector>(ctx: &WalkContext<C>, remote: &str, local: &Path) -> DownloadResult<u64> {
    let session = ctx.pool.acquire().await?;
    ctx.downloader
        .download(session, remote.to_string(), local.to_path_buf())
        .await
}

fn discard_staged<C: Connector>(ctx: &WalkContext<C>, local: &Path) {
    if !ctx.cleanup {
        return;
    }
    if let Err(e) = ctx.staging.discard(local) {
        warn!(local = %local.display(), error = %e, "Failed to remove staged file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::content::Classifier;
    use crate::error::{ClassifierError, ClassifierResult};
    use crate::staging::{StagingArea, StagingNaming};
    use crate::transport::{MemoryConnector, MemoryStore, SessionPool};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn context(
        store: &MemoryStore,
        staging: &TempDir,
        classifier: Arc<dyn Classifier>,
    ) -> WalkContext<MemoryConnector> {
        let config = ScanConfig {
            staging: StagingArea::new(staging.path(), "ios_", StagingNaming::BaseName),
            ..ScanConfig::default()
        };
        let pool = SessionPool::new(MemoryConnector::new(store.clone()), 2, None);
        WalkContext::new(&config, pool, classifier)
    }

    fn by_size(min: usize) -> Arc<dyn Classifier> {
        Arc::new(move |path: &Path, _: f32| -> ClassifierResult<bool> {
            Ok(std::fs::metadata(path).map(|m| m.len() as usize >= min).unwrap_or(false))
        })
    }

    #[tokio::test]
    async fn test_positive_and_negative() {
        let store = MemoryStore::new();
        store.add_file("/DCIM/big.jpg", vec![1u8; 100]);
        store.add_file("/DCIM/small.png", vec![1u8; 10]);
        let staging = TempDir::new().unwrap();
        let ctx = context(&store, &staging, by_size(50));

        assert_eq!(process_file(&ctx, "/DCIM/big.jpg".into()).await, FileOutcome::Positive);
        assert_eq!(process_file(&ctx, "/DCIM/small.png".into()).await, FileOutcome::Negative);

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.positive_count, 1);
        assert_eq!(stats.negative_count, 1);
        assert_eq!(stats.bytes_downloaded, 110);
        assert_eq!(
            stats.positive_list,
            vec![staging.path().join("ios_big.jpg").to_string_lossy().into_owned()]
        );
        assert!(staging.path().join("ios_small.png").exists());
    }

    #[tokio::test]
    async fn test_non_candidate_is_not_counted() {
        let store = MemoryStore::new();
        store.add_file("/DCIM/clip.mov", vec![1u8; 100]);
        let staging = TempDir::new().unwrap();
        let ctx = context(&store, &staging, by_size(0));

        assert_eq!(process_file(&ctx, "/DCIM/clip.mov".into()).await, FileOutcome::Skipped);
        assert_eq!(ctx.stats.snapshot().total_files, 0);
        assert_eq!(store.connects(), 2);
        assert_eq!(store.bytes_served(), 0);
    }

    #[tokio::test]
    async fn test_failed_download_skips_classifier() {
        let store = MemoryStore::new();
        store.add_file("/DCIM/broken.jpg", vec![1u8; 10_000]);
        store.fail_read_after("/DCIM/broken.jpg", 1);
        let staging = TempDir::new().unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let classifier: Arc<dyn Classifier> = Arc::new(move |_: &Path, _: f32| -> ClassifierResult<bool> {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        });
        let ctx = context(&store, &staging, classifier);

        assert_eq!(
            process_file(&ctx, "/DCIM/broken.jpg".into()).await,
            FileOutcome::DownloadFailed
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.download_errors, 1);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.positive_count + stats.negative_count, 0);
        assert!(stats.is_settled());
    }

    #[tokio::test]
    async fn test_no_session_is_a_download_error() {
        let store = MemoryStore::new();
        store.add_file("/DCIM/a.jpg", vec![1u8; 10]);
        let staging = TempDir::new().unwrap();
        let ctx = context(&store, &staging, by_size(0));
        ctx.pool.close();

        assert_eq!(
            process_file(&ctx, "/DCIM/a.jpg".into()).await,
            FileOutcome::DownloadFailed
        );
        let stats = ctx.stats.snapshot();
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.download_errors, 1);
        assert!(stats.is_settled());
        assert_eq!(store.bytes_served(), 0);
    }

    #[tokio::test]
    async fn test_classifier_error_is_not_negative() {
        let store = MemoryStore::new();
        store.add_file("/DCIM/a.gif", vec![1u8; 10]);
        let staging = TempDir::new().unwrap();
        let classifier: Arc<dyn Classifier> = Arc::new(|path: &Path, _: f32| -> ClassifierResult<bool> {
            Err(ClassifierError::Decode {
                path: path.to_path_buf(),
                reason: "bad header".into(),
            })
        });
        let ctx = context(&store, &staging, classifier);

        assert_eq!(
            process_file(&ctx, "/DCIM/a.gif".into()).await,
            FileOutcome::ClassifierFailed
        );
        let stats = ctx.stats.snapshot();
        assert_eq!(stats.classifier_errors, 1);
        assert_eq!(stats.negative_count, 0);
        assert!(stats.is_settled());
    }

    #[tokio::test]
    async fn test_cleanup_removes_staged_file() {
        let store = MemoryStore::new();
        store.add_file("/DCIM/a.jpg", vec![1u8; 10]);
        let staging = TempDir::new().unwrap();
        let mut ctx = context(&store, &staging, by_size(0));
        ctx.cleanup = true;

        assert_eq!(process_file(&ctx, "/DCIM/a.jpg".into()).await, FileOutcome::Positive);
        assert!(!staging.path().join("ios_a.jpg").exists());
    }
}
