//! Streaming remote files into local staging
//!
//! The copy loop is synchronous and runs on the blocking pool with the
//! session moved into it, while the download future keeps the session's
//! pool slot. The remote file is closed by the [`RemoteFile`] guard and the
//! local file by scope on every exit path.
//!
//! When the deadline passes the slot is released at once and the session is
//! left with the blocking task, which drops it once the remote call it is
//! stuck in returns. A hung endpoint therefore cannot hold a slot (or the
//! walk) past the download timeout.

use crate::error::{DownloadError, DownloadResult};
use crate::transport::{Connector, PooledSession, RemoteFile, Session};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Chunk size used when none is configured
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Copy one remote file into `writer`, chunk by chunk
///
/// Each chunk is handed to a single `write` call; a short write aborts with
/// `PartialWrite`. `cancel` is checked before every remote read.
/// Returns the number of bytes copied.
pub fn copy_remote_file<S, W>(
    session: &mut S,
    remote: &str,
    writer: &mut W,
    local_path: &Path,
    chunk_size: usize,
    cancel: &AtomicBool,
) -> DownloadResult<u64>
where
    S: Session + ?Sized,
    W: Write,
{
    let mut file = RemoteFile::open(session, remote).map_err(DownloadError::Open)?;
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut copied = 0u64;

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(DownloadError::Cancelled {
                path: remote.to_string(),
            });
        }

        let n = file.read(&mut buf).map_err(DownloadError::Read)?;
        if n == 0 {
            break;
        }

        let written = writer.write(&buf[..n]).map_err(|e| DownloadError::Write {
            path: local_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if written < n {
            return Err(DownloadError::PartialWrite {
                path: local_path.to_path_buf(),
                written,
                expected: n,
            });
        }
        copied += n as u64;
    }

    writer.flush().map_err(|e| DownloadError::Write {
        path: local_path.to_path_buf(),
        reason: e.to_string(),
    })?;

    Ok(copied)
}

/// Copy one remote file to `local`, creating or truncating it
///
/// On failure the local file may exist and be truncated; only the returned
/// result says whether the download succeeded.
pub fn download_to_path<S: Session + ?Sized>(
    session: &mut S,
    remote: &str,
    local: &Path,
    chunk_size: usize,
    cancel: &AtomicBool,
) -> DownloadResult<u64> {
    let mut out = File::create(local).map_err(|e| DownloadError::CreateLocal {
        path: local.to_path_buf(),
        reason: e.to_string(),
    })?;
    copy_remote_file(session, remote, &mut out, local, chunk_size, cancel)
}

/// Sets the cancel flag when the download future is dropped
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Downloads remote files with a pooled session and an optional deadline
#[derive(Debug, Clone)]
pub struct Downloader {
    chunk_size: usize,
    timeout: Option<Duration>,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, None)
    }
}

impl Downloader {
    pub fn new(chunk_size: usize, timeout: Option<Duration>) -> Self {
        Self {
            chunk_size,
            timeout,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Download `remote` to `local` using `session`
    ///
    /// The session is consumed. When the copy stops in time it is returned
    /// to the pool, or discarded if the failure left it unusable. When the
    /// deadline passes first, `Timeout` is returned right away: the copy
    /// loop is told to stop at its next chunk boundary, the slot is freed,
    /// and the session is dropped by the blocking task whenever it ends.
    pub async fn download<C: Connector>(
        &self,
        session: PooledSession<C>,
        remote: String,
        local: PathBuf,
    ) -> DownloadResult<u64> {
        let cancel = Arc::new(AtomicBool::new(false));
        let _cancel_on_drop = CancelOnDrop(Arc::clone(&cancel));

        let chunk_size = self.chunk_size;
        let task_cancel = Arc::clone(&cancel);
        let task_remote = remote.clone();
        let (mut session, lease) = session.into_parts();

        let mut handle = tokio::task::spawn_blocking(move || {
            let result = download_to_path(&mut session, &task_remote, &local, chunk_size, &task_cancel);
            (session, result)
        });

        let joined = match self.timeout {
            None => handle.await,
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    cancel.store(true, Ordering::Relaxed);
                    warn!(
                        path = %remote,
                        timeout_ms = limit.as_millis() as u64,
                        "Download timed out, releasing its session slot"
                    );
                    lease.abandon();
                    return Err(DownloadError::Timeout {
                        path: remote,
                        after: limit,
                    });
                }
            },
        };

        // A panicked task took the session with it; dropping the lease frees the slot
        let (session, result) = joined.map_err(|e| DownloadError::TaskFailed(e.to_string()))?;

        let mut session = lease.restore(session);
        if let Err(e) = &result {
            if e.breaks_session() {
                warn!(path = %remote, error = %e, "Session broken during download");
                session.mark_broken();
            } else {
                debug!(path = %remote, error = %e, "Download failed, session still usable");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryConnector, MemoryStore, SessionPool};
    use tempfile::TempDir;

    /// Writer that accepts at most `limit` bytes per call
    struct ShortWriter {
        limit: usize,
        data: Vec<u8>,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn store_with_file(size: usize) -> MemoryStore {
        let store = MemoryStore::new();
        let content: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        store.add_file("/DCIM/100APPLE/IMG_0001.JPG", content);
        store
    }

    #[test]
    fn test_copy_complete_file() {
        let store = store_with_file(10_000);
        let mut session = MemoryConnector::new(store.clone()).connect().unwrap();
        let mut out = Vec::new();

        let copied = copy_remote_file(
            &mut session,
            "/DCIM/100APPLE/IMG_0001.JPG",
            &mut out,
            Path::new("/tmp/out"),
            DEFAULT_CHUNK_SIZE,
            &AtomicBool::new(false),
        )
        .unwrap();

        assert_eq!(copied, 10_000);
        assert_eq!(out.len(), 10_000);
        assert_eq!(out[300], (300 % 251) as u8);
        assert_eq!(store.open_files(), 0);
    }

    #[test]
    fn test_short_write_is_partial_write() {
        let store = store_with_file(1000);
        let mut session = MemoryConnector::new(store.clone()).connect().unwrap();
        let mut writer = ShortWriter {
            limit: 100,
            data: Vec::new(),
        };

        let result = copy_remote_file(
            &mut session,
            "/DCIM/100APPLE/IMG_0001.JPG",
            &mut writer,
            Path::new("/tmp/out"),
            512,
            &AtomicBool::new(false),
        );

        assert!(matches!(
            result,
            Err(DownloadError::PartialWrite {
                written: 100,
                expected: 512,
                ..
            })
        ));
        assert_eq!(store.open_files(), 0);
    }

    #[test]
    fn test_interrupted_read_is_an_error() {
        let store = store_with_file(10_000);
        store.fail_read_after("/DCIM/100APPLE/IMG_0001.JPG", 2);
        let mut session = MemoryConnector::new(store.clone()).connect().unwrap();
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("out.jpg");

        let result = download_to_path(
            &mut session,
            "/DCIM/100APPLE/IMG_0001.JPG",
            &local,
            DEFAULT_CHUNK_SIZE,
            &AtomicBool::new(false),
        );

        assert!(matches!(result, Err(DownloadError::Read(_))));
        // The truncated file is left behind
        assert_eq!(std::fs::metadata(&local).unwrap().len(), 8192);
        assert_eq!(store.open_files(), 0);
    }

    #[test]
    fn test_cancel_stops_before_reading() {
        let store = store_with_file(100);
        let mut session = MemoryConnector::new(store.clone()).connect().unwrap();
        let mut out = Vec::new();

        let result = copy_remote_file(
            &mut session,
            "/DCIM/100APPLE/IMG_0001.JPG",
            &mut out,
            Path::new("/tmp/out"),
            DEFAULT_CHUNK_SIZE,
            &AtomicBool::new(true),
        );

        assert!(matches!(result, Err(DownloadError::Cancelled { .. })));
        assert!(out.is_empty());
        assert_eq!(store.open_files(), 0);
    }

    #[test]
    fn test_missing_local_directory() {
        let store = store_with_file(100);
        let mut session = MemoryConnector::new(store.clone()).connect().unwrap();
        let dir = TempDir::new().unwrap();

        let result = download_to_path(
            &mut session,
            "/DCIM/100APPLE/IMG_0001.JPG",
            &dir.path().join("missing/out.jpg"),
            DEFAULT_CHUNK_SIZE,
            &AtomicBool::new(false),
        );

        assert!(matches!(result, Err(DownloadError::CreateLocal { .. })));
        assert_eq!(store.open_files(), 0);
    }

    async fn wait_for_closed_files(store: &MemoryStore) {
        for _ in 0..200 {
            if store.open_files() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("remote file still open: {}", store.open_files());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_frees_slot_at_deadline() {
        let store = store_with_file(512 * 4);
        store.set_read_delay(Duration::from_millis(1000));
        let pool = SessionPool::new(MemoryConnector::new(store.clone()), 1, Some(Duration::from_secs(1)));
        let dir = TempDir::new().unwrap();

        let downloader = Downloader::new(512, Some(Duration::from_millis(50)));
        let session = pool.acquire().await.unwrap();
        let start = std::time::Instant::now();
        let result = downloader
            .download(
                session,
                "/DCIM/100APPLE/IMG_0001.JPG".to_string(),
                dir.path().join("out.jpg"),
            )
            .await;
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(DownloadError::Timeout { .. })));
        assert!(elapsed < Duration::from_millis(500), "timeout took {:?}", elapsed);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.idle_sessions(), 0);
        assert_eq!(pool.broken_sessions(), 1);

        // The freed slot is refilled with a new session while the old one is still stuck
        let replacement = pool.acquire().await.unwrap();
        assert_eq!(pool.replaced_sessions(), 1);
        assert_eq!(store.connects(), 2);
        drop(replacement);

        wait_for_closed_files(&store).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_finished_download_keeps_session_under_deadline() {
        let store = store_with_file(2000);
        store.set_read_delay(Duration::from_millis(1));
        let pool = SessionPool::new(MemoryConnector::new(store.clone()), 1, None);
        let dir = TempDir::new().unwrap();

        let downloader = Downloader::new(512, Some(Duration::from_secs(5)));
        let session = pool.acquire().await.unwrap();
        let copied = downloader
            .download(
                session,
                "/DCIM/100APPLE/IMG_0001.JPG".to_string(),
                dir.path().join("out.jpg"),
            )
            .await
            .unwrap();

        assert_eq!(copied, 2000);
        assert_eq!(pool.idle_sessions(), 1);
        assert_eq!(pool.broken_sessions(), 0);
        assert_eq!(store.open_files(), 0);
    }

    #[tokio::test]
    async fn test_lost_session_is_discarded() {
        let store = store_with_file(10_000);
        store.lose_session_after("/DCIM/100APPLE/IMG_0001.JPG", 1);
        let pool = SessionPool::new(MemoryConnector::new(store.clone()), 1, None);
        let dir = TempDir::new().unwrap();

        let session = pool.acquire().await.unwrap();
        let result = Downloader::default()
            .download(
                session,
                "/DCIM/100APPLE/IMG_0001.JPG".to_string(),
                dir.path().join("out.jpg"),
            )
            .await;

        assert!(matches!(result, Err(DownloadError::Read(_))));
        assert_eq!(pool.broken_sessions(), 1);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.idle_sessions(), 0);
    }

    #[tokio::test]
    async fn test_download_success() {
        let store = store_with_file(5000);
        let pool = SessionPool::new(MemoryConnector::new(store.clone()), 1, None);
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("out.jpg");

        let session = pool.acquire().await.unwrap();
        let copied = Downloader::default()
            .download(session, "/DCIM/100APPLE/IMG_0001.JPG".to_string(), local.clone())
            .await
            .unwrap();

        assert_eq!(copied, 5000);
        assert_eq!(std::fs::read(&local).unwrap().len(), 5000);
        assert_eq!(pool.idle_sessions(), 1);
    }
}
