//! Remote store access
//!
//! The scanner talks to the remote store through two traits: a
//! [`Connector`] that establishes sessions against one endpoint, and a
//! [`Session`] that performs blocking operations (list, stat, open/read/close).
//! Sessions are expensive to create and are only ever used through the
//! [`pool::SessionPool`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    SessionPool                       │
//! │  - Fixed number of sessions, established up front   │
//! │  - RAII guard returns the session on drop           │
//! │  - Broken sessions are discarded and replaced       │
//! └─────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌─────────────────────────────────────────────────────┐
//! │               Connector / Session                    │
//! │  - local:  directory-backed store (mounted device)  │
//! │  - memory: in-memory tree with fault injection      │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use remote_sweep::transport::{LocalConnector, Session, SessionPool};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = SessionPool::new(LocalConnector::new("/mnt/phone"), 4, Some(Duration::from_secs(30)));
//!
//! let mut session = pool.acquire().await?;
//! for name in session.list_dir("/DCIM")? {
//!     println!("{}", name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod local;
pub mod memory;
pub mod pool;
pub mod types;

use crate::error::TransportResult;

pub use local::{LocalConnector, LocalSession};
pub use memory::{MemoryConnector, MemorySession, MemoryStore};
pub use pool::{PooledSession, SessionPool, SlotLease};
pub use types::{DirEntry, EntryType, FileId, RemoteStat};

/// Establishes sessions against one remote endpoint
pub trait Connector: Send + Sync + 'static {
    /// Session type produced by this connector
    type Session: Session;

    /// Human-readable endpoint description for logs and reports
    fn endpoint(&self) -> String;

    /// Establish a new session (blocking)
    fn connect(&self) -> TransportResult<Self::Session>;
}

/// One transport session. Not shared: a session serves one operation at a time.
///
/// All methods block; async callers run them on the blocking pool.
pub trait Session: Send + 'static {
    /// List the names in a directory (may include `.` and `..`)
    fn list_dir(&mut self, path: &str) -> TransportResult<Vec<String>>;

    /// Query the attributes of a path
    fn stat(&mut self, path: &str) -> TransportResult<RemoteStat>;

    /// Open a remote file for reading
    fn open_read(&mut self, path: &str) -> TransportResult<FileId>;

    /// Read the next chunk into `buf`; `Ok(0)` means end of file
    fn read_chunk(&mut self, file: FileId, buf: &mut [u8]) -> TransportResult<usize>;

    /// Close a remote file opened on this session
    fn close(&mut self, file: FileId);
}

/// A remote file open on a borrowed session, closed on drop
pub struct RemoteFile<'a, S: Session + ?Sized> {
    session: &'a mut S,
    id: FileId,
    path: String,
}

impl<'a, S: Session + ?Sized> RemoteFile<'a, S> {
    /// Open `path` read-only on `session`
    pub fn open(session: &'a mut S, path: &str) -> TransportResult<Self> {
        let id = session.open_read(path)?;
        Ok(Self {
            session,
            id,
            path: path.to_string(),
        })
    }

    /// Read the next chunk; `Ok(0)` at end of file
    pub fn read(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        self.session.read_chunk(self.id, buf)
    }

    /// Remote path this file was opened from
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl<S: Session + ?Sized> Drop for RemoteFile<'_, S> {
    fn drop(&mut self) {
        self.session.close(self.id);
    }
}
