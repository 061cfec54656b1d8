//! In-memory remote store
//!
//! A tree of directories and files held in memory, reachable through the
//! same [`Connector`]/[`Session`] traits as a real store. Faults can be
//! injected per path (listing, stat, mid-stream read failures), reads can
//! be slowed down, and connection attempts can be made to fail. Counters
//! expose how the store was used so tests can check that every remote file
//! was closed and every session accounted for.

use crate::error::{TransportError, TransportResult};
use crate::transport::types::{EntryType, FileId, RemoteStat};
use crate::transport::{Connector, Session};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum MemoryNode {
    Dir(BTreeSet<String>),
    File(Arc<Vec<u8>>),
    Special,
}

/// How a read fault manifests
#[derive(Debug, Clone, Copy)]
enum ReadFault {
    /// Plain read error, session still usable
    Error,
    /// The session drops out underneath the read
    SessionLost,
}

#[derive(Debug, Default)]
struct Faults {
    /// Remaining listing failures per path (`None` = always)
    list: HashMap<String, Option<u32>>,
    /// Remaining stat failures per path (`None` = always)
    stat: HashMap<String, Option<u32>>,
    /// Reads of a path fail once this many chunks were served
    read_after: HashMap<String, (u32, ReadFault)>,
    /// Delay applied to every chunk read
    read_delay: Option<Duration>,
    /// Number of upcoming connection attempts that fail
    connect_failures: u32,
}

#[derive(Debug, Default)]
struct StoreInner {
    nodes: RwLock<BTreeMap<String, MemoryNode>>,
    faults: Mutex<Faults>,
    open_files: AtomicUsize,
    connects: AtomicU64,
    list_calls: AtomicU64,
    stat_calls: AtomicU64,
    bytes_served: AtomicU64,
}

/// Shared in-memory tree; clones refer to the same store
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a store containing only the root directory
    pub fn new() -> Self {
        let inner = StoreInner::default();
        inner
            .nodes
            .write()
            .insert("/".to_string(), MemoryNode::Dir(BTreeSet::new()));
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Add a directory (and any missing parents)
    pub fn add_dir(&self, path: &str) {
        let path = normalize(path);
        let mut nodes = self.inner.nodes.write();
        ensure_dir(&mut nodes, &path);
    }

    /// Add a file with the given content (and any missing parents)
    pub fn add_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        let path = normalize(path);
        self.insert_leaf(&path, MemoryNode::File(Arc::new(content.into())));
    }

    /// Add an entry that is neither file nor directory (device, fifo, ...)
    pub fn add_special(&self, path: &str) {
        let path = normalize(path);
        self.insert_leaf(&path, MemoryNode::Special);
    }

    fn insert_leaf(&self, path: &str, node: MemoryNode) {
        let (parent, name) = split_parent(path);
        let mut nodes = self.inner.nodes.write();
        ensure_dir(&mut nodes, parent);
        if let Some(MemoryNode::Dir(children)) = nodes.get_mut(parent) {
            children.insert(name.to_string());
        }
        nodes.insert(path.to_string(), node);
    }

    /// Make listings of `path` fail (`times = None` fails forever)
    pub fn fail_list(&self, path: &str, times: Option<u32>) {
        self.inner.faults.lock().list.insert(normalize(path), times);
    }

    /// Make attribute queries of `path` fail (`times = None` fails forever)
    pub fn fail_stat(&self, path: &str, times: Option<u32>) {
        self.inner.faults.lock().stat.insert(normalize(path), times);
    }

    /// Make reads of `path` fail after `chunks` successful chunk reads
    pub fn fail_read_after(&self, path: &str, chunks: u32) {
        self.inner
            .faults
            .lock()
            .read_after
            .insert(normalize(path), (chunks, ReadFault::Error));
    }

    /// Make the session drop out after `chunks` chunk reads of `path`
    pub fn lose_session_after(&self, path: &str, chunks: u32) {
        self.inner
            .faults
            .lock()
            .read_after
            .insert(normalize(path), (chunks, ReadFault::SessionLost));
    }

    /// Delay every chunk read by `delay`
    pub fn set_read_delay(&self, delay: Duration) {
        self.inner.faults.lock().read_delay = Some(delay);
    }

    /// Make the next `count` connection attempts fail
    pub fn fail_connects(&self, count: u32) {
        self.inner.faults.lock().connect_failures = count;
    }

    /// Remote files currently open across all sessions
    pub fn open_files(&self) -> usize {
        self.inner.open_files.load(Ordering::SeqCst)
    }

    /// Successful connection attempts so far
    pub fn connects(&self) -> u64 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Directory listings served so far
    pub fn list_calls(&self) -> u64 {
        self.inner.list_calls.load(Ordering::Relaxed)
    }

    /// Attribute queries served so far
    pub fn stat_calls(&self) -> u64 {
        self.inner.stat_calls.load(Ordering::Relaxed)
    }

    /// Content bytes served by reads so far
    pub fn bytes_served(&self) -> u64 {
        self.inner.bytes_served.load(Ordering::Relaxed)
    }

    fn node(&self, path: &str) -> Option<MemoryNode> {
        self.inner.nodes.read().get(path).cloned()
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("/", path),
    }
}

fn ensure_dir(nodes: &mut BTreeMap<String, MemoryNode>, path: &str) {
    if nodes.contains_key(path) {
        return;
    }
    let (parent, name) = split_parent(path);
    ensure_dir(nodes, parent);
    if let Some(MemoryNode::Dir(children)) = nodes.get_mut(parent) {
        children.insert(name.to_string());
    }
    nodes.insert(path.to_string(), MemoryNode::Dir(BTreeSet::new()));
}

fn take_fault(faults: &mut HashMap<String, Option<u32>>, path: &str) -> bool {
    match faults.get_mut(path) {
        None => false,
        Some(None) => true,
        Some(Some(0)) => false,
        Some(Some(remaining)) => {
            *remaining -= 1;
            true
        }
    }
}

/// Connector for a [`MemoryStore`]
#[derive(Debug)]
pub struct MemoryConnector {
    store: MemoryStore,
    endpoint: String,
    next_session: AtomicU64,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            endpoint: "memory://store".to_string(),
            next_session: AtomicU64::new(1),
        }
    }

    /// The store this connector serves
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

impl Connector for MemoryConnector {
    type Session = MemorySession;

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    fn connect(&self) -> TransportResult<MemorySession> {
        {
            let mut faults = self.store.inner.faults.lock();
            if faults.connect_failures > 0 {
                faults.connect_failures -= 1;
                return Err(TransportError::ConnectionFailed {
                    endpoint: self.endpoint.clone(),
                    reason: "injected connection failure".into(),
                });
            }
        }

        self.store.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySession {
            id: self.next_session.fetch_add(1, Ordering::SeqCst),
            store: self.store.clone(),
            files: HashMap::new(),
            next_fd: 1,
        })
    }
}

struct OpenFile {
    path: String,
    data: Arc<Vec<u8>>,
    offset: usize,
    chunks_read: u32,
}

/// Session on a [`MemoryStore`]
pub struct MemorySession {
    id: u64,
    store: MemoryStore,
    files: HashMap<u64, OpenFile>,
    next_fd: u64,
}

impl MemorySession {
    /// Unique id of this session within its connector
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Session for MemorySession {
    fn list_dir(&mut self, path: &str) -> TransportResult<Vec<String>> {
        let path = normalize(path);
        self.store.inner.list_calls.fetch_add(1, Ordering::Relaxed);

        if take_fault(&mut self.store.inner.faults.lock().list, &path) {
            return Err(TransportError::ReadDirFailed {
                path,
                reason: "injected listing failure".into(),
            });
        }

        match self.store.node(&path) {
            Some(MemoryNode::Dir(children)) => {
                let mut names = vec![".".to_string(), "..".to_string()];
                names.extend(children);
                Ok(names)
            }
            Some(_) => Err(TransportError::ReadDirFailed {
                path,
                reason: "Not a directory".into(),
            }),
            None => Err(TransportError::NotFound { path }),
        }
    }

    fn stat(&mut self, path: &str) -> TransportResult<RemoteStat> {
        let path = normalize(path);
        self.store.inner.stat_calls.fetch_add(1, Ordering::Relaxed);

        if take_fault(&mut self.store.inner.faults.lock().stat, &path) {
            return Err(TransportError::StatFailed {
                path,
                reason: "injected stat failure".into(),
            });
        }

        match self.store.node(&path) {
            Some(MemoryNode::Dir(_)) => Ok(RemoteStat::directory()),
            Some(MemoryNode::File(data)) => Ok(RemoteStat::file(data.len() as u64)),
            Some(MemoryNode::Special) => Ok(RemoteStat {
                entry_type: EntryType::Other,
                size: 0,
                mtime: None,
            }),
            None => Err(TransportError::NotFound { path }),
        }
    }

    fn open_read(&mut self, path: &str) -> TransportResult<FileId> {
        let path = normalize(path);
        let data = match self.store.node(&path) {
            Some(MemoryNode::File(data)) => data,
            Some(_) => {
                return Err(TransportError::OpenFailed {
                    path,
                    reason: "Not a regular file".into(),
                })
            }
            None => return Err(TransportError::NotFound { path }),
        };

        let fd = self.next_fd;
        self.next_fd += 1;
        self.files.insert(
            fd,
            OpenFile {
                path,
                data,
                offset: 0,
                chunks_read: 0,
            },
        );
        self.store.inner.open_files.fetch_add(1, Ordering::SeqCst);
        Ok(FileId(fd))
    }

    fn read_chunk(&mut self, file: FileId, buf: &mut [u8]) -> TransportResult<usize> {
        let (delay, fault) = {
            let faults = self.store.inner.faults.lock();
            let fault = self
                .files
                .get(&file.0)
                .and_then(|open| faults.read_after.get(&open.path).copied());
            (faults.read_delay, fault)
        };

        let open = self
            .files
            .get_mut(&file.0)
            .ok_or(TransportError::InvalidHandle { id: file.0 })?;

        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        if let Some((after, kind)) = fault {
            if open.chunks_read >= after {
                return Err(match kind {
                    ReadFault::Error => TransportError::ReadFailed {
                        path: open.path.clone(),
                        reason: "injected read failure".into(),
                    },
                    ReadFault::SessionLost => TransportError::SessionLost {
                        reason: format!("connection reset while reading '{}'", open.path),
                    },
                });
            }
        }

        let remaining = &open.data[open.offset..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        open.offset += n;
        open.chunks_read += 1;
        self.store
            .inner
            .bytes_served
            .fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    fn close(&mut self, file: FileId) {
        if self.files.remove(&file.0).is_some() {
            self.store.inner.open_files.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let leaked = self.files.len();
        if leaked > 0 {
            self.store
                .inner
                .open_files
                .fetch_sub(leaked, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_file("/DCIM/100APPLE/IMG_0001.JPG", vec![7u8; 10]);
        store.add_dir("/DCIM/101APPLE");
        store.add_special("/DCIM/pipe");
        store
    }

    #[test]
    fn test_listing_includes_special_names() {
        let mut session = MemoryConnector::new(sample_store()).connect().unwrap();
        let names = session.list_dir("/DCIM").unwrap();
        assert_eq!(names, vec![".", "..", "100APPLE", "101APPLE", "pipe"]);
    }

    #[test]
    fn test_stat_types() {
        let mut session = MemoryConnector::new(sample_store()).connect().unwrap();
        assert!(session.stat("/DCIM").unwrap().entry_type.is_dir());
        assert_eq!(
            session.stat("/DCIM/100APPLE/IMG_0001.JPG").unwrap(),
            RemoteStat::file(10)
        );
        assert_eq!(
            session.stat("/DCIM/pipe").unwrap().entry_type,
            EntryType::Other
        );
        assert!(matches!(
            session.stat("/nope"),
            Err(TransportError::NotFound { .. })
        ));
    }

    #[test]
    fn test_read_in_chunks() {
        let store = sample_store();
        let mut session = MemoryConnector::new(store.clone()).connect().unwrap();
        let fd = session.open_read("/DCIM/100APPLE/IMG_0001.JPG").unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(session.read_chunk(fd, &mut buf).unwrap(), 4);
        assert_eq!(session.read_chunk(fd, &mut buf).unwrap(), 4);
        assert_eq!(session.read_chunk(fd, &mut buf).unwrap(), 2);
        assert_eq!(session.read_chunk(fd, &mut buf).unwrap(), 0);
        assert_eq!(store.bytes_served(), 10);

        session.close(fd);
        assert_eq!(store.open_files(), 0);
        assert!(matches!(
            session.read_chunk(fd, &mut buf),
            Err(TransportError::InvalidHandle { .. })
        ));
    }

    #[test]
    fn test_injected_faults() {
        let store = sample_store();
        store.fail_list("/DCIM", Some(1));
        store.fail_stat("/DCIM/101APPLE", None);
        store.fail_read_after("/DCIM/100APPLE/IMG_0001.JPG", 1);

        let mut session = MemoryConnector::new(store.clone()).connect().unwrap();

        assert!(session.list_dir("/DCIM").is_err());
        assert!(session.list_dir("/DCIM").is_ok());
        assert!(session.stat("/DCIM/101APPLE").is_err());
        assert!(session.stat("/DCIM/101APPLE").is_err());

        let fd = session.open_read("/DCIM/100APPLE/IMG_0001.JPG").unwrap();
        let mut buf = [0u8; 4];
        assert!(session.read_chunk(fd, &mut buf).is_ok());
        assert!(matches!(
            session.read_chunk(fd, &mut buf),
            Err(TransportError::ReadFailed { .. })
        ));
    }

    #[test]
    fn test_connect_failures_and_open_file_accounting() {
        let store = sample_store();
        store.fail_connects(1);
        let connector = MemoryConnector::new(store.clone());

        assert!(connector.connect().is_err());
        let mut session = connector.connect().unwrap();
        assert_eq!(store.connects(), 1);

        session.open_read("/DCIM/100APPLE/IMG_0001.JPG").unwrap();
        assert_eq!(store.open_files(), 1);
        drop(session);
        assert_eq!(store.open_files(), 0);
    }
}
