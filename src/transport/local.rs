//! Directory-backed remote store
//!
//! Serves a store that is visible as an ordinary directory tree, such as a
//! device mounted through a FUSE bridge. Remote paths (`/DCIM/100APPLE/...`)
//! are resolved under the store root. Each session keeps its own table of
//! open files, so a session is still used by one operation at a time.
//!
//! Remote paths are UTF-8. Entries whose local name is not are left out of
//! listings with a warning rather than handed on under a lossy name that
//! no later call could resolve.

use crate::error::{TransportError, TransportResult};
use crate::transport::types::{EntryType, FileId, RemoteStat};
use crate::transport::{Connector, Session};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::warn;

/// Connector for a directory-backed store
#[derive(Debug, Clone)]
pub struct LocalConnector {
    root: PathBuf,
}

impl LocalConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Local directory the store is served from
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Connector for LocalConnector {
    type Session = LocalSession;

    fn endpoint(&self) -> String {
        format!("local://{}", self.root.display())
    }

    fn connect(&self) -> TransportResult<LocalSession> {
        match std::fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => Ok(LocalSession {
                root: self.root.clone(),
                files: HashMap::new(),
                next_fd: 1,
                unnamed_entries: 0,
            }),
            Ok(_) => Err(TransportError::ConnectionFailed {
                endpoint: self.endpoint(),
                reason: "store root is not a directory".into(),
            }),
            Err(e) => Err(TransportError::ConnectionFailed {
                endpoint: self.endpoint(),
                reason: e.to_string(),
            }),
        }
    }
}

/// One session on a directory-backed store
pub struct LocalSession {
    root: PathBuf,
    files: HashMap<u64, (String, File)>,
    next_fd: u64,
    /// Listing entries dropped for having a non-UTF-8 name
    unnamed_entries: u64,
}

impl LocalSession {
    /// Resolve a remote path under the store root
    fn resolve(&self, path: &str) -> TransportResult<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => resolved.push(part),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(TransportError::PermissionDenied {
                        path: path.to_string(),
                    })
                }
            }
        }
        Ok(resolved)
    }

    /// Number of files currently open on this session
    pub fn open_file_count(&self) -> usize {
        self.files.len()
    }

    /// Entries left out of listings because their name is not UTF-8
    pub fn unnamed_entries(&self) -> u64 {
        self.unnamed_entries
    }
}

/// Map an I/O error to a transport error, using `fallback` for anything
/// that is neither a missing path nor a permission problem
fn map_io_error(
    path: &str,
    err: io::Error,
    fallback: impl FnOnce(String, String) -> TransportError,
) -> TransportError {
    match err.kind() {
        io::ErrorKind::NotFound => TransportError::NotFound {
            path: path.to_string(),
        },
        io::ErrorKind::PermissionDenied => TransportError::PermissionDenied {
            path: path.to_string(),
        },
        _ => fallback(path.to_string(), err.to_string()),
    }
}

impl Session for LocalSession {
    fn list_dir(&mut self, path: &str) -> TransportResult<Vec<String>> {
        let dir = self.resolve(path)?;
        let reader = std::fs::read_dir(&dir).map_err(|e| {
            map_io_error(path, e, |path, reason| TransportError::ReadDirFailed {
                path,
                reason,
            })
        })?;

        let mut names = vec![".".to_string(), "..".to_string()];
        for entry in reader {
            let entry = entry.map_err(|e| TransportError::ReadDirFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => {
                    self.unnamed_entries += 1;
                    warn!(
                        dir = %path,
                        name = %raw.to_string_lossy(),
                        "Skipping entry with a non-UTF-8 name"
                    );
                }
            }
        }
        Ok(names)
    }

    fn stat(&mut self, path: &str) -> TransportResult<RemoteStat> {
        let resolved = self.resolve(path)?;
        let meta = std::fs::symlink_metadata(&resolved).map_err(|e| {
            map_io_error(path, e, |path, reason| TransportError::StatFailed {
                path,
                reason,
            })
        })?;

        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);

        let entry_type = EntryType::from_file_type(meta.file_type());
        Ok(RemoteStat {
            entry_type,
            size: if entry_type.is_dir() { 0 } else { meta.len() },
            mtime,
        })
    }

    fn open_read(&mut self, path: &str) -> TransportResult<FileId> {
        let resolved = self.resolve(path)?;
        if resolved.is_dir() {
            return Err(TransportError::OpenFailed {
                path: path.to_string(),
                reason: "Is a directory".into(),
            });
        }

        let file = File::open(&resolved).map_err(|e| {
            map_io_error(path, e, |path, reason| TransportError::OpenFailed {
                path,
                reason,
            })
        })?;

        let fd = self.next_fd;
        self.next_fd += 1;
        self.files.insert(fd, (path.to_string(), file));
        Ok(FileId(fd))
    }

    fn read_chunk(&mut self, file: FileId, buf: &mut [u8]) -> TransportResult<usize> {
        let (path, handle) = self
            .files
            .get_mut(&file.0)
            .ok_or(TransportError::InvalidHandle { id: file.0 })?;

        loop {
            match handle.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(TransportError::ReadFailed {
                        path: path.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    fn close(&mut self, file: FileId) {
        self.files.remove(&file.0);
    }
}
