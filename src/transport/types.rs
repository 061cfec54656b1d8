//! Remote entry types and data structures
//!
//! These types describe what a transport session reports about the
//! remote tree. They are produced and consumed within a single walk step.

/// Type of remote entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryType {
    /// Regular file
    File = 0,
    /// Directory
    Directory = 1,
    /// Symbolic link
    Symlink = 2,
    /// Device, fifo, socket or anything else that has no content to fetch
    Other = 3,
    /// The transport did not say
    Unknown = 255,
}

impl EntryType {
    /// Convert from a local filesystem file type
    pub fn from_file_type(file_type: std::fs::FileType) -> Self {
        if file_type.is_dir() {
            EntryType::Directory
        } else if file_type.is_file() {
            EntryType::File
        } else if file_type.is_symlink() {
            EntryType::Symlink
        } else {
            EntryType::Other
        }
    }

    /// Check if this is a directory
    pub fn is_dir(&self) -> bool {
        *self == EntryType::Directory
    }

    /// Check if an entry of this type may carry fetchable content
    pub fn may_have_content(&self) -> bool {
        matches!(self, EntryType::File | EntryType::Symlink | EntryType::Unknown)
    }
}

/// Attributes returned by a stat query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStat {
    /// Entry type
    pub entry_type: EntryType,

    /// Size in bytes (0 for directories)
    pub size: u64,

    /// Last modification time (Unix timestamp)
    pub mtime: Option<i64>,
}

impl RemoteStat {
    pub fn directory() -> Self {
        Self {
            entry_type: EntryType::Directory,
            size: 0,
            mtime: None,
        }
    }

    pub fn file(size: u64) -> Self {
        Self {
            entry_type: EntryType::File,
            size,
            mtime: None,
        }
    }
}

/// Identifier of a remote file opened on one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub u64);

/// A classified directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name within its parent
    pub name: String,

    /// Full remote path
    pub path: String,

    /// Type reported by the attribute query
    pub entry_type: EntryType,
}

impl DirEntry {
    /// Build an entry for `name` inside `parent`
    pub fn new(parent: &str, name: &str, entry_type: EntryType) -> Self {
        Self {
            name: name.to_string(),
            path: join_remote(parent, name),
            entry_type,
        }
    }

    /// Check if this is a directory
    pub fn is_dir(&self) -> bool {
        self.entry_type.is_dir()
    }
}

/// Check if a listing name is the self or parent entry
pub fn is_special_name(name: &str) -> bool {
    name == "." || name == ".."
}

/// Join a remote directory path and an entry name
pub fn join_remote(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Last component of a remote path
pub fn remote_base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
