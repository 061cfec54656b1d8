//! Local staging paths
//!
//! Every candidate is copied to a file under one staging directory before it
//! is classified. By default the staged name is the prefix plus the remote
//! base name (`/tmp/ios_IMG_0001.JPG`), so same-named files from different
//! remote directories land on the same path. Flattened naming encodes the
//! whole remote path instead.

use std::io;
use std::path::{Path, PathBuf};

use crate::transport::types::remote_base_name;

/// How a remote path maps to a staged file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StagingNaming {
    /// `<prefix><basename>`
    #[default]
    BaseName,
    /// `<prefix><full path with '/' escaped>`
    Flattened,
}

/// Staging directory plus naming rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingArea {
    dir: PathBuf,
    prefix: String,
    naming: StagingNaming,
}

impl Default for StagingArea {
    fn default() -> Self {
        Self::new("/tmp", "ios_", StagingNaming::BaseName)
    }
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, naming: StagingNaming) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            naming,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn naming(&self) -> StagingNaming {
        self.naming
    }

    /// Local path a remote file is staged at
    pub fn local_path_for(&self, remote: &str) -> PathBuf {
        let name = match self.naming {
            StagingNaming::BaseName => remote_base_name(remote).to_string(),
            StagingNaming::Flattened => flatten_remote_path(remote),
        };
        self.dir.join(format!("{}{}", self.prefix, name))
    }

    /// Create the staging directory if needed
    pub fn prepare(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }

    /// Remove a staged file; removing a file that is already gone succeeds
    pub fn discard(&self, local: &Path) -> io::Result<()> {
        match std::fs::remove_file(local) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Encode a remote path as a single file name (`%` and `/` are escaped)
fn flatten_remote_path(remote: &str) -> String {
    let trimmed = remote.trim_start_matches('/');
    let mut out = String::with_capacity(trimmed.len() + 8);
    for c in trimmed.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            _ => out.push(c),
        }
    }
    out
}
