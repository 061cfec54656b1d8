//! Error types for remote-sweep
//!
//! This module defines the error hierarchy used across the scanner:
//! - Transport errors (listing, attribute queries, remote reads)
//! - Session pool errors (exhaustion, reconnection)
//! - Download errors (open/create/read/write/short write/timeout)
//! - Classifier errors (kept distinct from a negative verdict)
//! - Configuration and CLI errors
//!
//! Per-file and per-directory errors are counted and logged by the walker;
//! only `ScanError` values returned from the coordinator abort a scan.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for a scan
#[derive(Error, Debug)]
pub enum ScanError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Not a single session could be established
    #[error("No usable sessions to '{endpoint}': all {requested} connection attempts failed")]
    NoSessions { endpoint: String, requested: usize },

    /// Attribute query failed under the fail-fast policy
    #[error("Aborting scan: could not determine the type of '{path}': {source}")]
    StatAborted {
        path: String,
        #[source]
        source: TransportError,
    },

    /// A walker task panicked or was cancelled by the runtime
    #[error("Walker task failed: {0}")]
    TaskFailed(String),
}

/// Remote transport errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Could not establish a session
    #[error("Failed to connect to '{endpoint}': {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// Directory listing failed
    #[error("Failed to read directory '{path}': {reason}")]
    ReadDirFailed { path: String, reason: String },

    /// Attribute query failed
    #[error("Failed to stat '{path}': {reason}")]
    StatFailed { path: String, reason: String },

    /// Opening a remote file failed
    #[error("Failed to open '{path}': {reason}")]
    OpenFailed { path: String, reason: String },

    /// Reading from an open remote file failed
    #[error("Failed to read '{path}': {reason}")]
    ReadFailed { path: String, reason: String },

    /// Permission denied
    #[error("Permission denied: '{path}'")]
    PermissionDenied { path: String },

    /// Path not found
    #[error("Path not found: '{path}'")]
    NotFound { path: String },

    /// File id not open on this session
    #[error("Remote file handle {id} is not open on this session")]
    InvalidHandle { id: u64 },

    /// The session is no longer usable
    #[error("Session lost: {reason}")]
    SessionLost { reason: String },
}

impl TransportError {
    /// Check if the session that produced this error should be replaced
    pub fn should_reconnect(&self) -> bool {
        matches!(
            self,
            TransportError::SessionLost { .. } | TransportError::ConnectionFailed { .. }
        )
    }
}

/// Session pool errors
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    /// No session became available in time
    #[error("No session available after {waited:?} (pool capacity {capacity})")]
    Exhausted { waited: Duration, capacity: usize },

    /// The pool was shut down
    #[error("Session pool closed")]
    Closed,

    /// A vacated slot could not be refilled
    #[error("Failed to replace a broken session: {0}")]
    Reconnect(TransportError),
}

/// Error from running one operation on a pooled session
#[derive(Error, Debug)]
pub enum SessionOpError {
    /// No session could be acquired
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The operation itself failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors from streaming a remote file into staging
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Could not get a session to download with
    #[error("No session for download: {0}")]
    Pool(#[from] PoolError),

    /// Remote open failed
    #[error("Failed to open remote file: {0}")]
    Open(TransportError),

    /// Local staging file could not be created
    #[error("Failed to create local file '{path}': {reason}")]
    CreateLocal { path: PathBuf, reason: String },

    /// Remote read failed mid-stream
    #[error("Remote read failed: {0}")]
    Read(TransportError),

    /// Local write failed
    #[error("Failed to write local file '{path}': {reason}")]
    Write { path: PathBuf, reason: String },

    /// Fewer bytes were written than were read
    #[error("Short write to '{path}': wrote {written} of {expected} bytes")]
    PartialWrite {
        path: PathBuf,
        written: usize,
        expected: usize,
    },

    /// The whole download exceeded its deadline
    #[error("Download of '{path}' timed out after {after:?}")]
    Timeout { path: String, after: Duration },

    /// The copy loop observed a cancellation request
    #[error("Download of '{path}' cancelled")]
    Cancelled { path: String },

    /// The blocking copy task panicked
    #[error("Download task failed: {0}")]
    TaskFailed(String),
}

impl DownloadError {
    /// Check if the session used for this download must not be re-admitted
    pub fn breaks_session(&self) -> bool {
        match self {
            DownloadError::Open(e) | DownloadError::Read(e) => e.should_reconnect(),
            _ => false,
        }
    }
}

/// Classifier errors (never folded into a negative verdict)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    /// Staged file could not be read
    #[error("Failed to read '{path}': {reason}")]
    Io { path: PathBuf, reason: String },

    /// Content is not a supported image
    #[error("Unsupported content in '{path}' (detected: {detected})")]
    UnsupportedFormat { path: PathBuf, detected: String },

    /// Decoder rejected the content
    #[error("Failed to decode '{path}': {reason}")]
    Decode { path: PathBuf, reason: String },

    /// Image has no pixels
    #[error("Image '{path}' has no pixels")]
    EmptyImage { path: PathBuf },

    /// Threshold outside [0.0, 1.0]
    #[error("Threshold {0} is outside [0.0, 1.0]")]
    InvalidThreshold(f32),
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Threshold out of range
    #[error("Threshold must be between 0.0 and 1.0 (got {value})")]
    InvalidThreshold { value: f32 },

    /// Invalid connection count
    #[error("Invalid connection count {count}: must be between 1 and {max}")]
    InvalidConnectionCount { count: usize, max: usize },

    /// Invalid outstanding-task ceiling
    #[error("Invalid outstanding task limit {count}: must be at least 1")]
    InvalidOutstandingLimit { count: usize },

    /// Invalid directory concurrency
    #[error("Invalid directory concurrency {count}: must be at least 1")]
    InvalidDirConcurrency { count: usize },

    /// Invalid queue size
    #[error("Invalid queue size {size}: must be at least {min}")]
    InvalidQueueSize { size: usize, min: usize },

    /// Invalid chunk size
    #[error("Invalid chunk size {size}: must be between {min} and {max}")]
    InvalidChunkSize { size: usize, min: usize, max: usize },

    /// Invalid recognized extension
    #[error("Invalid file extension '{ext}'")]
    InvalidExtension { ext: String },

    /// Invalid exclude pattern
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },

    /// Root path must be absolute
    #[error("Invalid root path '{path}': must start with '/'")]
    InvalidRootPath { path: String },

    /// Store location unusable
    #[error("Invalid store '{path}': {reason}")]
    InvalidStore { path: PathBuf, reason: String },

    /// Staging directory unusable
    #[error("Invalid staging directory '{path}': {reason}")]
    InvalidStagingDir { path: PathBuf, reason: String },
}

/// Result type alias for ScanError
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Result type alias for TransportError
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Result type alias for PoolError
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Result type alias for DownloadError
pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// Result type alias for ClassifierError
pub type ClassifierResult<T> = std::result::Result<T, ClassifierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_reconnect() {
        let perm_denied = TransportError::PermissionDenied {
            path: "/DCIM".into(),
        };
        assert!(!perm_denied.should_reconnect());

        let lost = TransportError::SessionLost {
            reason: "device unplugged".into(),
        };
        assert!(lost.should_reconnect());
    }

    #[test]
    fn test_download_error_breaks_session() {
        let read = DownloadError::Read(TransportError::SessionLost {
            reason: "reset".into(),
        });
        assert!(read.breaks_session());

        let missing = DownloadError::Open(TransportError::NotFound {
            path: "/DCIM/a.jpg".into(),
        });
        assert!(!missing.breaks_session());

        let timeout = DownloadError::Timeout {
            path: "/DCIM/a.jpg".into(),
            after: Duration::from_secs(1),
        };
        assert!(!timeout.breaks_session());
    }

    #[test]
    fn test_error_conversion() {
        let op_err: SessionOpError = PoolError::Closed.into();
        assert!(matches!(op_err, SessionOpError::Pool(_)));
        assert_eq!(op_err.to_string(), "Session pool closed");

        let op_err: SessionOpError = TransportError::NotFound {
            path: "/missing".into(),
        }
        .into();
        assert_eq!(op_err.to_string(), "Path not found: '/missing'");

        let download_err: DownloadError = PoolError::Closed.into();
        assert!(matches!(download_err, DownloadError::Pool(PoolError::Closed)));
        assert!(!download_err.breaks_session());

        let scan_err: ScanError = ConfigError::InvalidThreshold { value: 2.0 }.into();
        assert!(matches!(scan_err, ScanError::Config(_)));
    }
}
