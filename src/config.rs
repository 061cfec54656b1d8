//! Configuration types for remote-sweep
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - The attribute-query failure policy

use crate::content::CandidateFilter;
use crate::download::DEFAULT_CHUNK_SIZE;
use crate::error::ConfigError;
use crate::staging::{StagingArea, StagingNaming};
use clap::{Parser, ValueEnum};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum number of sessions to establish
pub const MAX_CONNECTIONS: usize = 64;

/// Minimum directory queue size
const MIN_QUEUE_SIZE: usize = 16;

/// Chunk size limits
const MIN_CHUNK_SIZE: usize = 512;
const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Threshold used when none is given
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Remote directory scanned when none is given
pub const DEFAULT_ROOT: &str = "/DCIM";

/// Scan a remote file store and classify the images found on it
#[derive(Parser, Debug, Clone)]
#[command(
    name = "remote-sweep",
    version,
    about = "Scan a remote file store and classify the images found on it",
    long_about = "Walks a remote file store through a small pool of sessions, copies every \
                  image to a local staging directory and classifies it.\n\n\
                  The threshold is the fraction of skin-toned pixels at which an image is \
                  flagged (0.0 to 1.0).",
    after_help = "EXAMPLES:\n    \
        remote-sweep 0.6 --store /mnt/phone\n    \
        remote-sweep --store /mnt/phone --root /DCIM/100APPLE -c 2\n    \
        remote-sweep 0.4 -s /mnt/phone --flatten-names --staging-dir ./staged\n    \
        remote-sweep 0.5 -s /mnt/phone --on-stat-error retry --stat-retries 3"
)]
pub struct CliArgs {
    /// Classification threshold between 0.0 and 1.0
    #[arg(
        value_name = "THRESHOLD",
        default_value_t = DEFAULT_THRESHOLD,
        allow_negative_numbers = true
    )]
    pub threshold: f32,

    /// Directory the remote store is mounted at
    #[arg(short, long, env = "REMOTE_SWEEP_STORE", value_name = "DIR")]
    pub store: PathBuf,

    /// Remote directory to start from
    #[arg(short, long, default_value = DEFAULT_ROOT, value_name = "PATH")]
    pub root: String,

    /// Number of sessions to establish
    #[arg(
        short = 'c',
        long,
        default_value_t = default_connections(),
        value_name = "NUM"
    )]
    pub connections: usize,

    /// Maximum classification tasks in flight (default: connections x 4)
    #[arg(long, value_name = "NUM")]
    pub max_outstanding: Option<usize>,

    /// Maximum directories walked concurrently (default: connections x 2)
    #[arg(long, value_name = "NUM")]
    pub max_dirs: Option<usize>,

    /// Directory queue size
    #[arg(long, default_value = "1024", value_name = "NUM")]
    pub queue_size: usize,

    /// Local directory files are staged in
    #[arg(long, default_value = "/tmp", value_name = "DIR")]
    pub staging_dir: PathBuf,

    /// Prefix of staged file names
    #[arg(long, default_value = "ios_", value_name = "PREFIX")]
    pub staging_prefix: String,

    /// Encode the full remote path in staged names (avoids collisions)
    #[arg(long)]
    pub flatten_names: bool,

    /// Remove staged files once classified
    #[arg(long)]
    pub cleanup: bool,

    /// Recognized file extension (can be repeated; replaces the built-in list)
    #[arg(long = "ext", value_name = "EXT", action = clap::ArgAction::Append)]
    pub extensions: Vec<String>,

    /// Exclude remote paths matching pattern (can be repeated)
    #[arg(long = "exclude", value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Maximum directory depth below the root (unlimited if not set)
    #[arg(short = 'd', long, value_name = "NUM")]
    pub max_depth: Option<u32>,

    /// Seconds to wait for a free session (0 waits forever)
    #[arg(long, default_value = "30", value_name = "SECS")]
    pub acquire_timeout: u64,

    /// Seconds allowed per file download (0 disables the limit)
    #[arg(long, default_value = "120", value_name = "SECS")]
    pub download_timeout: u64,

    /// What to do when an entry's type cannot be determined
    #[arg(long, value_enum, default_value_t = StatErrorPolicy::Skip)]
    pub on_stat_error: StatErrorPolicy,

    /// Retries per entry with --on-stat-error retry
    #[arg(long, default_value = "2", value_name = "NUM")]
    pub stat_retries: u32,

    /// Download chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, value_name = "BYTES")]
    pub chunk_size: usize,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (per-file logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn default_connections() -> usize {
    // One session per core
    num_cpus::get().clamp(1, MAX_CONNECTIONS)
}

/// CLI spelling of [`StatPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatErrorPolicy {
    /// Log, count and skip the entry
    Skip,
    /// Retry with backoff, then skip
    Retry,
    /// Abort the scan
    Fail,
}

/// What the walker does when an entry's attributes cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatPolicy {
    /// Log, count and skip the entry
    #[default]
    Skip,
    /// Retry up to `attempts` more times with backoff, then skip
    Retry { attempts: u32 },
    /// Abort the scan with `ScanError::StatAborted`
    FailFast,
}

impl StatPolicy {
    /// Retries allowed after the first failure
    pub fn retries(&self) -> u32 {
        match self {
            StatPolicy::Retry { attempts } => *attempts,
            _ => 0,
        }
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Classification threshold in [0.0, 1.0]
    pub threshold: f32,

    /// Remote directory to start from
    pub root: String,

    /// Sessions to establish
    pub connections: usize,

    /// Ceiling on classification tasks in flight
    pub max_outstanding: usize,

    /// Ceiling on concurrently walked directories
    pub max_concurrent_dirs: usize,

    /// Directory queue capacity
    pub queue_size: usize,

    /// Where and how files are staged
    pub staging: StagingArea,

    /// Remove staged files once classified
    pub cleanup: bool,

    /// Recognized file extensions
    pub filter: CandidateFilter,

    /// Compiled exclude patterns
    pub exclude_patterns: Vec<Regex>,

    /// Maximum depth below the root
    pub max_depth: Option<u32>,

    /// Pool acquire timeout (`None` waits forever)
    pub acquire_timeout: Option<Duration>,

    /// Per-file download timeout (`None` = unlimited)
    pub download_timeout: Option<Duration>,

    /// Attribute-query failure policy
    pub stat_policy: StatPolicy,

    /// Download chunk size
    pub chunk_size: usize,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let connections = 4;
        Self {
            threshold: DEFAULT_THRESHOLD,
            root: DEFAULT_ROOT.to_string(),
            connections,
            max_outstanding: connections * 4,
            max_concurrent_dirs: connections * 2,
            queue_size: 1024,
            staging: StagingArea::default(),
            cleanup: false,
            filter: CandidateFilter::default(),
            exclude_patterns: Vec::new(),
            max_depth: None,
            acquire_timeout: Some(Duration::from_secs(30)),
            download_timeout: Some(Duration::from_secs(120)),
            stat_policy: StatPolicy::Skip,
            chunk_size: DEFAULT_CHUNK_SIZE,
            show_progress: false,
            verbose: false,
        }
    }
}

impl ScanConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        // NaN fails the range check too
        if !(0.0..=1.0).contains(&args.threshold) {
            return Err(ConfigError::InvalidThreshold {
                value: args.threshold,
            });
        }

        if args.connections == 0 || args.connections > MAX_CONNECTIONS {
            return Err(ConfigError::InvalidConnectionCount {
                count: args.connections,
                max: MAX_CONNECTIONS,
            });
        }

        let max_outstanding = args.max_outstanding.unwrap_or(args.connections * 4);
        if max_outstanding == 0 || max_outstanding > u32::MAX as usize {
            return Err(ConfigError::InvalidOutstandingLimit {
                count: max_outstanding,
            });
        }

        let max_concurrent_dirs = args.max_dirs.unwrap_or(args.connections * 2);
        if max_concurrent_dirs == 0 || max_concurrent_dirs > u32::MAX as usize {
            return Err(ConfigError::InvalidDirConcurrency {
                count: max_concurrent_dirs,
            });
        }

        if args.queue_size < MIN_QUEUE_SIZE {
            return Err(ConfigError::InvalidQueueSize {
                size: args.queue_size,
                min: MIN_QUEUE_SIZE,
            });
        }

        if args.chunk_size < MIN_CHUNK_SIZE || args.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidChunkSize {
                size: args.chunk_size,
                min: MIN_CHUNK_SIZE,
                max: MAX_CHUNK_SIZE,
            });
        }

        if !args.root.starts_with('/') {
            return Err(ConfigError::InvalidRootPath { path: args.root });
        }
        let root = if args.root.len() > 1 {
            args.root.trim_end_matches('/').to_string()
        } else {
            args.root
        };

        let filter = CandidateFilter::new(&args.extensions)?;

        // Compile exclude patterns
        let exclude_patterns = args
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidExcludePattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if args.staging_dir.exists() && !args.staging_dir.is_dir() {
            return Err(ConfigError::InvalidStagingDir {
                path: args.staging_dir,
                reason: "not a directory".to_string(),
            });
        }

        let naming = if args.flatten_names {
            StagingNaming::Flattened
        } else {
            StagingNaming::BaseName
        };

        let stat_policy = match args.on_stat_error {
            StatErrorPolicy::Skip => StatPolicy::Skip,
            StatErrorPolicy::Retry => StatPolicy::Retry {
                attempts: args.stat_retries,
            },
            StatErrorPolicy::Fail => StatPolicy::FailFast,
        };

        Ok(Self {
            threshold: args.threshold,
            root,
            connections: args.connections,
            max_outstanding,
            max_concurrent_dirs,
            queue_size: args.queue_size,
            staging: StagingArea::new(args.staging_dir, args.staging_prefix, naming),
            cleanup: args.cleanup,
            filter,
            exclude_patterns,
            max_depth: args.max_depth,
            acquire_timeout: secs_or_none(args.acquire_timeout),
            download_timeout: secs_or_none(args.download_timeout),
            stat_policy,
            chunk_size: args.chunk_size,
            show_progress: !args.quiet,
            verbose: args.verbose,
        })
    }
}

fn secs_or_none(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Check that a directory-backed store location is usable
pub fn validate_store(path: &Path) -> Result<(), ConfigError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(ConfigError::InvalidStore {
            path: path.to_path_buf(),
            reason: "not a directory".to_string(),
        }),
        Err(e) => Err(ConfigError::InvalidStore {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> CliArgs {
        let mut argv = vec!["remote-sweep"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ScanConfig::from_args(parse(&["--store", "/mnt/phone", "-c", "3"])).unwrap();
        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.root, "/DCIM");
        assert_eq!(config.connections, 3);
        assert_eq!(config.max_outstanding, 12);
        assert_eq!(config.max_concurrent_dirs, 6);
        assert_eq!(config.acquire_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.download_timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.stat_policy, StatPolicy::Skip);
        assert_eq!(
            config.staging.local_path_for("/DCIM/100APPLE/IMG_0001.JPG"),
            PathBuf::from("/tmp/ios_IMG_0001.JPG")
        );
        assert!(config.show_progress);
    }

    #[test]
    fn test_threshold_range() {
        assert!(ScanConfig::from_args(parse(&["0.0", "-s", "/x"])).is_ok());
        assert!(ScanConfig::from_args(parse(&["1.0", "-s", "/x"])).is_ok());
        assert!(matches!(
            ScanConfig::from_args(parse(&["1.5", "-s", "/x"])),
            Err(ConfigError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            ScanConfig::from_args(parse(&["-0.1", "-s", "/x"])),
            Err(ConfigError::InvalidThreshold { .. })
        ));
        assert!(CliArgs::try_parse_from(["remote-sweep", "abc", "-s", "/x"]).is_err());
    }

    #[test]
    fn test_limits_validated() {
        assert!(ScanConfig::from_args(parse(&["-s", "/x", "-c", "0"])).is_err());
        assert!(ScanConfig::from_args(parse(&["-s", "/x", "-c", "65"])).is_err());
        assert!(ScanConfig::from_args(parse(&["-s", "/x", "--max-outstanding", "0"])).is_err());
        assert!(ScanConfig::from_args(parse(&["-s", "/x", "--queue-size", "8"])).is_err());
        assert!(ScanConfig::from_args(parse(&["-s", "/x", "--chunk-size", "100"])).is_err());
        assert!(ScanConfig::from_args(parse(&["-s", "/x", "--root", "DCIM"])).is_err());
        assert!(ScanConfig::from_args(parse(&["-s", "/x", "--exclude", "("])).is_err());
        assert!(ScanConfig::from_args(parse(&["-s", "/x", "--ext", "a/b"])).is_err());
    }

    #[test]
    fn test_policy_and_timeouts() {
        let config = ScanConfig::from_args(parse(&[
            "-s",
            "/x",
            "--on-stat-error",
            "retry",
            "--stat-retries",
            "5",
            "--acquire-timeout",
            "0",
            "--download-timeout",
            "0",
            "--flatten-names",
            "--root",
            "/DCIM/",
        ]))
        .unwrap();

        assert_eq!(config.stat_policy, StatPolicy::Retry { attempts: 5 });
        assert_eq!(config.stat_policy.retries(), 5);
        assert_eq!(config.acquire_timeout, None);
        assert_eq!(config.download_timeout, None);
        assert_eq!(config.staging.naming(), StagingNaming::Flattened);
        assert_eq!(config.root, "/DCIM");

        let config = ScanConfig::from_args(parse(&["-s", "/x", "--on-stat-error", "fail"])).unwrap();
        assert_eq!(config.stat_policy, StatPolicy::FailFast);
        assert_eq!(config.stat_policy.retries(), 0);
    }

    #[test]
    fn test_exclude_patterns() {
        let config =
            ScanConfig::from_args(parse(&["-s", "/x", "--exclude", r"/\.Trashes", "--exclude", "THM$"])).unwrap();
        assert_eq!(config.exclude_patterns.len(), 2);
        assert!(config.exclude_patterns[0].is_match("/DCIM/.Trashes/IMG_0001.JPG"));
        assert!(config.exclude_patterns[1].is_match("/DCIM/100APPLE/IMG_0001.THM"));

        assert!(matches!(
            ScanConfig::from_args(parse(&["-s", "/x", "--exclude", "(unclosed"])),
            Err(ConfigError::InvalidExcludePattern { .. })
        ));
    }

    #[test]
    fn test_validate_store() {
        let dir = TempDir::new().unwrap();
        assert!(validate_store(dir.path()).is_ok());
        assert!(validate_store(&dir.path().join("missing")).is_err());

        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        assert!(validate_store(&file).is_err());
    }
}
