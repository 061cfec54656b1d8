//! remote-sweep - Concurrent scanner and classifier for remote file stores
//!
//! Walks the directory tree of a remote store (a phone's media filesystem,
//! an export, an in-memory fixture) through a small pool of pre-established
//! sessions, copies every candidate image to a local staging directory and
//! runs a classifier over it. Positive verdicts are collected into a report.
//!
//! # Features
//!
//! - **Bounded Session Pool**: A fixed number of sessions is established up
//!   front and shared by every task. Broken sessions are replaced, never
//!   handed out again.
//!
//! - **Bounded Fan-Out**: Directory tasks and in-flight file tasks are both
//!   capped by semaphores; a full directory queue falls back to inline
//!   traversal instead of blocking.
//!
//! - **Isolated Failures**: Unlistable directories, failed downloads and
//!   classifier errors are counted separately and never abort the scan.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Remote Store                              │
//! │                (local mount, memory fixture)                    │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ LIST / STAT / READ
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 SessionPool (K sessions)                        │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!             ┌─────────────────┴──────────────────┐
//!             ▼                                    ▼
//!   ┌──────────────────┐               ┌──────────────────────┐
//!   │   TreeWalker     │──dispatch────▶│  File tasks (≤ N)    │
//!   │  dir tasks       │               │  Downloader          │
//!   └──────────────────┘               │  Classifier          │
//!                                      └──────────┬───────────┘
//!                                                 ▼
//!                                      ┌──────────────────────┐
//!                                      │   StatsAggregator    │
//!                                      └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Scan a mounted phone with the default threshold
//! remote-sweep --store /mnt/phone
//!
//! # Stricter threshold, two sessions, keep staged files apart
//! remote-sweep 0.8 --store /mnt/phone -c 2 --flatten-names
//! ```

pub mod config;
pub mod content;
pub mod download;
pub mod error;
pub mod progress;
pub mod staging;
pub mod stats;
pub mod transport;
pub mod walker;

pub use config::{CliArgs, ScanConfig, StatPolicy};
pub use content::{CandidateFilter, Classifier, SkinToneClassifier};
pub use error::{ScanError, ScanResult};
pub use stats::{ScanStats, StatsAggregator, Verdict};
pub use transport::{Connector, LocalConnector, MemoryConnector, MemoryStore, Session, SessionPool};
pub use walker::{ScanCoordinator, ScanReport, TreeWalker};
