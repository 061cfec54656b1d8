//! Concurrent remote tree scanner
//!
//! The walker lists directories and queries entry types over pooled
//! sessions, and dispatches every candidate file to a bounded set of
//! download-and-classify tasks.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────────────┐
//!                     │     ScanCoordinator     │
//!                     │  - session pool         │
//!                     │  - final report         │
//!                     └───────────┬─────────────┘
//!                                 │ root DirTask
//!                     ┌───────────▼─────────────┐
//!                     │       TreeWalker        │
//!                     │  bounded dir channel    │
//!                     │  dir semaphore          │
//!                     └───────────┬─────────────┘
//!       ┌─────────────────────────┼─────────────────────────┐
//! ┌─────▼─────┐             ┌─────▼─────┐             ┌─────▼─────┐
//! │ Dir task  │             │ Dir task  │             │ Dir task  │
//! │ LIST/STAT │             │ LIST/STAT │             │ LIST/STAT │
//! └─────┬─────┘             └─────┬─────┘             └─────┬─────┘
//!       └─────────────────────────┼─────────────────────────┘
//!                                 │ file permit (max_outstanding)
//!                     ┌───────────▼─────────────┐
//!                     │      File tasks         │
//!                     │ download → classify →   │
//!                     │ StatsAggregator         │
//!                     └─────────────────────────┘
//! ```

pub mod context;
pub mod coordinator;
pub mod processor;
pub mod queue;
pub mod tree;

pub use context::{WalkContext, WalkCounters, WalkSummary};
pub use coordinator::{ProgressHandle, ScanCoordinator, ScanProgress, ScanReport};
pub use processor::{process_file, FileOutcome};
pub use queue::{DirTask, PendingDirs};
pub use tree::TreeWalker;
