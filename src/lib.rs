//! doc-stats-walker - Concurrent document statistics aggregator
//!
//! Turns a handful of document URLs into a flat, deduplicated and ranked
//! list of per-document usage statistics. Wiki roots are walked to find
//! every document beneath them; every discovered document's engagement
//! statistics and metadata are fetched in bulk and joined into one record.
//!
//! # Features
//!
//! - **Concurrent Walk**: a worker pool expands containers in parallel,
//!   with completion detected by a pending-task counter rather than by
//!   recursion.
//!
//! - **Shared Rate Limit**: every remote call, from every worker, passes
//!   through one sliding-window governor.
//!
//! - **Bounded Batches**: discovered documents are looked up in batches no
//!   larger than the platform's bulk ceiling, several batches at a time.
//!
//! - **Partial Results**: a failed subtree, batch or lookup costs only what
//!   it covers, and is described in the report's diagnostics.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Document Platform                             │
//! │      get_node · list children · statistics · metadata            │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               │ PlatformSession (credential + RateGovernor)
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      TreeWalker                                  │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐         ┌─────────┐     │
//! │  │Worker 1 │  │Worker 2 │  │Worker 3 │  ...    │Worker N │     │
//! │  └────┬────┘  └────┬────┘  └────┬────┘         └────┬────┘     │
//! │       └────────────┴─────┬──────┴────────────────────┘          │
//! │                          ▼                                      │
//! │            ┌──────────────────────────┐                         │
//! │            │  Batcher (≤ 200/batch)   │                         │
//! │            └────────────┬─────────────┘                         │
//! │                         ▼                                       │
//! │            ┌──────────────────────────┐                         │
//! │            │  Aggregator × K          │                         │
//! │            │  stats ⨝ meta            │                         │
//! │            └──────────────────────────┘                         │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                    ┌──────────────────┐
//!                    │   StatsReport    │
//!                    └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Offline run against a snapshot of a document space
//! doc-stats-walker https://www.larkoffice.com/wiki/wikcnRoot \
//!     --snapshot space.json --token u-xxxx -o stats.json
//! ```

pub mod config;
pub mod error;
pub mod governor;
pub mod pipeline;
pub mod platform;
pub mod progress;
pub mod report;
pub mod walker;

pub use config::{CliArgs, DocUrl, PipelineConfig, RankKey};
pub use error::{ConfigError, PlatformError, Result, StatsError, WorkerError};
pub use governor::RateGovernor;
pub use pipeline::{compute_statistics, StatsPipeline};
pub use platform::{Collaborators, Credential, SnapshotPlatform};
pub use report::{Diagnostic, StatsReport};
pub use walker::{TreeWalker, WalkResult};
