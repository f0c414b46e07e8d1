//! Concurrent hierarchy walker
//!
//! Expands hierarchical roots into the full set of nodes beneath them.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────────────┐
//!                     │       TreeWalker        │
//!                     │  - seeds roots          │
//!                     │  - visited set          │
//!                     └───────────┬─────────────┘
//!                                 │ ExpansionQueue
//!       ┌─────────────────────────┼─────────────────────────┐
//!       │                         │                         │
//! ┌─────▼─────┐             ┌─────▼─────┐             ┌─────▼─────┐
//! │  Worker 1 │             │  Worker 2 │             │  Worker N │
//! │ list page │             │ list page │             │ list page │
//! └─────┬─────┘             └─────┬─────┘             └─────┬─────┘
//!       └─────────────────────────┼─────────────────────────┘
//!                                 │ bounded channel
//!                           Discovered nodes
//! ```

pub mod queue;
pub mod tree_walker;

pub use queue::{ExpandTask, ExpansionQueue, PendingGuard};
pub use tree_walker::{TreeWalker, WalkHandle, WalkResult, WalkStats};
