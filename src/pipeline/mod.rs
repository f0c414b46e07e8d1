//! Batching, aggregation and the run driver

pub mod aggregator;
pub mod batcher;
pub mod orchestrator;

pub use aggregator::{aggregate, BatchOutcome};
pub use batcher::{Batch, Batcher, BatcherStats};
pub use orchestrator::{compute_statistics, PipelineProgress, StatsPipeline};
