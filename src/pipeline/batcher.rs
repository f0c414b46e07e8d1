//! Size-bounded batch accumulator
//!
//! Groups a stream of discovered nodes into batches no larger than the
//! remote bulk-lookup ceiling. Items keep their arrival order; the final
//! partial batch is flushed when the input ends.

use crate::error::WorkerError;
use crate::platform::types::Discovered;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// A group of items looked up together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T = Discovered> {
    /// 0-based emission index
    pub sequence: u64,

    pub entries: Vec<T>,
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Statistics about emitted batches
#[derive(Debug, Default)]
pub struct BatcherStats {
    pub batches_emitted: AtomicU64,
    pub items_batched: AtomicU64,
}

impl BatcherStats {
    pub fn batches_emitted(&self) -> u64 {
        self.batches_emitted.load(Ordering::Relaxed)
    }

    pub fn items_batched(&self) -> u64 {
        self.items_batched.load(Ordering::Relaxed)
    }
}

/// Pure accumulator: push items, get full batches back
#[derive(Debug)]
pub struct Batcher<T = Discovered> {
    max_batch_size: usize,
    buffer: Vec<T>,
    next_sequence: u64,
}

impl<T> Batcher<T> {
    /// `max_batch_size` of zero is treated as one
    pub fn new(max_batch_size: usize) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            max_batch_size,
            buffer: Vec::with_capacity(max_batch_size),
            next_sequence: 0,
        }
    }

    /// Sequence number the next batch will carry
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Add an item; returns a batch once the buffer reaches the limit
    pub fn push(&mut self, item: T) -> Option<Batch<T>> {
        self.buffer.push(item);
        if self.buffer.len() >= self.max_batch_size {
            Some(self.cut())
        } else {
            None
        }
    }

    /// Flush the remainder, if any
    pub fn finish(&mut self) -> Option<Batch<T>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.cut())
        }
    }

    fn cut(&mut self) -> Batch<T> {
        let entries = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.max_batch_size));
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Batch { sequence, entries }
    }
}

/// Pump items from `input` to `output` as batches until `input` closes
///
/// Returns the batcher so a caller can keep numbering batches from where
/// this stream stopped.
pub async fn run<T: Send>(
    mut batcher: Batcher<T>,
    mut input: mpsc::Receiver<T>,
    output: mpsc::Sender<Batch<T>>,
    stats: Arc<BatcherStats>,
) -> Result<Batcher<T>, WorkerError> {
    while let Some(item) = input.recv().await {
        if let Some(batch) = batcher.push(item) {
            emit(&output, batch, &stats).await?;
        }
    }

    if let Some(batch) = batcher.finish() {
        emit(&output, batch, &stats).await?;
    }
    Ok(batcher)
}

async fn emit<T>(output: &mpsc::Sender<Batch<T>>, batch: Batch<T>, stats: &BatcherStats) -> Result<(), WorkerError> {
    debug!(sequence = batch.sequence, size = batch.len(), "Batch ready");
    stats.batches_emitted.fetch_add(1, Ordering::Relaxed);
    stats
        .items_batched
        .fetch_add(batch.len() as u64, Ordering::Relaxed);
    output
        .send(batch)
        .await
        .map_err(|_| WorkerError::ResultChannelClosed)
}
