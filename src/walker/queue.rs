//! Expansion queue with completion tracking
//!
//! This module provides the shared work queue that hierarchy workers pull
//! container-expansion tasks from.
//!
//! Completion is tracked with a pending-task counter rather than by watching
//! the queue drain: a task counts as pending from the moment it is scheduled
//! until the worker that ran it finishes. Workers schedule a container's
//! children before finishing the container itself, so the counter can only
//! reach zero once every transitively scheduled expansion has finished. At
//! zero the queue flips its done signal and every idle worker returns.

use crate::error::WorkerError;
use crate::platform::types::NodeIdentity;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{mpsc, watch, Mutex};

/// A task to list one container's children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandTask {
    /// Identity of the container (for diagnostics)
    pub identity: NodeIdentity,

    /// Hierarchy-position token used for listing
    pub container_token: String,

    /// Depth from root (0 = root)
    pub depth: usize,
}

impl ExpandTask {
    pub fn new(identity: NodeIdentity, container_token: impl Into<String>, depth: usize) -> Self {
        Self {
            identity,
            container_token: container_token.into(),
            depth,
        }
    }
}

/// Statistics for the expansion queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Total tasks enqueued
    pub enqueued: AtomicU64,

    /// Total tasks dequeued
    pub dequeued: AtomicU64,
}

impl QueueStats {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }
}

/// Unbounded expansion queue shared by all workers
pub struct ExpansionQueue {
    sender: mpsc::UnboundedSender<ExpandTask>,
    receiver: Mutex<mpsc::UnboundedReceiver<ExpandTask>>,
    pending: AtomicUsize,
    done: watch::Sender<bool>,
    stats: QueueStats,
}

impl ExpansionQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (done, _) = watch::channel(false);

        Self {
            sender,
            receiver: Mutex::new(receiver),
            pending: AtomicUsize::new(0),
            done,
            stats: QueueStats::default(),
        }
    }

    /// Schedule a task; it stays pending until a worker finishes it
    pub fn schedule(&self, task: ExpandTask) -> Result<(), WorkerError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(task).is_err() {
            self.finish();
            return Err(WorkerError::QueueSendFailed);
        }
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Mark one pending task as finished
    pub fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.done.send_replace(true);
        }
    }

    /// Hold the queue open while roots are being seeded
    ///
    /// Without the hold, a fast worker could drive the counter to zero
    /// between two roots and end the walk early.
    pub fn hold(&self) -> PendingGuard<'_> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        PendingGuard { queue: self }
    }

    /// Wait for the next task, or `None` once the walk is complete
    pub async fn next(&self) -> Option<ExpandTask> {
        let mut done = self.done.subscribe();
        if *done.borrow() {
            return None;
        }

        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            task = receiver.recv() => {
                if task.is_some() {
                    self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
                }
                task
            }
            _ = done.wait_for(|finished| *finished) => None,
        }
    }

    /// Number of scheduled tasks not yet finished
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Check if all work is complete
    pub fn is_complete(&self) -> bool {
        *self.done.borrow()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

impl Default for ExpansionQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that finishes one pending unit on drop
pub struct PendingGuard<'a> {
    queue: &'a ExpansionQueue,
}

impl<'a> PendingGuard<'a> {
    /// Guard a task a worker has just taken from the queue
    pub fn for_task(queue: &'a ExpansionQueue) -> Self {
        Self { queue }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.queue.finish();
    }
}
