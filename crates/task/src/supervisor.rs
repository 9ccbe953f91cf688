//! Tracking of a pool of worker tasks, distinguishing a clean exit from a
//! panic so that callers can decide whether to replace the worker.

use std::{future::Future, pin::Pin};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::task::JoinHandle;

/// How a tracked worker task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The task returned normally (it observed a stop request).
    Stopped,
    /// The task panicked.
    Panicked,
}

type TrackedExit = Pin<Box<dyn Future<Output = (usize, WorkerExit)> + Send>>;

/// Tracks a set of worker tasks identified by an arbitrary `usize` id,
/// reporting each one's exit as it happens.
#[derive(Default)]
pub struct Supervisor {
    tasks: FuturesUnordered<TrackedExit>,
}

impl Supervisor {
    /// Creates an empty supervisor.
    pub fn new() -> Self {
        Self {
            tasks: FuturesUnordered::new(),
        }
    }

    /// Starts tracking a worker task under the given id.
    pub fn track(&mut self, worker_id: usize, handle: JoinHandle<()>) {
        self.tasks.push(Box::pin(async move {
            match handle.await {
                Ok(()) => (worker_id, WorkerExit::Stopped),
                Err(join_error) if join_error.is_panic() => (worker_id, WorkerExit::Panicked),
                Err(_cancelled) => (worker_id, WorkerExit::Stopped),
            }
        }));
    }

    /// The number of tasks currently tracked.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no tasks are currently tracked.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for the next tracked task to exit, removing it from the set.
    /// Returns `None` once there is nothing left to track.
    pub async fn next_exit(&mut self) -> Option<(usize, WorkerExit)> {
        self.tasks.next().await
    }
}
