//! The worker loop and the supervisor task that keeps the pool at its
//! configured size, restarting any worker whose transform panics.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use node::Node;
use task::{
    labels::{ProcessLabels, TaskLabels},
    Supervisor, WorkerExit,
};
use tracing::{error, info};

/// A command sent from the manager's runtime API to the supervisor task.
pub(crate) enum PoolCommand {
    /// Start `n` additional workers.
    Grow(usize),
    /// Stop `n` currently running workers.
    Shrink(usize),
}

async fn worker_loop<T>(
    nodes: Arc<HashMap<String, Node<T>>>,
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
) where
    T: Send + 'static,
{
    loop {
        if !running.load(Ordering::Acquire) || stop_requested.load(Ordering::Acquire) {
            return;
        }

        for node in nodes.values() {
            node.poll();
        }

        // Cooperative yield: the loop above never awaits anything, so
        // without this the worker would never give the runtime a chance to
        // schedule other tasks.
        tokio::task::yield_now().await;
    }
}

fn spawn_worker<T>(
    worker_id: usize,
    nodes: &Arc<HashMap<String, Node<T>>>,
    running: &Arc<AtomicBool>,
    process_labels: &ProcessLabels,
    slots: &mut HashMap<usize, Arc<AtomicBool>>,
    supervisor: &mut Supervisor,
) where
    T: Send + 'static,
{
    let stop_requested = Arc::new(AtomicBool::new(false));
    let _ = slots.insert(worker_id, stop_requested.clone());

    let task_labels = TaskLabels::new("worker", &worker_id.to_string(), &process_labels.process_id);

    let nodes = nodes.clone();
    let running = running.clone();
    info!(
        task_id = %task_labels.task_id,
        task_cat = %task_labels.task_cat,
        task_source = %task_labels.task_source,
        "worker spawned"
    );
    let handle = tokio::spawn(async move {
        worker_loop(nodes, running, stop_requested).await;
    });
    supervisor.track(worker_id, handle);
}

/// Owns the worker pool for the lifetime of a running manager: spawns the
/// initial workers, applies [`PoolCommand`]s from `resize`, and replaces any
/// worker whose transform panicked (unless it was also targeted for
/// shrinking, in which case it is let go).
pub(crate) async fn run<T>(
    nodes: Arc<HashMap<String, Node<T>>>,
    running: Arc<AtomicBool>,
    initial_size: usize,
    commands: flume::Receiver<PoolCommand>,
    pool_size: Arc<AtomicUsize>,
    process_labels: ProcessLabels,
) where
    T: Send + 'static,
{
    let mut supervisor = Supervisor::new();
    let mut slots: HashMap<usize, Arc<AtomicBool>> = HashMap::new();
    let mut next_id = 0usize;

    for _ in 0..initial_size {
        spawn_worker(next_id, &nodes, &running, &process_labels, &mut slots, &mut supervisor);
        next_id += 1;
    }
    pool_size.store(initial_size, Ordering::SeqCst);

    loop {
        if !running.load(Ordering::Acquire) && slots.is_empty() {
            return;
        }

        tokio::select! {
            command = commands.recv_async() => {
                match command {
                    Ok(PoolCommand::Grow(n)) => {
                        for _ in 0..n {
                            spawn_worker(next_id, &nodes, &running, &process_labels, &mut slots, &mut supervisor);
                            next_id += 1;
                        }
                        let _ = pool_size.fetch_add(n, Ordering::SeqCst);
                    }
                    Ok(PoolCommand::Shrink(n)) => {
                        let targets: Vec<usize> = slots.keys().copied().take(n).collect();
                        for worker_id in targets {
                            if let Some(stop_requested) = slots.remove(&worker_id) {
                                stop_requested.store(true, Ordering::SeqCst);
                            }
                        }
                        let current = pool_size.load(Ordering::SeqCst);
                        pool_size.store(current.saturating_sub(n), Ordering::SeqCst);
                    }
                    Err(_) => {
                        // The manager was dropped; keep supervising until
                        // every worker has drained out via `running`.
                    }
                }
            }
            exit = supervisor.next_exit(), if !supervisor.is_empty() => {
                let Some((worker_id, outcome)) = exit else { continue };
                match outcome {
                    WorkerExit::Stopped => {
                        let _ = slots.remove(&worker_id);
                    }
                    WorkerExit::Panicked => {
                        let targeted_for_shrink = slots.remove(&worker_id).map(|flag| flag.load(Ordering::SeqCst)).unwrap_or(true);
                        let task_labels = TaskLabels::new("worker", &worker_id.to_string(), &process_labels.process_id);
                        error!(
                            task_id = %task_labels.task_id,
                            task_cat = %task_labels.task_cat,
                            task_source = %task_labels.task_source,
                            "worker panicked"
                        );
                        if running.load(Ordering::Acquire) && !targeted_for_shrink {
                            spawn_worker(next_id, &nodes, &running, &process_labels, &mut slots, &mut supervisor);
                            next_id += 1;
                        }
                    }
                }
            }
        }
    }
}
