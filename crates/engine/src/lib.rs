#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! The manager: a builder for a graph of [`node::Node`]s plus the worker
//! pool that executes it.

mod error;
mod worker;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

pub use config::ManagerConfig;
pub use error::Error;
pub use packet::{Completion, Packet, TraceId};

use node::Node;
use task::labels::ProcessLabels;
use worker::PoolCommand;

/// A directed graph of named nodes plus the worker pool that drives it.
///
/// Construction (`node`/`edge`/`output`) is only valid before [`Manager::start`].
/// Once started, the node set is immutable; only the pool size changes.
pub struct Manager<T: Send + 'static> {
    name: String,
    config: ManagerConfig,
    nodes: HashMap<String, Node<T>>,
    shared_nodes: Option<Arc<HashMap<String, Node<T>>>>,
    running: Arc<AtomicBool>,
    pool_size: Arc<AtomicUsize>,
    commands: Option<flume::Sender<PoolCommand>>,
    process_labels: ProcessLabels,
}

impl<T: Send + 'static> Manager<T> {
    /// Creates an empty manager from a validated configuration.
    pub fn new(config: ManagerConfig) -> Result<Self, Error> {
        config.validate_config().map_err(|source| Error::Config {
            name: config.name.clone(),
            source,
        })?;

        let name = config.name.clone();
        tracing::info!(manager = %name, size = config.pool_size, "created manager");

        Ok(Self {
            process_labels: ProcessLabels::new(&name),
            pool_size: Arc::new(AtomicUsize::new(config.pool_size)),
            running: Arc::new(AtomicBool::new(false)),
            nodes: HashMap::new(),
            shared_nodes: None,
            commands: None,
            name,
            config,
        })
    }

    /// Registers a new node. Fails if `name` is already taken.
    pub fn node<F>(&mut self, name: &str, transform: F) -> Result<&mut Self, Error>
    where
        F: Fn(T) -> HashMap<String, Option<T>> + Send + Sync + 'static,
    {
        if self.nodes.contains_key(name) {
            return Err(Error::StateAlreadyExists { name: name.to_string() });
        }

        tracing::info!(manager = %self.name, node = name, "created node");
        let _ = self.nodes.insert(
            name.to_string(),
            Node::new(
                name,
                transform,
                self.config.channel_size,
                self.config.buffer_warning_threshold,
                self.config.buffer_warning_increment,
            ),
        );

        Ok(self)
    }

    /// Wires an internal edge `from -> to`, named `"{from}_to_{to}_{label}"`.
    /// Both nodes must already exist.
    pub fn edge(&mut self, from: &str, to: &str, label: &str) -> Result<&mut Self, Error> {
        if !self.nodes.contains_key(to) {
            return Err(Error::StateDoesNotExist { name: to.to_string() });
        }
        let to_pipe = self.nodes[to].pipe();

        let edge_name = format!("{from}_to_{to}_{label}");
        let from_node = self
            .nodes
            .get_mut(from)
            .ok_or_else(|| Error::StateDoesNotExist { name: from.to_string() })?;

        from_node.attach_edge(&edge_name, to_pipe, false)?;
        tracing::info!(manager = %self.name, from, to, edge = label, "created edge");

        Ok(self)
    }

    /// Exposes a fresh output channel on node `from` under `label`, returning
    /// the receiving end to the caller. `label` must be unique on `from`.
    pub fn output(&mut self, from: &str, label: &str) -> Result<flume::Receiver<Packet<T>>, Error> {
        let from_node = self
            .nodes
            .get_mut(from)
            .ok_or_else(|| Error::StateDoesNotExist { name: from.to_string() })?;

        let (sender, receiver) = flume::bounded(0);
        from_node.attach_edge(label, sender, true)?;
        tracing::info!(manager = %self.name, node = from, edge = label, "created output edge");

        Ok(receiver)
    }

    /// Starts the worker pool. Fails if the manager is already running or if
    /// it has never had any nodes registered. A manager may be started,
    /// stopped, and started again; the node set, fixed the first time
    /// `start` succeeds, is reused on every later start.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::AlreadyRunning { name: self.name.clone() });
        }
        if self.nodes.is_empty() && self.shared_nodes.is_none() {
            return Err(Error::EmptyGraph { name: self.name.clone() });
        }

        let nodes = match &self.shared_nodes {
            Some(nodes) => nodes.clone(),
            None => {
                let nodes = Arc::new(std::mem::take(&mut self.nodes));
                self.shared_nodes = Some(nodes.clone());
                nodes
            }
        };
        self.running.store(true, Ordering::SeqCst);

        let (cmd_tx, cmd_rx) = flume::unbounded();
        self.commands = Some(cmd_tx);

        let running = self.running.clone();
        let pool_size = self.pool_size.clone();
        let process_labels = self.process_labels.clone();
        let initial_size = self.config.pool_size;

        let _join_handle = tokio::spawn(worker::run(nodes, running, initial_size, cmd_rx, pool_size, process_labels));

        tracing::info!(manager = %self.name, "started");
        Ok(())
    }

    /// Signals the worker pool to stop. Workers exit at their next loop
    /// iteration; any packets still in flight are dropped.
    pub fn stop(&mut self) -> Result<(), Error> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::NotRunning { name: self.name.clone() });
        }

        self.running.store(false, Ordering::SeqCst);
        self.commands = None;
        tracing::info!(manager = %self.name, "stopped");
        Ok(())
    }

    /// The current number of workers.
    pub fn size(&self) -> usize {
        self.pool_size.load(Ordering::SeqCst)
    }

    /// Grows or shrinks the worker pool to `new_size`. Fails if the manager
    /// is not running or `new_size` is zero.
    pub fn resize(&mut self, new_size: usize) -> Result<(), Error> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::NotRunning { name: self.name.clone() });
        }
        if new_size == 0 {
            return Err(Error::InvalidSize {
                name: self.name.clone(),
                size: 0,
            });
        }

        let current = self.pool_size.load(Ordering::SeqCst);
        let delta = current.abs_diff(new_size);
        if delta == 0 {
            return Ok(());
        }

        let command = if new_size > current {
            PoolCommand::Grow(delta)
        } else {
            PoolCommand::Shrink(delta)
        };

        if let Some(commands) = &self.commands {
            let _ = commands.send(command);
        }

        tracing::info!(manager = %self.name, old_size = current, new_size, "resize");
        Ok(())
    }

    /// Submits a single payload to node `name`, returning a completion
    /// counter that reaches zero once every output it produced has been
    /// delivered.
    pub fn invoke(&self, name: &str, payload: T) -> Result<Completion, Error> {
        let node = self.shared_node(name)?;
        let completion = Completion::new();

        tracing::info!(manager = %self.name, node = name, "invoke");
        node.submit(TraceId::new(), payload, Some(completion.clone()));

        Ok(completion)
    }

    /// Submits a batch of payloads to node `name`, all sharing one
    /// completion counter.
    pub fn batch_invoke(&self, name: &str, batch: Vec<T>) -> Result<Completion, Error> {
        let node = self.shared_node(name)?;
        let completion = Completion::new();

        tracing::info!(manager = %self.name, node = name, size = batch.len(), "batch invoke");
        for payload in batch {
            node.submit(TraceId::new(), payload, Some(completion.clone()));
        }

        Ok(completion)
    }

    /// Reads `size` payloads off `output`, then waits for `completion` to
    /// reach zero before returning them. By the time `size` packets have
    /// been received off an output channel, every send that decrements
    /// `completion` has already happened, so the wait below should resolve
    /// immediately; it is kept to make the contract explicit rather than
    /// relying on that ordering coincidence.
    pub async fn gather(&self, completion: Completion, size: usize, output: flume::Receiver<Packet<T>>) -> Vec<T> {
        let mut results = Vec::with_capacity(size);

        while results.len() < size {
            match output.recv_async().await {
                Ok(packet) => results.push(packet.payload),
                Err(_) => break,
            }
        }

        completion.wait().await;
        results
    }

    fn shared_node(&self, name: &str) -> Result<&Node<T>, Error> {
        self.shared_nodes
            .as_ref()
            .and_then(|nodes| nodes.get(name))
            .ok_or_else(|| Error::StateDoesNotExist { name: name.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pool_size: usize) -> ManagerConfig {
        ManagerConfig::new("test", pool_size)
    }

    #[test]
    fn duplicate_node_name_is_rejected() {
        let mut manager: Manager<i32> = Manager::new(config(1)).unwrap();
        manager.node("a", |p| HashMap::from([("x".into(), Some(p))])).unwrap();
        let err = manager.node("a", |p| HashMap::from([("x".into(), Some(p))])).unwrap_err();
        assert!(matches!(err, Error::StateAlreadyExists { .. }));
    }

    #[test]
    fn edge_synthesizes_expected_name() {
        let mut manager: Manager<i32> = Manager::new(config(1)).unwrap();
        manager.node("a", |p| HashMap::from([("a_to_b_next".into(), Some(p))])).unwrap();
        manager.node("b", |p| HashMap::from([("out".into(), Some(p))])).unwrap();
        manager.edge("a", "b", "next").unwrap();
        assert!(manager.nodes["a"].has_edge("a_to_b_next"));
    }

    #[test]
    fn stop_before_start_is_not_running() {
        let mut manager: Manager<i32> = Manager::new(config(1)).unwrap();
        let err = manager.stop().unwrap_err();
        assert!(matches!(err, Error::NotRunning { .. }));
    }

    #[test]
    fn start_with_no_nodes_is_empty_graph() {
        let mut manager: Manager<i32> = Manager::new(config(1)).unwrap();
        let err = manager.start().unwrap_err();
        assert!(matches!(err, Error::EmptyGraph { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn starting_twice_while_running_is_already_running_not_empty_graph() {
        let mut manager: Manager<i32> = Manager::new(config(1)).unwrap();
        manager.node("only", |x: i32| HashMap::from([("out".into(), Some(x))])).unwrap();
        let _output = manager.output("only", "out").unwrap();

        manager.start().unwrap();
        let err = manager.start().unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning { .. }));

        manager.stop().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restarting_after_stop_reuses_the_same_node_set() {
        let mut manager: Manager<i32> = Manager::new(config(1)).unwrap();
        manager.node("only", |x: i32| HashMap::from([("out".into(), Some(x))])).unwrap();
        let output = manager.output("only", "out").unwrap();

        manager.start().unwrap();
        let completion = manager.invoke("only", 1).unwrap();
        assert_eq!(manager.gather(completion, 1, output.clone()).await, vec![1]);
        manager.stop().unwrap();

        manager.start().unwrap();
        let completion = manager.invoke("only", 2).unwrap();
        assert_eq!(manager.gather(completion, 1, output).await, vec![2]);
        manager.stop().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn linear_pipeline_preserves_value_and_trace() {
        let mut manager: Manager<i32> = Manager::new(config(2)).unwrap();

        manager.node("add", |x: i32| HashMap::from([("add_to_sub_next".into(), Some(x + 1))])).unwrap();
        manager.node("sub", |x: i32| HashMap::from([("sub_to_mul_next".into(), Some(x - 1))])).unwrap();
        manager.node("mul", |x: i32| HashMap::from([("mul_to_div_next".into(), Some(x * 2))])).unwrap();
        manager.node("div", |x: i32| HashMap::from([("out".into(), Some(x / 2))])).unwrap();

        manager.edge("add", "sub", "next").unwrap();
        manager.edge("sub", "mul", "next").unwrap();
        manager.edge("mul", "div", "next").unwrap();
        let output = manager.output("div", "out").unwrap();

        manager.start().unwrap();

        let batch = vec![10, 20, 30];
        let completion = manager.batch_invoke("add", batch.clone()).unwrap();
        let mut results = manager.gather(completion, batch.len(), output).await;
        results.sort_unstable();

        let mut expected = batch;
        expected.sort_unstable();
        assert_eq!(results, expected);

        manager.stop().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn self_loop_terminates_after_n_steps() {
        const N: i32 = 5;
        let mut manager: Manager<i32> = Manager::new(config(2)).unwrap();

        manager
            .node("step", |i: i32| {
                if i + 1 < N {
                    HashMap::from([("step_to_step_next".into(), Some(i + 1))])
                } else {
                    HashMap::from([("done".into(), Some(i))])
                }
            })
            .unwrap();
        manager.edge("step", "step", "next").unwrap();
        let output = manager.output("step", "done").unwrap();

        manager.start().unwrap();

        let completion = manager.invoke("step", 0).unwrap();
        let results = manager.gather(completion, 1, output).await;

        assert_eq!(results, vec![N - 1]);
        manager.stop().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resize_changes_observable_pool_size() {
        let mut manager: Manager<i32> = Manager::new(config(2)).unwrap();
        manager.node("only", |x: i32| HashMap::from([("out".into(), Some(x))])).unwrap();
        let _output = manager.output("only", "out").unwrap();

        manager.start().unwrap();
        assert_eq!(manager.size(), 2);

        manager.resize(5).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(manager.size(), 5);

        manager.resize(1).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(manager.size(), 1);

        manager.stop().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_transform_does_not_shrink_the_pool() {
        let mut manager: Manager<i32> = Manager::new(config(3)).unwrap();
        manager
            .node("flaky", |x: i32| {
                if x == 13 {
                    panic!("unlucky payload");
                }
                HashMap::from([("out".into(), Some(x))])
            })
            .unwrap();
        let output = manager.output("flaky", "out").unwrap();

        manager.start().unwrap();
        assert_eq!(manager.size(), 3);

        let completion = manager.invoke("flaky", 13).unwrap();
        // The panicking packet's completion is never decremented; don't wait on it.
        drop(completion);
        let good = manager.batch_invoke("flaky", vec![1, 2]).unwrap();
        let results = manager.gather(good, 2, output).await;
        assert_eq!(results.len(), 2);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(manager.size(), 3);

        manager.stop().unwrap();
    }
}
