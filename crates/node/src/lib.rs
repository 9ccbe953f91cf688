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

//! A single vertex of a dataflow graph: an inbound channel, a transform, and
//! the outbound edges (with overflow buffers) it routes to.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use packet::{Completion, Packet, TraceId};

/// All the errors this crate can produce.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// An edge with this name is already attached to the node.
    #[error("edge '{edge}' already exists on node '{node}'")]
    EdgeAlreadyExists {
        /// The node the edge was being attached to.
        node: String,
        /// The edge name.
        edge: String,
    },

    /// The channel offered for the edge cannot be used.
    #[error("invalid channel offered for edge '{edge}' on node '{node}'")]
    InvalidChannel {
        /// The node the edge was being attached to.
        node: String,
        /// The edge name.
        edge: String,
    },
}

/// A transform turns one payload into a mapping of edge name to an optional
/// output payload. `None` suppresses emission on that edge for this input.
pub type Transform<T> = Arc<dyn Fn(T) -> HashMap<String, Option<T>> + Send + Sync>;

struct EdgeEntry<T> {
    sender: flume::Sender<Packet<T>>,
    is_output: bool,
}

/// A named vertex owning an inbound pipe, a set of outbound edges, and an
/// overflow buffer per edge (plus one for its own inbound overflow).
pub struct Node<T> {
    name: String,
    transform: Transform<T>,
    pipe_tx: flume::Sender<Packet<T>>,
    pipe_rx: flume::Receiver<Packet<T>>,
    edges: HashMap<String, EdgeEntry<T>>,
    buffers: HashMap<String, Mutex<VecDeque<Packet<T>>>>,
    buffer_warning_threshold: usize,
    buffer_warning_increment: usize,
}

impl<T> Node<T>
where
    T: Send + 'static,
{
    /// Creates a node with an empty routing table.
    pub fn new<F>(
        name: impl Into<String>,
        transform: F,
        channel_size: usize,
        buffer_warning_threshold: usize,
        buffer_warning_increment: usize,
    ) -> Self
    where
        F: Fn(T) -> HashMap<String, Option<T>> + Send + Sync + 'static,
    {
        let name = name.into();
        let (pipe_tx, pipe_rx) = flume::bounded(channel_size);
        let mut buffers = HashMap::new();
        let _ = buffers.insert(name.clone(), Mutex::new(VecDeque::new()));

        Self {
            name,
            transform: Arc::new(transform),
            pipe_tx,
            pipe_rx,
            edges: HashMap::new(),
            buffers,
            buffer_warning_threshold,
            buffer_warning_increment: buffer_warning_increment.max(1),
        }
    }

    /// The node's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a sender clone of the node's inbound pipe, used by a manager
    /// to wire an internal edge whose destination is this node.
    pub fn pipe(&self) -> flume::Sender<Packet<T>> {
        self.pipe_tx.clone()
    }

    /// Whether an edge with this name is already attached.
    pub fn has_edge(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    /// Attaches a new outbound edge. Fails if the name is already taken.
    pub fn attach_edge(&mut self, name: &str, sender: flume::Sender<Packet<T>>, is_output: bool) -> Result<(), Error> {
        if self.has_edge(name) {
            return Err(Error::EdgeAlreadyExists {
                node: self.name.clone(),
                edge: name.to_string(),
            });
        }

        let _ = self.edges.insert(
            name.to_string(),
            EdgeEntry {
                sender,
                is_output,
            },
        );
        let _ = self.buffers.insert(name.to_string(), Mutex::new(VecDeque::new()));

        Ok(())
    }

    /// Submits a fresh payload into this node's pipe, falling back to its own
    /// overflow buffer if the pipe is momentarily full.
    pub fn submit(&self, trace_id: TraceId, payload: T, completion: Option<Completion>) {
        if let Some(completion) = &completion {
            completion.increment();
        }

        let packet = Packet {
            trace_id,
            payload,
            processed: false,
            completion,
        };

        match self.pipe_tx.try_send(packet) {
            Ok(()) => {}
            Err(flume::TrySendError::Full(packet)) => self.push_overflow(&self.name.clone(), packet),
            Err(flume::TrySendError::Disconnected(_)) => {
                tracing::warn!(node = %self.name, "pipe disconnected, submission dropped");
            }
        }
    }

    /// A single cooperative step: consume one packet from the pipe, or
    /// failing that, drain one item from one overflow buffer.
    pub fn poll(&self) {
        match self.pipe_rx.try_recv() {
            Ok(packet) => self.consume_packet(packet),
            Err(_) => self.drain_buffers(),
        }
    }

    fn consume_packet(&self, packet: Packet<T>) {
        let Packet {
            trace_id,
            payload,
            completion,
            ..
        } = packet;

        let outputs = (self.transform)(payload);

        for (edge_name, emitted) in outputs {
            let Some(out_payload) = emitted else {
                continue;
            };

            if !self.has_edge(&edge_name) {
                tracing::warn!(node = %self.name, edge = %edge_name, "no route for emitted packet, discarding");
                continue;
            }

            let out_packet = Packet::derive(trace_id.clone(), out_payload, completion.clone());
            self.send_packet(&edge_name, out_packet);
        }
    }

    fn send_packet(&self, edge_name: &str, packet: Packet<T>) {
        let Some(edge) = self.edges.get(edge_name) else {
            return;
        };

        let is_output = edge.is_output;
        let completion = packet.completion.clone();

        match edge.sender.try_send(packet) {
            Ok(()) => {
                if is_output {
                    if let Some(completion) = completion {
                        completion.decrement();
                    }
                }
            }
            Err(flume::TrySendError::Full(packet)) => self.push_overflow(edge_name, packet),
            Err(flume::TrySendError::Disconnected(_)) => {
                tracing::warn!(node = %self.name, edge = %edge_name, "edge disconnected, packet dropped");
            }
        }
    }

    fn push_overflow(&self, buffer_name: &str, packet: Packet<T>) {
        let Some(buffer) = self.buffers.get(buffer_name) else {
            return;
        };

        let len = {
            let mut guard = buffer.lock().expect("overflow buffer mutex poisoned");
            guard.push_back(packet);
            guard.len()
        };

        if len >= self.buffer_warning_threshold
            && (len - self.buffer_warning_threshold) % self.buffer_warning_increment == 0
        {
            tracing::warn!(node = %self.name, buffer = %buffer_name, size = len, "overflow buffer growing large");
        }
    }

    /// Gives every non-empty overflow buffer exactly one chance to forward
    /// or reprocess its oldest item, bounding the work done per call.
    fn drain_buffers(&self) {
        for (buffer_name, buffer) in &self.buffers {
            let item = {
                let mut guard = buffer.lock().expect("overflow buffer mutex poisoned");
                guard.pop_front()
            };

            let Some(packet) = item else {
                continue;
            };

            if packet.processed {
                self.send_packet(buffer_name, packet);
            } else {
                self.consume_packet(packet);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passthrough(edge: &str) -> impl Fn(i32) -> HashMap<String, Option<i32>> {
        let edge = edge.to_string();
        move |payload| {
            let mut map = HashMap::new();
            let _ = map.insert(edge.clone(), Some(payload));
            map
        }
    }

    #[test]
    fn attach_edge_rejects_duplicate_name() {
        let mut node: Node<i32> = Node::new("n", passthrough("out"), 8, 1000, 100);
        let (tx, _rx) = flume::bounded(8);
        node.attach_edge("out", tx.clone(), false).expect("first attach succeeds");
        let err = node.attach_edge("out", tx, false).expect_err("duplicate attach fails");
        assert!(matches!(err, Error::EdgeAlreadyExists { .. }));
    }

    #[test]
    fn submit_and_poll_consumes_and_forwards() {
        let mut node: Node<i32> = Node::new("n", passthrough("out"), 8, 1000, 100);
        let (tx, rx) = flume::bounded(8);
        node.attach_edge("out", tx, true).unwrap();

        node.submit(TraceId::new(), 42, None);
        node.poll();

        let forwarded = rx.try_recv().expect("a packet should have been forwarded");
        assert_eq!(forwarded.payload, 42);
        assert!(forwarded.processed);
    }

    #[test]
    fn suppressed_emission_is_never_forwarded() {
        let mut node: Node<i32> = Node::new("n", |_: i32| HashMap::new(), 8, 1000, 100);
        let (tx, rx) = flume::bounded(8);
        node.attach_edge("out", tx, true).unwrap();

        node.submit(TraceId::new(), 1, None);
        node.poll();

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_pipe_overflows_into_buffer_and_drains_on_next_poll() {
        let mut node: Node<i32> = Node::new("n", passthrough("out"), 1, 1000, 100);
        let (tx, rx) = flume::bounded(1);
        node.attach_edge("out", tx, true).unwrap();

        // Fill the pipe directly so the next submit overflows.
        node.submit(TraceId::new(), 1, None);
        node.submit(TraceId::new(), 2, None);

        // First poll drains the pipe (payload 1).
        node.poll();
        assert_eq!(rx.try_recv().unwrap().payload, 1);

        // Second poll drains the overflow buffer (payload 2).
        node.poll();
        assert_eq!(rx.try_recv().unwrap().payload, 2);
    }

    #[test]
    fn unrouted_edge_name_is_discarded_not_panicking() {
        let mut node: Node<i32> = Node::new("n", passthrough("missing"), 8, 1000, 100);
        let (tx, _rx) = flume::bounded(8);
        node.attach_edge("out", tx, true).unwrap();

        node.submit(TraceId::new(), 1, None);
        node.poll();
    }
}
