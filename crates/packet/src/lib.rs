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

//! The unit of work that flows through a graph of nodes: a trace id, a
//! payload, a processed flag and an optional handle to the batch it
//! belongs to.

use std::{
    fmt,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use tokio::sync::Notify;

/// Identifies every packet produced from the same submission as it is
/// forwarded across nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(uuid::Uuid);

impl TraceId {
    /// Creates a new, unique trace id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A packet moving through the graph.
#[derive(Debug, Clone)]
pub struct Packet<T> {
    /// Unique identifier of the submission this packet descends from.
    pub trace_id: TraceId,
    /// The opaque value being routed.
    pub payload: T,
    /// `false` for a freshly submitted or buffered input, `true` once a node
    /// has already transformed it.
    pub processed: bool,
    /// The batch-completion counter this packet contributes to, if any.
    pub completion: Option<Completion>,
}

impl<T> Packet<T> {
    /// Builds a fresh, unprocessed packet for a new submission.
    pub fn new_input(payload: T, completion: Option<Completion>) -> Self {
        Self {
            trace_id: TraceId::new(),
            payload,
            processed: false,
            completion,
        }
    }

    /// Builds a packet carrying the output of a transform, preserving the
    /// trace id and completion handle of the packet it was derived from.
    pub fn derive(trace_id: TraceId, payload: T, completion: Option<Completion>) -> Self {
        Self {
            trace_id,
            payload,
            processed: true,
            completion,
        }
    }
}

struct CompletionInner {
    remaining: AtomicI64,
    notify: Notify,
}

/// A shared counter tracking how many packets of a batch are still in
/// flight. Submission increments it once per payload; a successful delivery
/// on an output edge decrements it. [`Completion::wait`] resolves once the
/// counter reaches zero.
#[derive(Clone)]
pub struct Completion {
    inner: Arc<CompletionInner>,
}

impl Completion {
    /// Creates a completion counter starting at zero.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CompletionInner {
                remaining: AtomicI64::new(0),
                notify: Notify::new(),
            }),
        }
    }

    /// Marks one more packet as outstanding.
    pub fn increment(&self) {
        let _ = self.inner.remaining.fetch_add(1, Ordering::SeqCst);
    }

    /// Marks one packet as delivered. Wakes any waiter if this was the last
    /// one outstanding.
    pub fn decrement(&self) {
        if self.inner.remaining.fetch_sub(1, Ordering::SeqCst) <= 1 {
            self.inner.notify.notify_waiters();
        }
    }

    /// Returns the number of packets still outstanding.
    pub fn remaining(&self) -> i64 {
        self.inner.remaining.load(Ordering::SeqCst)
    }

    /// Waits until the counter reaches zero (or below, which should not
    /// happen under correct use but is treated the same way).
    pub async fn wait(&self) {
        loop {
            // The `Notified` future must be created before the count is
            // checked, otherwise a decrement landing between the check and
            // the subscription would be missed and `wait` would hang.
            let notified = self.inner.notify.notified();
            if self.inner.remaining.load(Ordering::SeqCst) <= 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("remaining", &self.remaining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_ids_are_unique() {
        assert_ne!(TraceId::new(), TraceId::new());
    }

    #[tokio::test]
    async fn completion_resolves_immediately_when_never_incremented() {
        let completion = Completion::new();
        completion.wait().await;
    }

    #[tokio::test]
    async fn completion_waits_for_every_decrement() {
        let completion = Completion::new();
        completion.increment();
        completion.increment();

        let waiter = completion.clone();
        let handle = tokio::spawn(async move {
            waiter.wait().await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!handle.is_finished());

        completion.decrement();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!handle.is_finished());

        completion.decrement();
        handle.await.expect("waiter task panicked");
    }
}
