#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results,
    variant_size_differences
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! A library for building **dataflow graphs**: a collection of named
//! [`node::Node`]s, each holding a transform function, wired together by
//! directed edges. A [`engine::Manager`] owns the graph plus the worker pool
//! that drives it, and exposes a small runtime API (`invoke`, `batch_invoke`,
//! `gather`, `resize`) for feeding payloads in and collecting results out.
//!
//! A node's transform maps one input payload to a map of `edge name ->
//! Option<payload>`. Mapping an edge to `None` suppresses that emission
//! entirely; this is how a node expresses "nothing to send here" without a
//! sentinel value. Edges between two graph-owned nodes are internal and
//! named `"{from}_to_{to}_{label}"`; an edge exposed to the caller via
//! [`engine::Manager::output`] is named directly by its label and returns a
//! receiver the caller reads from.
//!
//! Packets carry a [`packet::TraceId`] end to end and, for packets submitted
//! through `invoke`/`batch_invoke`, an optional [`packet::Completion`]
//! counter that reaches zero once every output the packet produced has
//! either been delivered to the caller or discarded.

pub use config;
pub use engine;
pub use node;
pub use packet;
pub use task;
