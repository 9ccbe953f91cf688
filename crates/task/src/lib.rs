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

//! A library for working with tasks.

pub mod labels;
pub mod supervisor;

pub use supervisor::{Supervisor, WorkerExit};
