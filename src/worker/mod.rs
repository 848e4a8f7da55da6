//! Engine behind the `precomp-worker` executable.
//!
//! Each group of items that share a declaring source becomes one generated
//! harness crate, compiled with `rustc` and run once.

pub mod harness;
pub mod runner;

pub use runner::{HarnessRunner, run_files};
