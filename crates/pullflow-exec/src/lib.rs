#![forbid(unsafe_code)]
//! pullflow-exec: drives dataset iterators to completion.
//!
//! The engine pulls one iterator sequentially (optionally from several
//! threads), hands records to a sink, and writes checkpoints bound to the
//! dataset's graph fingerprint so a later run can resume where this one
//! stopped.

pub mod failpoints;
pub mod metrics;
pub mod runtime;

pub use runtime::{Engine, ExecError, RunSummary};
