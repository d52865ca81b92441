#![forbid(unsafe_code)]
//! pullflow-core: shared kernel for the pullflow dataflow engine.
//!
//! This crate contains only *pure* types, small helpers, and interfaces
//! (traits) that other crates implement. There is **no I/O** and **no async
//! runtime** here.
//!
//! Crates that use this:
//! - pullflow-ckpt: persists iterator state keyed by these ids and manifests.
//! - pullflow-function: binds transforms to captured `Buffer`s.
//! - pullflow-operators: implements datasets producing `Record`s that match an
//!   `OutputSignature`, and serializes them through `GraphBuilder`.
//! - pullflow-exec: drives iterators and emits checkpoints.

pub mod cancel;
pub mod config;
pub mod error;
pub mod graph;
pub mod hash;
pub mod id;
pub mod manifest;
pub mod prelude;
pub mod schema;
pub mod types;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
