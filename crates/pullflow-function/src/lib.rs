#![forbid(unsafe_code)]
//! pullflow-function: user transforms and how they are invoked.
//!
//! - `def`: declared transform bodies (`FunctionDef`) and their validation.
//! - `library`: named collection of bodies that datasets resolve handles in.
//! - `executor`: the `FunctionExecutor` collaborator and `LocalExecutor`, an
//!   interpreter for the small built-in kernel set.
//! - `captured`: a function bound to captured buffers, instantiated once per
//!   consuming iterator, run blocking or asynchronously.
//! - `short_circuit`: static proof that a body only selects its inputs, plus
//!   the per-position move/copy plan used to skip invocation entirely.

pub mod captured;
pub mod context;
pub mod def;
pub mod error;
pub mod executor;
mod kernels;
pub mod library;
pub mod short_circuit;

pub use captured::{CapturedFunction, InstantiatedCapturedFunction};
pub use context::IteratorContext;
pub use def::{ArgDef, BodyNode, FunctionDef};
pub use error::{FunctionError, Result};
pub use executor::{FunctionExecutor, LocalExecutor};
pub use library::FunctionLibrary;
pub use short_circuit::{Analysis, SelectionPlan, ShortCircuitAnalyzer, Transfer};
