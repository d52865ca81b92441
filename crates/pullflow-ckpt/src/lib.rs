#![forbid(unsafe_code)]
//! pullflow-ckpt: iterator checkpoint state and its persistence.
//!
//! Iterators write their positional state into a key-addressed `StateWriter`
//! and read it back from a `StateReader`. A `CheckpointStore` frames that state
//! with a header and a blake3 checksum (optionally compressed) and hands the
//! bytes to a `Storage` backend: `MemoryStorage` for tests, `FsStorage` for
//! local disk.

pub mod codec;
pub mod error;
pub mod memory_storage;
pub mod segment;
pub mod state;
pub mod storage;
pub mod store;

pub use codec::Codec;
pub use error::{CkptError, Result};
pub use memory_storage::MemoryStorage;
pub use state::{Checkpoint, StateReader, StateValue, StateWriter};
pub use storage::{FsStorage, Storage};
pub use store::CheckpointStore;
