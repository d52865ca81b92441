#![forbid(unsafe_code)]
//! pullflow-operators: lazy datasets and their iterators.
//!
//! Design intent:
//! - A `Dataset` is an immutable, `Arc`-shared description of a sequence; every
//!   `make_iterator` call returns an independent cursor.
//! - Iterators are pulled one record at a time and may be pulled from several
//!   threads at once (ordering is then unspecified).
//! - Iterator state is written under the iterator's prefix so a whole pipeline
//!   saves into one `StateWriter`.
//! - Every dataset can describe itself through a `GraphBuilder`; `registry`
//!   rebuilds an equivalent dataset from that description.

pub mod map;
pub mod registry;
pub mod source;
pub mod traits;

pub use map::{MapDataset, MapIterator};
pub use registry::{dataset_from_graph, graph_of};
pub use source::{RangeDataset, RecordsDataset};
pub use traits::{Dataset, DatasetIterator, Next, OpError};
