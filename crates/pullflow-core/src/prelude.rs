//! Convenient re-exports for downstream crates.

pub use crate::cancel::CancellationToken;
pub use crate::config::EngineConfig;
pub use crate::error::{Error, Result};
pub use crate::graph::{AttrValue, GraphBuilder, GraphDef, GraphDefBuilder, NodeDef, NodeRef};
pub use crate::hash::Hash256;
pub use crate::id::{InstanceId, NodeId};
pub use crate::manifest::{CheckpointId, CheckpointManifest};
pub use crate::schema::{DType, OutputSignature, PartialShape, TensorSpec};
pub use crate::types::{Buffer, Payload, Record};
