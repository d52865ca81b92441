//! Checkpoint manifest for audit/resume.
//!
//! Every persisted checkpoint carries one. The fingerprint binds it to the
//! structural description of the dataset it was taken from, so state is only
//! restored into an equivalent pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Hash256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(pub Uuid);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub id: CheckpointId,

    /// `GraphDef::fingerprint` of the dataset the iterator was created from.
    pub dataset_fingerprint: Hash256,

    /// Engine version string for provenance.
    pub engine_version: String,

    /// Records produced by the iterator when the checkpoint was taken.
    pub records_produced: u64,

    /// Whether the iterator had already reached end of sequence.
    pub exhausted: bool,

    /// Milliseconds since Unix epoch (UTC).
    pub created_ms: u64,
}

impl CheckpointManifest {
    pub fn new(dataset_fingerprint: Hash256, records_produced: u64, created_ms: u64) -> Self {
        Self {
            id: CheckpointId(Uuid::new_v4()),
            dataset_fingerprint,
            engine_version: crate::VERSION.to_string(),
            records_produced,
            exhausted: false,
            created_ms,
        }
    }

    pub fn mark_exhausted(mut self) -> Self {
        self.exhausted = true;
        self
    }
}
