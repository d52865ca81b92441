//! Key-addressed iterator state.
//!
//! Iterators name their entries with their own prefix (`full_key`) so a whole
//! pipeline can save into one writer without collisions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use pullflow_core::manifest::CheckpointManifest;

use crate::error::{CkptError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateValue {
    I64(i64),
    Bool(bool),
    Str(String),
}

/// Entry name scoped under an iterator prefix.
pub fn full_key(prefix: &str, name: &str) -> String {
    format!("{prefix}:{name}")
}

#[derive(Debug, Default, Clone)]
pub struct StateWriter {
    entries: BTreeMap<String, StateValue>,
}

impl StateWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_i64(&mut self, key: impl Into<String>, v: i64) {
        self.entries.insert(key.into(), StateValue::I64(v));
    }

    pub fn write_bool(&mut self, key: impl Into<String>, v: bool) {
        self.entries.insert(key.into(), StateValue::Bool(v));
    }

    pub fn write_str(&mut self, key: impl Into<String>, v: impl Into<String>) {
        self.entries.insert(key.into(), StateValue::Str(v.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reader over what has been written so far (in-process save/restore).
    pub fn to_reader(&self) -> StateReader {
        StateReader {
            entries: self.entries.clone(),
        }
    }

    pub fn into_checkpoint(self, manifest: CheckpointManifest) -> Checkpoint {
        Checkpoint {
            manifest,
            entries: self.entries,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct StateReader {
    entries: BTreeMap<String, StateValue>,
}

impl StateReader {
    pub fn from_checkpoint(ckpt: &Checkpoint) -> Self {
        Self {
            entries: ckpt.entries.clone(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn get(&self, key: &str) -> Result<&StateValue> {
        self.entries
            .get(key)
            .ok_or_else(|| CkptError::MissingKey(key.to_string()))
    }

    pub fn read_i64(&self, key: &str) -> Result<i64> {
        match self.get(key)? {
            StateValue::I64(v) => Ok(*v),
            _ => Err(CkptError::WrongType {
                key: key.to_string(),
                expected: "an i64",
            }),
        }
    }

    pub fn read_bool(&self, key: &str) -> Result<bool> {
        match self.get(key)? {
            StateValue::Bool(v) => Ok(*v),
            _ => Err(CkptError::WrongType {
                key: key.to_string(),
                expected: "a bool",
            }),
        }
    }

    pub fn read_str(&self, key: &str) -> Result<&str> {
        match self.get(key)? {
            StateValue::Str(v) => Ok(v),
            _ => Err(CkptError::WrongType {
                key: key.to_string(),
                expected: "a string",
            }),
        }
    }
}

/// Manifest plus every entry written by a pipeline's iterators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub manifest: CheckpointManifest,
    pub entries: BTreeMap<String, StateValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_reads_check_presence_and_type() {
        let mut w = StateWriter::new();
        w.write_i64(full_key("Iterator::Range", "next"), 4);
        w.write_bool("flag", true);
        w.write_str("name", "range");
        let r = w.to_reader();

        assert_eq!(r.read_i64("Iterator::Range:next").unwrap(), 4);
        assert!(r.read_bool("flag").unwrap());
        assert_eq!(r.read_str("name").unwrap(), "range");
        assert!(matches!(r.read_i64("missing"), Err(CkptError::MissingKey(_))));
        assert!(matches!(r.read_i64("flag"), Err(CkptError::WrongType { .. })));
    }
}
