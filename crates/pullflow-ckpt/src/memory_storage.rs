//! In-memory storage backend.
//!
//! Provides a HashMap-based storage that implements the Storage trait.
//! Used for `memory://` checkpoint URIs and in tests to avoid file I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{CkptError, Result};
use crate::storage::Storage;

/// Thread-safe in-memory storage. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the number of stored objects
    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Overwrite raw bytes under a key (used by tests to corrupt blobs).
    pub fn insert(&self, key: String, bytes: Vec<u8>) {
        self.data().insert(key, bytes);
    }
}

impl Storage for MemoryStorage {
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.data().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.data()
            .get(key)
            .cloned()
            .ok_or_else(|| CkptError::NotFound(key.to_string()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.data().remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut result: Vec<String> = self
            .data()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        result.sort();
        Ok(result)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.data().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_write_read() {
        let storage = MemoryStorage::new();
        storage.write("ckpt/a", b"hello world").unwrap();
        assert_eq!(storage.read("ckpt/a").unwrap(), b"hello world");
        assert!(matches!(storage.read("ckpt/b"), Err(CkptError::NotFound(_))));
    }

    #[test]
    fn test_memory_storage_list_is_sorted_and_prefixed() {
        let storage = MemoryStorage::new();
        storage.write("dir/2", b"2").unwrap();
        storage.write("dir/1", b"1").unwrap();
        storage.write("other/3", b"3").unwrap();

        assert_eq!(storage.list("dir/").unwrap(), vec!["dir/1", "dir/2"]);
    }

    #[test]
    fn test_memory_storage_clones_share_data() {
        let storage = MemoryStorage::new();
        let alias = storage.clone();
        storage.write("k", b"v").unwrap();
        assert!(alias.exists("k").unwrap());
        alias.delete("k").unwrap();
        assert!(storage.is_empty());
    }
}
