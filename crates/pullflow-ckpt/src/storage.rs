//! Key-addressed blob storage for checkpoints.
//!
//! - `Storage`: the interface the checkpoint store writes through.
//! - `FsStorage`: local filesystem implementation (keys are paths).

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{CkptError, Result};

/// Abstract storage interface for checkpoint blobs.
pub trait Storage: Send + Sync {
    /// Write bytes to a key, replacing any previous value.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Read the full value stored under a key.
    fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete a key. Idempotent (no error if the key doesn't exist).
    fn delete(&self, key: &str) -> Result<()>;

    /// List all keys under a prefix, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Whether a key currently holds a value.
    fn exists(&self, key: &str) -> Result<bool>;
}

/// Local filesystem storage (rooted at current FS).
#[derive(Debug, Default)]
pub struct FsStorage;

impl FsStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Storage for FsStorage {
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let p = Path::new(key);
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).map_err(|e| CkptError::Storage(format!("mkparent: {e}")))?;
        }
        // Write to a sibling then rename so readers never see a torn blob.
        let tmp = format!("{key}.tmp");
        let mut f = File::create(&tmp).map_err(|e| CkptError::Storage(format!("create: {e}")))?;
        f.write_all(bytes)
            .map_err(|e| CkptError::Storage(format!("write: {e}")))?;
        f.sync_all()
            .map_err(|e| CkptError::Storage(format!("sync: {e}")))?;
        fs::rename(&tmp, p).map_err(|e| CkptError::Storage(format!("rename: {e}")))?;
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let mut f = File::open(Path::new(key)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CkptError::NotFound(key.to_string())
            } else {
                CkptError::Storage(format!("open: {e}"))
            }
        })?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)
            .map_err(|e| CkptError::Storage(format!("read: {e}")))?;
        Ok(buf)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let p = Path::new(key);
        if p.exists() {
            fs::remove_file(p).map_err(|e| CkptError::Storage(format!("delete: {e}")))?;
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix_path = Path::new(prefix);
        let mut results = Vec::new();

        if !prefix_path.exists() {
            return Ok(results);
        }

        if prefix_path.is_file() {
            if let Some(s) = prefix_path.to_str() {
                results.push(s.to_string());
            }
            return Ok(results);
        }

        fn visit_dirs(dir: &Path, results: &mut Vec<String>) -> std::io::Result<()> {
            if dir.is_dir() {
                for entry in fs::read_dir(dir)? {
                    let entry = entry?;
                    let path = entry.path();
                    if path.is_dir() {
                        visit_dirs(&path, results)?;
                    } else if let Some(s) = path.to_str() {
                        if !s.ends_with(".tmp") {
                            results.push(s.to_string());
                        }
                    }
                }
            }
            Ok(())
        }

        visit_dirs(prefix_path, &mut results)
            .map_err(|e| CkptError::Storage(format!("list: {e}")))?;
        results.sort();

        Ok(results)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(Path::new(key).is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_storage_write_read_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_string();
        let storage = FsStorage::new();

        let key = format!("{root}/a/state.ckpt");
        storage.write(&key, b"hello").unwrap();
        assert!(storage.exists(&key).unwrap());
        assert_eq!(storage.read(&key).unwrap(), b"hello");

        storage.write(&format!("{root}/a/other.ckpt"), b"x").unwrap();
        let listed = storage.list(&format!("{root}/a")).unwrap();
        assert_eq!(listed.len(), 2);

        storage.delete(&key).unwrap();
        assert!(!storage.exists(&key).unwrap());
        storage.delete(&key).unwrap();
    }

    #[test]
    fn fs_storage_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("nope").to_str().unwrap().to_string();
        assert!(matches!(FsStorage::new().read(&key), Err(CkptError::NotFound(_))));
    }
}
