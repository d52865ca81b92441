//! Checkpoint store: frames, checksums and persists `Checkpoint`s.

use crate::codec::{self, Codec};
use crate::error::{CkptError, Result};
use crate::segment::{SegmentHeader, CHECKSUM_LEN, HEADER_LEN};
use crate::state::Checkpoint;
use crate::storage::Storage;

const DEFAULT_MAX_BYTES: u64 = 64 * 1024 * 1024;

/// Writes and reads named checkpoints under a root through a `Storage`.
///
/// Steps on save:
/// 1. Serialize the checkpoint with serde_json
/// 2. Compress payload with the configured codec
/// 3. Prepend a `SegmentHeader`
/// 4. Append a BLAKE3 checksum over header + payload
/// 5. Write to storage under `{root}/{name}.ckpt`
pub struct CheckpointStore {
    storage: Box<dyn Storage>,
    codec: Codec,
    root: String,
    max_bytes: u64,
}

impl CheckpointStore {
    pub fn new(storage: Box<dyn Storage>, codec: Codec, root: impl Into<String>) -> Self {
        Self {
            storage,
            codec,
            root: root.into().trim_end_matches('/').to_string(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    /// Cap on the decoded size of a checkpoint accepted by `load`.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}.ckpt", self.root, name)
    }

    /// Persist `ckpt` under `name`, replacing any previous checkpoint of that
    /// name. Returns the number of bytes written.
    pub fn save(&self, name: &str, ckpt: &Checkpoint) -> Result<usize> {
        let uncompressed =
            serde_json::to_vec(ckpt).map_err(|e| CkptError::Codec(format!("json serialize: {e}")))?;
        let compressed = codec::compress(self.codec, &uncompressed)?;

        let header = SegmentHeader::new(
            self.codec,
            uncompressed.len() as u64,
            compressed.len() as u64,
        );
        let header_bytes = header.to_bytes();

        let mut hasher = blake3::Hasher::new();
        hasher.update(&header_bytes);
        hasher.update(&compressed);
        let checksum: [u8; 32] = hasher.finalize().into();

        let mut blob = Vec::with_capacity(HEADER_LEN + compressed.len() + CHECKSUM_LEN);
        blob.extend_from_slice(&header_bytes);
        blob.extend_from_slice(&compressed);
        blob.extend_from_slice(&checksum);

        let key = self.key(name);
        self.storage.write(&key, &blob)?;

        tracing::debug!(
            key = %key,
            bytes = blob.len(),
            entries = ckpt.entries.len(),
            records = ckpt.manifest.records_produced,
            "saved checkpoint"
        );
        Ok(blob.len())
    }

    /// Read, verify and decode the checkpoint stored under `name`.
    pub fn load(&self, name: &str) -> Result<Checkpoint> {
        let key = self.key(name);
        let blob = self.storage.read(&key)?;

        if blob.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(CkptError::Storage("checkpoint blob too short".into()));
        }
        let (body, stored) = blob.split_at(blob.len() - CHECKSUM_LEN);

        let mut hasher = blake3::Hasher::new();
        hasher.update(body);
        let computed: [u8; 32] = hasher.finalize().into();
        if computed.as_slice() != stored {
            return Err(CkptError::ChecksumMismatch);
        }

        let header = SegmentHeader::from_bytes(&body[..HEADER_LEN])?;
        header.validate_sizes(self.max_bytes)?;
        let payload = &body[HEADER_LEN..];
        if payload.len() as u64 != header.compressed_len {
            return Err(CkptError::Storage(format!(
                "payload is {} bytes, header says {}",
                payload.len(),
                header.compressed_len
            )));
        }

        let uncompressed = codec::decompress(header.codec, payload)?;
        let ckpt: Checkpoint = serde_json::from_slice(&uncompressed)
            .map_err(|e| CkptError::Codec(format!("json deserialize: {e}")))?;

        tracing::debug!(key = %key, records = ckpt.manifest.records_produced, "loaded checkpoint");
        Ok(ckpt)
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        self.storage.exists(&self.key(name))
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        self.storage.delete(&self.key(name))
    }

    /// Names of all checkpoints under the root.
    pub fn list(&self) -> Result<Vec<String>> {
        let prefix = format!("{}/", self.root);
        Ok(self
            .storage
            .list(&prefix)?
            .into_iter()
            .filter_map(|k| {
                k.strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix(".ckpt"))
                    .map(str::to_string)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_storage::MemoryStorage;
    use crate::state::StateWriter;
    use crate::storage::FsStorage;
    use pullflow_core::hash::hash_str;
    use pullflow_core::manifest::CheckpointManifest;

    fn sample() -> Checkpoint {
        let mut w = StateWriter::new();
        w.write_i64("Iterator::Map::Range:next", 3);
        w.into_checkpoint(CheckpointManifest::new(hash_str("graph"), 3, 0))
    }

    #[test]
    fn save_then_load_in_memory() {
        let mem = MemoryStorage::new();
        let store = CheckpointStore::new(Box::new(mem.clone()), Codec::None, "mem");
        let ckpt = sample();

        store.save("run-a", &ckpt).unwrap();
        assert!(store.exists("run-a").unwrap());
        assert_eq!(store.load("run-a").unwrap(), ckpt);
        assert_eq!(store.list().unwrap(), vec!["run-a".to_string()]);

        store.delete("run-a").unwrap();
        assert!(matches!(store.load("run-a"), Err(CkptError::NotFound(_))));
    }

    #[test]
    fn corrupted_blob_fails_checksum() {
        let mem = MemoryStorage::new();
        let store = CheckpointStore::new(Box::new(mem.clone()), Codec::None, "mem");
        store.save("run-a", &sample()).unwrap();

        let mut blob = mem.read("mem/run-a.ckpt").unwrap();
        blob[HEADER_LEN + 2] ^= 0x55;
        mem.insert("mem/run-a.ckpt".into(), blob);

        assert!(matches!(store.load("run-a"), Err(CkptError::ChecksumMismatch)));
    }

    #[test]
    fn max_bytes_guards_decoding() {
        let store = CheckpointStore::new(Box::new(MemoryStorage::new()), Codec::None, "mem")
            .with_max_bytes(8);
        store.save("big", &sample()).unwrap();
        assert!(matches!(store.load("big"), Err(CkptError::Storage(_))));
    }

    #[test]
    fn save_then_load_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_string();
        let store = CheckpointStore::new(Box::new(FsStorage::new()), Codec::None, root);
        let ckpt = sample();
        store.save("disk", &ckpt).unwrap();
        assert_eq!(store.load("disk").unwrap(), ckpt);
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn lz4_round_trip() {
        let store = CheckpointStore::new(Box::new(MemoryStorage::new()), Codec::Lz4, "mem");
        let ckpt = sample();
        store.save("z", &ckpt).unwrap();
        assert_eq!(store.load("z").unwrap(), ckpt);
    }
}
