//! Checkpoint blob header.
//!
//! Layout in storage:
//! [ magic: u32 ][ version: u16 ][ codec: u8 ][ reserved: u8 ]
//! [ uncompressed_len: u64 ][ compressed_len: u64 ]
//! [ payload bytes … ][ blake3(header || payload): 32 bytes ]

use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::error::{CkptError, Result};

pub const MAGIC: u32 = 0x50464c57; // "PFLW"
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 4 + 2 + 1 + 1 + 8 + 8;
pub const CHECKSUM_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentHeader {
    pub magic: u32,
    pub version: u16,
    pub codec: Codec,
    pub uncompressed_len: u64,
    pub compressed_len: u64,
}

impl SegmentHeader {
    pub fn new(codec: Codec, uncompressed_len: u64, compressed_len: u64) -> Self {
        Self { magic: MAGIC, version: VERSION, codec, uncompressed_len, compressed_len }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.push(self.codec as u8);
        out.push(0u8); // reserved
        out.extend_from_slice(&self.uncompressed_len.to_le_bytes());
        out.extend_from_slice(&self.compressed_len.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(CkptError::Storage("short header".into()));
        }
        let magic = u32::from_le_bytes(fixed(&bytes[0..4])?);
        let version = u16::from_le_bytes(fixed(&bytes[4..6])?);
        let codec = Codec::from_u8(bytes[6])?;
        // bytes[7] reserved
        let uncompressed_len = u64::from_le_bytes(fixed(&bytes[8..16])?);
        let compressed_len = u64::from_le_bytes(fixed(&bytes[16..24])?);

        if magic != MAGIC || version != VERSION {
            return Err(CkptError::Storage("bad magic/version".into()));
        }

        Ok(Self { magic, version, codec, uncompressed_len, compressed_len })
    }

    /// Validate that the sizes in the header are reasonable.
    /// This prevents excessive allocations from corrupted data.
    pub fn validate_sizes(&self, max_uncompressed: u64) -> Result<()> {
        if self.uncompressed_len > max_uncompressed {
            return Err(CkptError::Storage(format!(
                "uncompressed_len {} exceeds max {}",
                self.uncompressed_len, max_uncompressed
            )));
        }
        if self.codec == Codec::None && self.compressed_len != self.uncompressed_len {
            return Err(CkptError::Storage(
                "uncompressed payload with differing lengths".into(),
            ));
        }
        Ok(())
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| CkptError::Storage(format!("expected {N} header bytes")))
}
