//! Fixed-size footer at the end of every table file.
//!
//! ```text
//! meta-index offset: u64
//! meta-index size:   u64
//! index offset:      u64   (reserved, written as 0)
//! index size:        u64   (reserved, written as 0)
//! magic:             u64
//! ```
//!
//! The reserved index handle exists for framing compatibility with
//! block-based tables; this format locates its index through the meta-index
//! instead and always writes a null handle.

use super::{read_u64_le, BlockHandle, TABLE_MAGIC};
use crate::error::{Error, Result};

/// Footer size in bytes (fixed).
pub const FOOTER_LEN: usize = 40;

#[derive(Debug, Clone)]
pub struct Footer {
    pub meta_index: BlockHandle,
}

impl Footer {
    /// Encode the footer into its fixed 40-byte form.
    pub fn encode(&self) -> [u8; FOOTER_LEN] {
        let mut buf = [0u8; FOOTER_LEN];
        buf[0..8].copy_from_slice(&self.meta_index.offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.meta_index.size.to_le_bytes());
        // bytes 16..32: reserved null index handle
        buf[32..40].copy_from_slice(&TABLE_MAGIC.to_le_bytes());
        buf
    }

    /// Decode and validate a footer from the last [`FOOTER_LEN`] bytes of a
    /// file.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FOOTER_LEN {
            return Err(Error::corruption(format!(
                "footer too short: {} bytes, need {}",
                buf.len(),
                FOOTER_LEN
            )));
        }
        let buf = &buf[buf.len() - FOOTER_LEN..];
        let magic = read_u64_le(buf, 32);
        if magic != TABLE_MAGIC {
            return Err(Error::corruption(format!(
                "bad table magic: expected {TABLE_MAGIC:#018x}, got {magic:#018x}"
            )));
        }
        Ok(Footer {
            meta_index: BlockHandle {
                offset: read_u64_le(buf, 0),
                size: read_u64_le(buf, 8),
            },
        })
    }
}
