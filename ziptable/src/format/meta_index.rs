//! Meta-index block: maps block names to `(offset, size)` handles.
//!
//! ```text
//! count: varint
//! For each entry: name_len: varint, name bytes, offset: u64, size: u64
//! ```

use super::varint::{read_varint, write_varint};
use super::BlockHandle;
use crate::error::{Error, Result};

/// Accumulates named block handles during a build, then serializes them.
#[derive(Default)]
pub struct MetaIndexBuilder {
    entries: Vec<(String, BlockHandle)>,
}

impl MetaIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, handle: BlockHandle) {
        self.entries.push((name.to_string(), handle));
    }

    pub fn finish(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_varint(self.entries.len() as u64, &mut buf);
        for (name, handle) in &self.entries {
            write_varint(name.len() as u64, &mut buf);
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(&handle.offset.to_le_bytes());
            buf.extend_from_slice(&handle.size.to_le_bytes());
        }
        buf
    }
}

/// Parsed meta-index.
#[derive(Debug)]
pub struct MetaIndex {
    entries: Vec<(String, BlockHandle)>,
}

impl MetaIndex {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let count = read_varint(buf, &mut pos)
            .map_err(|e| Error::corruption(format!("meta-index count: {e}")))?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name_len = read_varint(buf, &mut pos)
                .map_err(|e| Error::corruption(format!("meta-index name length: {e}")))?
                as usize;
            if pos + name_len + 16 > buf.len() {
                return Err(Error::corruption("meta-index truncated"));
            }
            let name = std::str::from_utf8(&buf[pos..pos + name_len])
                .map_err(|_| Error::corruption("meta-index name is not UTF-8"))?
                .to_string();
            pos += name_len;
            let offset = super::read_u64_le(buf, pos);
            let size = super::read_u64_le(buf, pos + 8);
            pos += 16;
            entries.push((name, BlockHandle { offset, size }));
        }
        Ok(MetaIndex { entries })
    }

    /// Handle of a named block, if present.
    pub fn find(&self, name: &str) -> Option<BlockHandle> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, h)| *h)
    }

    /// Handle of a required block; `Corruption` if absent.
    pub fn require(&self, name: &str) -> Result<BlockHandle> {
        self.find(name)
            .ok_or_else(|| Error::corruption(format!("meta-index is missing the {name} block")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_index_round_trip() {
        let mut builder = MetaIndexBuilder::new();
        builder.add("IndexBlock", BlockHandle { offset: 10, size: 20 });
        builder.add("ValueDictBlock", BlockHandle { offset: 30, size: 0 });
        let decoded = MetaIndex::decode(&builder.finish()).unwrap();
        assert_eq!(
            decoded.find("IndexBlock").unwrap(),
            BlockHandle { offset: 10, size: 20 }
        );
        assert_eq!(
            decoded.find("ValueDictBlock").unwrap(),
            BlockHandle { offset: 30, size: 0 }
        );
        assert!(decoded.find("RangeDelBlock").is_none());
        assert!(decoded.require("RangeDelBlock").is_err());
    }

    #[test]
    fn test_meta_index_truncated() {
        let mut builder = MetaIndexBuilder::new();
        builder.add("IndexBlock", BlockHandle { offset: 1, size: 2 });
        let bytes = builder.finish();
        assert!(MetaIndex::decode(&bytes[..bytes.len() - 3]).is_err());
    }
}
