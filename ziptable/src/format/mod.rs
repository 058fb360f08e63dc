//! On-disk table format: framing, named meta blocks, footer, properties.
//!
//! A table file is laid out as:
//!
//! ```text
//! [value-store data][dict][index][type array][common prefix]([range-del])
//! [properties][meta-index][Footer 40B]
//! ```
//!
//! The value-store data always starts at offset 0 and its extent is recorded
//! in the property block (`data_size`), not in the meta-index. Every other
//! block is located through the meta-index, which the fixed-size footer
//! points at.

pub mod footer;
pub mod meta_index;
pub mod properties;
pub mod type_array;
pub mod varint;

use memmap2::Mmap;
use std::ops::Range;
use std::sync::Arc;

/// Table magic number, stored in the footer.
pub const TABLE_MAGIC: u64 = 0x1122334455667788;

/// Meta-index name of the shared-dictionary block.
pub const VALUE_DICT_BLOCK: &str = "ValueDictBlock";
/// Meta-index name of the serialized succinct-trie index.
pub const INDEX_BLOCK: &str = "IndexBlock";
/// Meta-index name of the packed 2-bit record-type array.
pub const VALUE_TYPE_BLOCK: &str = "ValueTypeBlock";
/// Meta-index name of the raw common-prefix bytes.
pub const COMMON_PREFIX_BLOCK: &str = "CommonPrefixBlock";
/// Meta-index name of the optional range-tombstone block.
pub const RANGE_DEL_BLOCK: &str = "RangeDelBlock";
/// Meta-index name of the property block.
pub const PROPERTIES_BLOCK: &str = "PropertiesBlock";

/// Location of a block inside the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn as_range(&self) -> Range<usize> {
        self.offset as usize..(self.offset + self.size) as usize
    }
}

/// Shared backing memory for zero-copy structures.
///
/// The reader hands the same `TableBytes` to the trie, the value store, and
/// the type array; each keeps the handle plus a byte range, so all of them
/// drop together with the mapping. The builder uses the `Owned` form to load
/// the freshly serialized trie for the reorder pass.
#[derive(Clone)]
pub enum TableBytes {
    Mapped(Arc<Mmap>),
    Owned(Arc<Vec<u8>>),
}

impl TableBytes {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            TableBytes::Mapped(m) => m,
            TableBytes::Owned(v) => v,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn slice(&self, range: Range<usize>) -> &[u8] {
        &self.as_slice()[range]
    }
}

impl std::fmt::Debug for TableBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableBytes::Mapped(m) => write!(f, "TableBytes::Mapped({} bytes)", m.len()),
            TableBytes::Owned(v) => write!(f, "TableBytes::Owned({} bytes)", v.len()),
        }
    }
}

/// Read a little-endian `u64` at `pos` from a byte slice.
#[inline]
pub(crate) fn read_u64_le(bytes: &[u8], pos: usize) -> u64 {
    u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap())
}

/// Read a little-endian `u32` at `pos` from a byte slice.
#[inline]
pub(crate) fn read_u32_le(bytes: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap())
}
