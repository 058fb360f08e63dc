//! Packed 2-bit record-type array.
//!
//! One entry per record id describes how the record's payload decomposes
//! into versioned entries. The block is `ceil(2 * num_records / 8)` bytes;
//! entry `i` occupies bits `2i..2i+2` of the little-endian bit stream.

use super::TableBytes;
use crate::error::{Error, Result};
use std::ops::Range;

/// How a record's payload decomposes. Wire values are the 2-bit on-disk tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ZipValueType {
    /// One Value version at sequence 0; payload is the raw value.
    ZeroSeq = 0,
    /// One Deletion tombstone; payload is a 7-byte sequence number.
    Delete = 1,
    /// One Value version; payload is a 7-byte sequence number + value.
    Value = 2,
    /// Two or more versions; payload is an offset-table header + entries.
    Multi = 3,
}

impl ZipValueType {
    /// Decode a 2-bit wire tag. Inputs outside `0..=3` indicate a caller bug
    /// (the array hands out masked bits only) and terminate the process.
    #[inline]
    pub fn from_bits(bits: u8) -> Self {
        match bits {
            0 => ZipValueType::ZeroSeq,
            1 => ZipValueType::Delete,
            2 => ZipValueType::Value,
            3 => ZipValueType::Multi,
            other => unreachable!("2-bit value type out of range: {other}"),
        }
    }
}

/// Build-side owned array.
pub struct TypeArrayBuilder {
    bytes: Vec<u8>,
    num_records: usize,
}

impl TypeArrayBuilder {
    pub fn new(num_records: usize) -> Self {
        TypeArrayBuilder {
            bytes: vec![0u8; num_records.div_ceil(4)],
            num_records,
        }
    }

    #[inline]
    pub fn set(&mut self, idx: usize, t: ZipValueType) {
        debug_assert!(idx < self.num_records);
        let byte = idx / 4;
        let shift = (idx % 4) * 2;
        self.bytes[byte] = (self.bytes[byte] & !(0b11 << shift)) | ((t as u8) << shift);
    }

    #[inline]
    pub fn get(&self, idx: usize) -> ZipValueType {
        debug_assert!(idx < self.num_records);
        ZipValueType::from_bits((self.bytes[idx / 4] >> ((idx % 4) * 2)) & 0b11)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Read-side view aliasing the mapped file.
///
/// An empty view (zero-length block) reports every record as `ZeroSeq`,
/// which is how files written without a type block behave.
#[derive(Debug)]
pub struct TypeArrayView {
    mem: TableBytes,
    range: Range<usize>,
    num_records: usize,
}

impl TypeArrayView {
    /// View over a type block. `range` may be empty.
    pub fn load(mem: TableBytes, range: Range<usize>, num_records: usize) -> Result<Self> {
        let len = range.len();
        if len != 0 && len < num_records.div_ceil(4) {
            return Err(Error::corruption(format!(
                "type block too small: {len} bytes for {num_records} records"
            )));
        }
        Ok(TypeArrayView {
            mem,
            range,
            num_records,
        })
    }

    pub fn empty(mem: TableBytes) -> Self {
        TypeArrayView {
            mem,
            range: 0..0,
            num_records: 0,
        }
    }

    #[inline]
    pub fn get(&self, idx: usize) -> ZipValueType {
        if self.range.is_empty() {
            return ZipValueType::ZeroSeq;
        }
        debug_assert!(idx < self.num_records);
        let bytes = self.mem.slice(self.range.clone());
        ZipValueType::from_bits((bytes[idx / 4] >> ((idx % 4) * 2)) & 0b11)
    }
}
