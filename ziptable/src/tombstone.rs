//! Range-tombstone block: encoding on the build side, a detached shared
//! block plus iterator on the read side.
//!
//! Entries are `(start internal key, end user key)` pairs, LEB128
//! length-prefixed, in the order they were added (ascending start key):
//!
//! ```text
//! For each entry: varint start_len, start internal key,
//!                 varint end_len,   end user key
//! ```

use crate::error::{Error, Result};
use crate::format::varint::{read_varint, write_varint};
use std::sync::Arc;
use ziptable_core::{parse_internal_key, EntryType, SequenceNumber};

/// Append one range-deletion entry to a block under construction.
pub fn append_entry(block: &mut Vec<u8>, start_ikey: &[u8], end_key: &[u8]) {
    write_varint(start_ikey.len() as u64, block);
    block.extend_from_slice(start_ikey);
    write_varint(end_key.len() as u64, block);
    block.extend_from_slice(end_key);
}

/// Detached copy of a table's `RangeDelBlock`, shared by every iterator
/// handed out for it.
#[derive(Debug)]
pub struct RangeDelBlock {
    bytes: Vec<u8>,
    global_seqno: Option<SequenceNumber>,
}

impl RangeDelBlock {
    pub fn new(bytes: Vec<u8>, global_seqno: Option<SequenceNumber>) -> Self {
        RangeDelBlock {
            bytes,
            global_seqno,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One decoded range tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTombstone {
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    pub sequence: SequenceNumber,
}

/// Streaming iterator over a detached tombstone block. The table's global
/// sequence number, when present, overrides per-entry sequence numbers.
pub struct RangeTombstoneIter {
    block: Arc<RangeDelBlock>,
    pos: usize,
}

impl RangeTombstoneIter {
    pub fn new(block: Arc<RangeDelBlock>) -> Self {
        RangeTombstoneIter { block, pos: 0 }
    }
}

impl Iterator for RangeTombstoneIter {
    type Item = Result<RangeTombstone>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.block.bytes.len() {
            return None;
        }
        Some(self.decode_next())
    }
}

impl RangeTombstoneIter {
    fn decode_next(&mut self) -> Result<RangeTombstone> {
        let bytes = &self.block.bytes;
        let mut pos = self.pos;
        let take = |pos: &mut usize, what: &str| -> Result<Vec<u8>> {
            let len = read_varint(bytes, pos)
                .map_err(|e| Error::corruption(format!("tombstone block: {e}")))?
                as usize;
            if *pos + len > bytes.len() {
                return Err(Error::corruption(format!(
                    "tombstone block: {what} truncated"
                )));
            }
            let out = bytes[*pos..*pos + len].to_vec();
            *pos += len;
            Ok(out)
        };
        let start_ikey = take(&mut pos, "start key")?;
        let end_key = take(&mut pos, "end key")?;
        self.pos = pos;

        let parsed = parse_internal_key(&start_ikey)
            .map_err(|e| Error::corruption(format!("tombstone block: {e}")))?;
        if parsed.entry_type != EntryType::RangeDeletion {
            return Err(Error::corruption(format!(
                "tombstone block: unexpected entry type {:?}",
                parsed.entry_type
            )));
        }
        Ok(RangeTombstone {
            start_key: parsed.user_key.to_vec(),
            sequence: self.block.global_seqno.unwrap_or(parsed.sequence),
            end_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ziptable_core::append_internal_key;

    fn ikey(user: &[u8], seq: u64) -> Vec<u8> {
        let mut k = Vec::new();
        append_internal_key(&mut k, user, seq, EntryType::RangeDeletion);
        k
    }

    #[test]
    fn test_round_trip() {
        let mut block = Vec::new();
        append_entry(&mut block, &ikey(b"a", 10), b"c");
        append_entry(&mut block, &ikey(b"m", 12), b"q");
        let iter = RangeTombstoneIter::new(Arc::new(RangeDelBlock::new(block, None)));
        let got: Vec<RangeTombstone> = iter.map(|t| t.unwrap()).collect();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].start_key, b"a");
        assert_eq!(got[0].end_key, b"c");
        assert_eq!(got[0].sequence, 10);
        assert_eq!(got[1].start_key, b"m");
        assert_eq!(got[1].sequence, 12);
    }

    #[test]
    fn test_global_seqno_overrides() {
        let mut block = Vec::new();
        append_entry(&mut block, &ikey(b"a", 10), b"c");
        let iter = RangeTombstoneIter::new(Arc::new(RangeDelBlock::new(block, Some(99))));
        let got: Vec<RangeTombstone> = iter.map(|t| t.unwrap()).collect();
        assert_eq!(got[0].sequence, 99);
    }

    #[test]
    fn test_truncated_block() {
        let mut block = Vec::new();
        append_entry(&mut block, &ikey(b"a", 10), b"c");
        block.truncate(block.len() - 1);
        let mut iter = RangeTombstoneIter::new(Arc::new(RangeDelBlock::new(block, None)));
        assert!(iter.next().unwrap().is_err());
    }
}
