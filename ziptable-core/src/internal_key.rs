//! Internal-key layout: `user_key || packed(sequence, entry_type)`.
//!
//! The trailer is a fixed 8-byte little-endian `u64` packing a 56-bit sequence
//! number with an 8-bit entry-type tag:
//!
//! ```text
//! bits 63..8   sequence number (u56)
//! bits  7..0   entry type
//! ```
//!
//! User keys for the same logical key differ only in the trailer; a table
//! stores them contiguously with sequence numbers strictly descending.

use thiserror::Error;

/// 56-bit LSM sequence number, widened to `u64` in memory.
pub type SequenceNumber = u64;

/// Largest representable sequence number (56 bits).
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

/// Length of the packed `(sequence, entry_type)` trailer.
pub const INTERNAL_KEY_SUFFIX_LEN: usize = 8;

/// Errors from internal-key parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("internal key too short: {0} bytes, need >= 8")]
    TooShort(usize),

    #[error("unknown entry type tag: {0:#x}")]
    UnknownEntryType(u8),
}

/// Entry-type tag carried in the low byte of the packed trailer.
///
/// Values follow the LSM wire convention so externally built keys parse
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryType {
    /// Point deletion tombstone.
    Deletion = 0x0,
    /// Ordinary value.
    Value = 0x1,
    /// Merge operand; readers keep consuming older versions after one.
    Merge = 0x2,
    /// Range deletion; routed to the tombstone block, never to the key index.
    RangeDeletion = 0xF,
    /// Sentinel used for "not positioned" iterator states.
    MaxValue = 0x7F,
}

impl EntryType {
    pub fn from_u8(b: u8) -> Result<Self, KeyError> {
        match b {
            0x0 => Ok(EntryType::Deletion),
            0x1 => Ok(EntryType::Value),
            0x2 => Ok(EntryType::Merge),
            0xF => Ok(EntryType::RangeDeletion),
            0x7F => Ok(EntryType::MaxValue),
            other => Err(KeyError::UnknownEntryType(other)),
        }
    }
}

/// An internal key split into its parts. Borrows the user-key bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub entry_type: EntryType,
}

/// Pack a sequence number and entry type into the 8-byte trailer value.
#[inline]
pub fn pack_sequence_and_type(seq: SequenceNumber, t: EntryType) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE_NUMBER, "sequence exceeds 56 bits: {seq}");
    (seq << 8) | t as u64
}

/// Split a packed trailer value back into `(sequence, entry_type)`.
#[inline]
pub fn unpack_sequence_and_type(packed: u64) -> Result<(SequenceNumber, EntryType), KeyError> {
    let t = EntryType::from_u8(packed as u8)?;
    Ok((packed >> 8, t))
}

/// Parse an internal key into user key, sequence, and entry type.
pub fn parse_internal_key(ikey: &[u8]) -> Result<ParsedInternalKey<'_>, KeyError> {
    if ikey.len() < INTERNAL_KEY_SUFFIX_LEN {
        return Err(KeyError::TooShort(ikey.len()));
    }
    let split = ikey.len() - INTERNAL_KEY_SUFFIX_LEN;
    let packed = u64::from_le_bytes(ikey[split..].try_into().unwrap());
    let (sequence, entry_type) = unpack_sequence_and_type(packed)?;
    Ok(ParsedInternalKey {
        user_key: &ikey[..split],
        sequence,
        entry_type,
    })
}

/// Append `user_key || packed(sequence, entry_type)` to `buf`.
pub fn append_internal_key(buf: &mut Vec<u8>, user_key: &[u8], seq: SequenceNumber, t: EntryType) {
    buf.extend_from_slice(user_key);
    buf.extend_from_slice(&pack_sequence_and_type(seq, t).to_le_bytes());
}
