//! Shared vocabulary for the ziptable SST engine.
//!
//! This crate owns the pieces both the builder and the reader speak natively:
//! internal-key layout (user key + packed sequence/type trailer), entry types,
//! and the three supported user-key comparators. It has no I/O and no
//! knowledge of the on-disk table format.

pub mod comparator;
pub mod internal_key;

pub use comparator::{Comparator, ComparatorKind};
pub use internal_key::{
    append_internal_key, pack_sequence_and_type, parse_internal_key, unpack_sequence_and_type,
    EntryType, KeyError, ParsedInternalKey, SequenceNumber, INTERNAL_KEY_SUFFIX_LEN,
    MAX_SEQUENCE_NUMBER,
};
