//! Pluggable SST format for LSM engines: a succinct-trie key index, a
//! dictionary-compressed value store, and a packed per-record type array,
//! bound by one shared record-id space.
//!
//! Two roles are exported. [`TableBuilder`] consumes a strictly ascending
//! stream of internal-key/value pairs and emits one immutable file.
//! [`TableReader`] memory-maps such a file and serves point lookups,
//! forward/reverse/uint64 iteration, and range-tombstone enumeration, with
//! the index and value store reading zero-copy out of the map.

pub mod builder;
pub mod config;
pub mod error;
pub mod format;
pub mod index;
pub mod read;
pub mod store;
pub mod tombstone;

pub use builder::TableBuilder;
pub use config::{CompressionProbe, CompressionStats, OsFileCache, ReadEnv, TableOptions};
pub use error::{Error, Result};
pub use format::properties::TableProperties;
pub use format::type_array::ZipValueType;
pub use read::iter::TableIterator;
pub use read::{GetContext, TableReader};
pub use tombstone::{RangeTombstone, RangeTombstoneIter};

pub use ziptable_core::{
    Comparator, ComparatorKind, EntryType, ParsedInternalKey, SequenceNumber,
};
