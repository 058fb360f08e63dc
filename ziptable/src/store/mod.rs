//! Dictionary-compressed value store.
//!
//! Records are zstd-compressed against one shared dictionary, so any single
//! record decompresses independently. The store's serialized form is the
//! table's data region (file offset 0):
//!
//! ```text
//! magic "ZVS1" (4B) | version u8 | reserved 3B
//! num_records: u64
//! payload_len: u64
//! tables_digest: u64          (xxh64 of the offset + digest tables)
//! offsets:   (num_records + 1) x u64   (relative to payload start)
//! digests:   num_records x u64         (xxh64 of each compressed record)
//! payload:   concatenated compressed records
//! ```
//!
//! The dictionary itself lives in the separate `ValueDictBlock` and is handed
//! to [`Store::load`] once; records reference it implicitly.

pub mod builder;
pub mod reader;

pub use builder::StoreBuilder;
pub use reader::Store;

pub(crate) const STORE_MAGIC: [u8; 4] = *b"ZVS1";
pub(crate) const STORE_VERSION: u8 = 1;
pub(crate) const STORE_HEADER_LEN: usize = 32;

/// zstd level for record compression; matches the level the rest of the
/// stack writes blobs with.
pub(crate) const ZSTD_LEVEL: i32 = 3;

/// Sample injected when a build collected none, so the dictionary is never
/// empty.
pub(crate) const FALLBACK_DICT_SAMPLE: &[u8] = b"ziptable dictionary seed sample";
