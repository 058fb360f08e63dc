//! Table reader: open sequence, point lookups, iterator construction.
//!
//! A reader is immutable after `open` and safe to share across threads;
//! iterators are per-consumer. All subordinate structures (trie, value
//! store, type array) alias the reader's single memory map through shared
//! [`TableBytes`] handles.

pub mod iter;

use crate::config::{ReadEnv, TableOptions};
use crate::error::{Error, Result};
use crate::format::footer::{Footer, FOOTER_LEN};
use crate::format::meta_index::MetaIndex;
use crate::format::properties::{TableProperties, PROP_BUILD_TIMESTAMP};
use crate::format::type_array::{TypeArrayView, ZipValueType};
use crate::format::{
    read_u32_le, BlockHandle, TableBytes, COMMON_PREFIX_BLOCK, INDEX_BLOCK, PROPERTIES_BLOCK,
    RANGE_DEL_BLOCK, VALUE_DICT_BLOCK, VALUE_TYPE_BLOCK,
};
use crate::index::LoudsTrie;
use crate::store::Store;
use crate::tombstone::{RangeDelBlock, RangeTombstoneIter};
use iter::{KeyCodec, TableIterator, ZipTableIter};
use memmap2::{Advice, Mmap};
use std::cell::RefCell;
use std::fs::File;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;
use ziptable_core::{
    comparator::uint64_key_to_index, parse_internal_key, Comparator, ComparatorKind, EntryType,
    ParsedInternalKey, SequenceNumber,
};

/// Receives the versions a point lookup surfaces, newest first. Returning
/// `true` asks for older versions as well; only merge chains do.
pub trait GetContext {
    fn save_value(&mut self, key: &ParsedInternalKey<'_>, value: &[u8]) -> bool;
}

/// Releases the point-get scratch buffer when it has grown past this bound.
const SCRATCH_RELEASE_LEN: usize = 512 * 1024;

thread_local! {
    static GET_SCRATCH: RefCell<Vec<u8>> = RefCell::new(Vec::new());
}

#[derive(Debug)]
pub struct TableReader {
    file: Arc<File>,
    file_size: u64,
    props: TableProperties,
    comparator: Comparator,
    global_seqno: Option<SequenceNumber>,
    pub(crate) trie: LoudsTrie,
    pub(crate) store: Store,
    pub(crate) types: TypeArrayView,
    pub(crate) common_prefix: Vec<u8>,
    tombstone: Option<Arc<RangeDelBlock>>,
    store_use_pread: bool,
    cache: Option<(Arc<crate::config::OsFileCache>, u64)>,
}

impl TableReader {
    /// Open a finished table. `comparator` is the enclosing engine's user
    /// comparator and must match the one the file was built with.
    pub fn open(
        file: File,
        opts: &TableOptions,
        env: &ReadEnv,
        comparator: &Comparator,
    ) -> Result<TableReader> {
        if !env.use_mmap_reads {
            return Err(Error::invalid(
                "this table format requires mmap reads; set ReadEnv::use_mmap_reads",
            ));
        }
        let file_size = file.metadata()?.len();
        if (file_size as usize) < FOOTER_LEN {
            return Err(Error::corruption(format!(
                "file too small for a table: {file_size} bytes"
            )));
        }
        let mmap = Arc::new(unsafe { Mmap::map(&file)? });
        let mem = TableBytes::Mapped(Arc::clone(&mmap));

        // 1. Footer and meta-index.
        let footer = Footer::decode(mem.as_slice())?;
        let meta_range = checked_range(&mem, footer.meta_index)?;
        let meta = MetaIndex::decode(mem.slice(meta_range))?;

        // 2. Properties; validate the comparator before touching anything
        //    order-dependent.
        let props_range = checked_range(&mem, meta.require(PROPERTIES_BLOCK)?)?;
        let props = TableProperties::decode(mem.slice(props_range))?;
        if Comparator::from_name(&props.comparator_name).is_none() {
            return Err(Error::invalid(format!(
                "unsupported comparator: {}",
                props.comparator_name
            )));
        }
        if props.comparator_name != comparator.name() {
            return Err(Error::invalid(format!(
                "comparator mismatch: table needs {}, got {}",
                props.comparator_name,
                comparator.name()
            )));
        }
        if props.data_size > file_size {
            return Err(Error::corruption("data_size exceeds the file"));
        }

        // 3. Global sequence number and the compression probe.
        let global_seqno = props.global_sequence_number();
        if opts.enable_compression_probe {
            if let (Some(probe), Some(ts)) = (
                &env.compression_probe,
                props.user_collected.get(PROP_BUILD_TIMESTAMP),
            ) {
                let ts = std::str::from_utf8(ts)
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(0);
                probe.update(
                    ts,
                    props.raw_value_size,
                    props.data_size,
                    props.raw_key_size + props.raw_value_size,
                    file_size,
                );
            }
        }

        // 4. Common prefix; absent means an old file revision.
        let common_prefix = match meta.find(COMMON_PREFIX_BLOCK) {
            Some(handle) => mem.slice(checked_range(&mem, handle)?).to_vec(),
            None => {
                tracing::warn!("table has no {COMMON_PREFIX_BLOCK}; treating as empty prefix");
                Vec::new()
            }
        };

        // 5. Detach the tombstone block and drop its mapped pages.
        let tombstone = match meta.find(RANGE_DEL_BLOCK) {
            Some(handle) => {
                let range = checked_range(&mem, handle)?;
                let bytes = mem.slice(range.clone()).to_vec();
                // read-only file-backed map: dropping these pages only means
                // refetching them from disk
                let _ = unsafe {
                    mmap.unchecked_advise_range(
                        memmap2::UncheckedAdvice::DontNeed,
                        range.start,
                        range.len(),
                    )
                };
                Some(Arc::new(RangeDelBlock::new(bytes, global_seqno)))
            }
            None => None,
        };

        // 6. Value store and index, zero-copy over the map.
        let dict_range = checked_range(&mem, meta.require(VALUE_DICT_BLOCK)?)?;
        let store = Store::load(
            mem.clone(),
            0..props.data_size as usize,
            mem.slice(dict_range),
        )?;
        let index_range = checked_range(&mem, meta.require(INDEX_BLOCK)?)?;
        let mut trie = LoudsTrie::load(mem.clone(), index_range.clone())?;
        if store.num_records() != trie.num_keys() {
            return Err(Error::corruption(format!(
                "index has {} keys but the value store has {} records",
                trie.num_keys(),
                store.num_records()
            )));
        }
        let types = match meta.find(VALUE_TYPE_BLOCK) {
            Some(handle) => {
                TypeArrayView::load(mem.clone(), checked_range(&mem, handle)?, trie.num_keys())?
            }
            None => TypeArrayView::empty(mem.clone()),
        };

        // 7. Store access mode: pread when records are small on average.
        let num_records = store.num_records();
        let store_use_pread = match opts.min_pread_len {
            n if n < 0 => false,
            0 => true,
            n => store.mmap_len() < n as usize * num_records,
        };
        let file = Arc::new(file);
        let cache = match (&env.file_cache, store_use_pread) {
            (Some(cache), true) => {
                let token = cache.register(Arc::clone(&file));
                Some((Arc::clone(cache), token))
            }
            _ => None,
        };

        // 8. Page warm-up and access advice.
        let t0 = Instant::now();
        if opts.warm_up_index_on_open {
            warm_up(&mmap, index_range.clone());
            if !opts.warm_up_value_on_open {
                warm_up(&mmap, store.tables_extent());
            }
        }
        if opts.warm_up_value_on_open && !store_use_pread {
            warm_up(&mmap, store.extent());
        } else if opts.advise_random_read || env.advise_random_on_open {
            let extent = store.extent();
            let _ = mmap.advise_range(Advice::Random, extent.start, extent.len());
        }
        let warm_time = t0.elapsed();
        let t1 = Instant::now();
        trie.build_cache(opts.index_cache_ratio);
        let cache_time = t1.elapsed();

        tracing::info!(
            file_size,
            entries = props.num_entries,
            keys = trie.num_keys(),
            index_size = props.index_size,
            value_size = props.data_size,
            warm_up_ms = warm_time.as_millis() as u64,
            build_cache_ms = cache_time.as_millis() as u64,
            "table opened"
        );

        Ok(TableReader {
            file,
            file_size,
            props,
            comparator: comparator.clone(),
            global_seqno,
            trie,
            store,
            types,
            common_prefix,
            tombstone,
            store_use_pread,
            cache,
        })
    }

    pub fn properties(&self) -> &TableProperties {
        &self.props
    }

    pub fn comparator(&self) -> &Comparator {
        &self.comparator
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn num_keys(&self) -> usize {
        self.trie.num_keys()
    }

    /// Effective sequence number reported for `ZeroSeq` records.
    pub(crate) fn effective_global_seqno(&self) -> SequenceNumber {
        self.global_seqno.unwrap_or(0)
    }

    /// Read one record into `buf` (append), via mmap or pread per the open
    /// decision.
    pub(crate) fn read_record_append(&self, rec_id: usize, buf: &mut Vec<u8>) -> Result<()> {
        if self.store_use_pread {
            let file = self
                .cache
                .as_ref()
                .and_then(|(cache, token)| cache.get(*token))
                .unwrap_or_else(|| Arc::clone(&self.file));
            self.store.pread_record_append(&file, rec_id, buf)
        } else {
            self.store.get_record_append(rec_id, buf)
        }
    }

    // ------------------------------------------------------------------
    // Point lookup
    // ------------------------------------------------------------------

    /// Look up `ikey` and hand every visible version to `ctx`, newest
    /// first. A missing key is not an error: `ctx` simply sees nothing.
    pub fn get(&self, ikey: &[u8], ctx: &mut dyn GetContext) -> Result<()> {
        let pik = parse_internal_key(ikey)?;

        let swapped: [u8; 8];
        let lookup_key: &[u8] = if self.comparator.kind() == ComparatorKind::Uint64 {
            let raw: [u8; 8] = pik
                .user_key
                .try_into()
                .map_err(|_| Error::invalid("uint64 comparator requires 8-byte user keys"))?;
            swapped = uint64_key_to_index(&raw);
            &swapped
        } else {
            pik.user_key
        };

        let cplen = common_prefix_len(lookup_key, &self.common_prefix);
        if cplen != self.common_prefix.len() {
            return Ok(());
        }
        let Some(rec_id) = self.trie.find(&lookup_key[cplen..]) else {
            return Ok(());
        };

        GET_SCRATCH.with(|cell| {
            let mut buf = cell.borrow_mut();
            buf.clear();
            let result = self.get_record_versions(&pik, rec_id, &mut buf, ctx);
            if buf.capacity() > SCRATCH_RELEASE_LEN {
                *buf = Vec::new();
            }
            result
        })
    }

    fn get_record_versions(
        &self,
        pik: &ParsedInternalKey<'_>,
        rec_id: usize,
        buf: &mut Vec<u8>,
        ctx: &mut dyn GetContext,
    ) -> Result<()> {
        match self.types.get(rec_id) {
            ZipValueType::ZeroSeq => {
                self.read_record_append(rec_id, buf)?;
                ctx.save_value(
                    &ParsedInternalKey {
                        user_key: pik.user_key,
                        sequence: self.effective_global_seqno(),
                        entry_type: EntryType::Value,
                    },
                    buf,
                );
            }
            ZipValueType::Value => {
                self.read_record_append(rec_id, buf)?;
                let seq = decode_seq7(buf, rec_id)?;
                if seq <= pik.sequence {
                    ctx.save_value(
                        &ParsedInternalKey {
                            user_key: pik.user_key,
                            sequence: seq,
                            entry_type: EntryType::Value,
                        },
                        &buf[7..],
                    );
                }
            }
            ZipValueType::Delete => {
                self.read_record_append(rec_id, buf)?;
                let seq = decode_seq7(buf, rec_id)?;
                if seq <= pik.sequence {
                    ctx.save_value(
                        &ParsedInternalKey {
                            user_key: pik.user_key,
                            sequence: seq,
                            entry_type: EntryType::Deletion,
                        },
                        &[],
                    );
                }
            }
            ZipValueType::Multi => {
                self.read_record_append(rec_id, buf)?;
                let multi = MultiRecord::parse(buf, rec_id)?;
                for i in 0..multi.num {
                    let entry = multi.entry(buf, i, rec_id)?;
                    let (seq, etype) = decode_entry_head(entry, rec_id)?;
                    if seq <= pik.sequence {
                        let more = ctx.save_value(
                            &ParsedInternalKey {
                                user_key: pik.user_key,
                                sequence: seq,
                                entry_type: etype,
                            },
                            &entry[8..],
                        );
                        if !more {
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Iterators and tombstones
    // ------------------------------------------------------------------

    /// New iterator in the comparator's forward order. One iterator per
    /// consumer; iterators are not thread-safe.
    pub fn new_iterator(&self) -> Box<dyn TableIterator + '_> {
        match self.comparator.kind() {
            ComparatorKind::Uint64 => {
                Box::new(ZipTableIter::<false>::new(self, KeyCodec::Uint64Swap))
            }
            ComparatorKind::ReverseBytewise => {
                Box::new(ZipTableIter::<true>::new(self, KeyCodec::Plain))
            }
            ComparatorKind::Bytewise => Box::new(ZipTableIter::<false>::new(self, KeyCodec::Plain)),
        }
    }

    /// Iterator over the table's range tombstones, or `None` when it has no
    /// tombstone block.
    pub fn new_range_tombstone_iterator(&self) -> Option<RangeTombstoneIter> {
        self.tombstone
            .as_ref()
            .map(|block| RangeTombstoneIter::new(Arc::clone(block)))
    }
}

impl Drop for TableReader {
    fn drop(&mut self) {
        if let Some((cache, token)) = &self.cache {
            cache.unregister(*token);
        }
    }
}

// ============================================================================
// Record decoding helpers (shared with the iterators)
// ============================================================================

/// Leading 7-byte little-endian sequence number of `Value`/`Delete` records.
pub(crate) fn decode_seq7(buf: &[u8], rec_id: usize) -> Result<SequenceNumber> {
    if buf.len() < 7 {
        return Err(Error::corruption(format!(
            "record {rec_id} too short for a sequence number"
        )));
    }
    let mut bytes = [0u8; 8];
    bytes[..7].copy_from_slice(&buf[..7]);
    Ok(u64::from_le_bytes(bytes))
}

/// Packed `(sequence, type)` head of one `Multi` entry.
pub(crate) fn decode_entry_head(entry: &[u8], rec_id: usize) -> Result<(SequenceNumber, EntryType)> {
    if entry.len() < 8 {
        return Err(Error::corruption(format!(
            "record {rec_id} has a truncated version entry"
        )));
    }
    let packed = u64::from_le_bytes(entry[..8].try_into().unwrap());
    ziptable_core::unpack_sequence_and_type(packed)
        .map_err(|e| Error::corruption(format!("record {rec_id}: {e}")))
}

/// Validated view of a `Multi` record: count + n+1 offsets + body.
#[derive(Clone, Copy)]
pub(crate) struct MultiRecord {
    pub num: usize,
    pub(crate) header_len: usize,
}

impl MultiRecord {
    pub fn parse(buf: &[u8], rec_id: usize) -> Result<Self> {
        if buf.len() < 8 {
            return Err(Error::corruption(format!(
                "record {rec_id} too short for a multi header"
            )));
        }
        let num = read_u32_le(buf, 0) as usize;
        let header_len = 4 * (num + 2);
        if num == 0 || buf.len() < header_len {
            return Err(Error::corruption(format!(
                "record {rec_id} multi header is malformed (num = {num})"
            )));
        }
        let body_len = buf.len() - header_len;
        let mut prev = 0u32;
        for i in 0..=num {
            let off = read_u32_le(buf, 4 + i * 4);
            if off < prev || off as usize > body_len {
                return Err(Error::corruption(format!(
                    "record {rec_id} multi offsets are not monotonic"
                )));
            }
            prev = off;
        }
        if prev as usize != body_len {
            return Err(Error::corruption(format!(
                "record {rec_id} multi body length mismatch"
            )));
        }
        Ok(MultiRecord { num, header_len })
    }

    pub fn entry<'b>(&self, buf: &'b [u8], i: usize, rec_id: usize) -> Result<&'b [u8]> {
        debug_assert!(i < self.num);
        let start = read_u32_le(buf, 4 + i * 4) as usize;
        let end = read_u32_le(buf, 4 + (i + 1) * 4) as usize;
        let body = &buf[self.header_len..];
        if end - start < 8 {
            return Err(Error::corruption(format!(
                "record {rec_id} has a truncated version entry"
            )));
        }
        Ok(&body[start..end])
    }
}

// ============================================================================
// Open-time helpers
// ============================================================================

fn checked_range(mem: &TableBytes, handle: BlockHandle) -> Result<Range<usize>> {
    let range = handle.as_range();
    if range.end > mem.len() || range.start > range.end {
        return Err(Error::corruption(format!(
            "block handle {}..{} exceeds the file ({} bytes)",
            range.start,
            range.end,
            mem.len()
        )));
    }
    Ok(range)
}

pub(crate) fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Prefault a mapped range: advise the kernel, then touch one byte per page.
fn warm_up(mmap: &Mmap, range: Range<usize>) {
    if range.is_empty() {
        return;
    }
    let _ = mmap.advise_range(Advice::WillNeed, range.start, range.len());
    let slice = &mmap[range];
    let mut checksum = 0u8;
    for i in (0..slice.len()).step_by(4096) {
        checksum ^= unsafe { std::ptr::read_volatile(&slice[i]) };
    }
    std::hint::black_box(checksum);
}
