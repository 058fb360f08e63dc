//! Table builder: consumes a sorted stream of internal-key/value pairs and
//! emits one immutable table file.
//!
//! The pipeline at `finish`:
//!
//! 1. staged user keys (deduplicated, index-space) -> succinct trie
//! 2. staged values + value bitmap -> typed records, old ids in arrival order
//! 3. trie enumeration -> streamed reorder of records and type array to the
//!    trie's id space
//! 4. block emission: data, dict, index, types, common prefix, tombstones,
//!    properties, meta-index, footer

use crate::config::TableOptions;
use crate::error::{Error, Result};
use crate::format::footer::Footer;
use crate::format::meta_index::MetaIndexBuilder;
use crate::format::properties::{TableProperties, PROP_BUILD_TIMESTAMP};
use crate::format::type_array::{TypeArrayBuilder, ZipValueType};
use crate::format::varint::{read_varint_from, write_varint};
use crate::format::{
    BlockHandle, TableBytes, COMMON_PREFIX_BLOCK, INDEX_BLOCK, PROPERTIES_BLOCK, RANGE_DEL_BLOCK,
    VALUE_DICT_BLOCK, VALUE_TYPE_BLOCK,
};
use crate::index::bits::BitVecBuilder;
use crate::index::{build_trie, LoudsTrie};
use crate::store::StoreBuilder;
use crate::tombstone;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::os::unix::fs::FileExt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use ziptable_core::{
    comparator::uint64_key_to_index, pack_sequence_and_type, parse_internal_key,
    unpack_sequence_and_type, Comparator, ComparatorKind, EntryType, SequenceNumber,
};

/// Deduplicated user keys staged for the trie build: one shared byte pool
/// plus per-key extents.
#[derive(Default)]
struct KeyBuffer {
    pool: Vec<u8>,
    ends: Vec<usize>,
}

impl KeyBuffer {
    fn push(&mut self, key: &[u8]) {
        self.pool.extend_from_slice(key);
        self.ends.push(self.pool.len());
    }

    fn len(&self) -> usize {
        self.ends.len()
    }

    fn get(&self, i: usize) -> &[u8] {
        let start = if i == 0 { 0 } else { self.ends[i - 1] };
        &self.pool[start..self.ends[i]]
    }
}

pub struct TableBuilder {
    comparator: Comparator,
    file: File,
    offset: u64,

    keys: KeyBuffer,
    prev_user_key: Vec<u8>,
    prev_sequence: SequenceNumber,
    has_prev: bool,
    value_bits: BitVecBuilder,
    staging: Option<BufWriter<File>>,
    store: StoreBuilder,
    range_del: Vec<u8>,

    rng: StdRng,
    sample_bound: u64,

    props: TableProperties,
    poisoned: Option<String>,
    closed: bool,
}

impl TableBuilder {
    /// Start building into `file`. The file must be empty and writable.
    pub fn new(file: File, comparator: Comparator, opts: Arc<TableOptions>) -> Result<Self> {
        opts.validate()?;
        let staging = BufWriter::new(tempfile::tempfile_in(&opts.local_temp_dir)?);
        let store = StoreBuilder::new(&opts.local_temp_dir)?;
        let sample_bound = (u64::MAX as f64 * opts.sample_ratio) as u64;
        let mut props = TableProperties {
            comparator_name: comparator.name().to_string(),
            ..Default::default()
        };
        if opts.enable_compression_probe {
            let now_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            props.user_collected.insert(
                PROP_BUILD_TIMESTAMP.to_string(),
                now_ms.to_string().into_bytes(),
            );
        }
        Ok(TableBuilder {
            comparator,
            file,
            offset: 0,
            keys: KeyBuffer::default(),
            prev_user_key: Vec::new(),
            prev_sequence: 0,
            has_prev: false,
            value_bits: BitVecBuilder::new(),
            staging: Some(staging),
            store,
            range_del: Vec::new(),
            rng: StdRng::from_entropy(),
            sample_bound,
            props,
            poisoned: None,
            closed: false,
        })
    }

    /// Append an entry. Keys must arrive in ascending internal-key order
    /// under the configured comparator; errors are sticky.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if let Some(msg) = &self.poisoned {
            return Err(Error::BuilderPoisoned(msg.clone()));
        }
        if self.closed {
            return Err(Error::invalid("add after finish or abandon"));
        }
        match self.add_impl(key, value) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.poisoned = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn add_impl(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let pik = parse_internal_key(key)?;

        if pik.entry_type == EntryType::RangeDeletion {
            tombstone::append_entry(&mut self.range_del, key, value);
            self.props.num_range_deletions += 1;
            self.props.raw_key_size += key.len() as u64;
            self.props.raw_value_size += value.len() as u64;
            return Ok(());
        }

        // ordering check under the configured comparator
        let same_key = if self.has_prev {
            use std::cmp::Ordering::*;
            match self.comparator.compare(pik.user_key, &self.prev_user_key) {
                Greater => false,
                Equal => {
                    if pik.sequence >= self.prev_sequence {
                        return Err(Error::invalid(format!(
                            "sequence numbers must descend within a key: {} after {}",
                            pik.sequence, self.prev_sequence
                        )));
                    }
                    true
                }
                Less => {
                    return Err(Error::invalid(
                        "keys must be added in ascending comparator order",
                    ));
                }
            }
        } else {
            false
        };

        if !same_key {
            if self.has_prev {
                // terminate the previous key's run in the value bitmap
                self.value_bits.push(false);
            }
            if self.comparator.needs_index_transform() {
                let raw: [u8; 8] = pik.user_key.try_into().map_err(|_| {
                    Error::invalid("uint64 comparator requires 8-byte user keys")
                })?;
                self.keys.push(&uint64_key_to_index(&raw));
            } else {
                self.keys.push(pik.user_key);
            }
            self.prev_user_key.clear();
            self.prev_user_key.extend_from_slice(pik.user_key);
            self.has_prev = true;
        }
        self.prev_sequence = pik.sequence;
        self.value_bits.push(true);

        // stage `packed seq+type || value` for the record-encoding pass
        let staging = self.staging.as_mut().expect("staging file missing");
        staging.write_all(
            &pack_sequence_and_type(pik.sequence, pik.entry_type).to_le_bytes(),
        )?;
        let mut frame = Vec::with_capacity(10);
        write_varint(value.len() as u64, &mut frame);
        staging.write_all(&frame)?;
        staging.write_all(value)?;

        if !value.is_empty() && self.rng.gen::<u64>() < self.sample_bound {
            self.store.add_sample(value);
        }

        self.props.num_entries += 1;
        self.props.raw_key_size += key.len() as u64;
        self.props.raw_value_size += value.len() as u64;
        Ok(())
    }

    /// Point entries added so far (range deletions are counted separately in
    /// the properties).
    pub fn num_entries(&self) -> u64 {
        self.props.num_entries
    }

    /// Bytes emitted; the final file size after a successful `finish`.
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    pub fn properties(&self) -> &TableProperties {
        &self.props
    }

    /// Attach a user-collected property (external-SST markers, collector
    /// output).
    pub fn set_user_property(&mut self, key: &str, value: &[u8]) {
        self.props
            .user_collected
            .insert(key.to_string(), value.to_vec());
    }

    /// Release staging resources without producing a valid file.
    pub fn abandon(&mut self) {
        self.closed = true;
        self.staging = None;
    }

    /// Emit the table file. Terminal: the builder accepts nothing afterwards.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(msg) = &self.poisoned {
            return Err(Error::BuilderPoisoned(msg.clone()));
        }
        if self.closed {
            return Err(Error::invalid("finish after finish or abandon"));
        }
        self.closed = true;
        match self.finish_impl() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.poisoned = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn finish_impl(&mut self) -> Result<()> {
        // final guard bit: closes the last key's run
        self.value_bits.push(false);
        let mut staged = {
            let writer = self.staging.take().expect("staging file missing");
            let mut file = writer
                .into_inner()
                .map_err(|e| Error::Io(e.into_error()))?;
            file.rewind()?;
            BufReader::new(file)
        };

        let num_user_keys = self.keys.len();
        let reverse = self.comparator.kind() == ComparatorKind::ReverseBytewise;

        // 1. Common prefix: keys are staged in index-space byte-lex order
        //    (descending for reverse tables), so the prefix of the whole set
        //    is the prefix of the two extremes.
        let common_prefix: Vec<u8> = if num_user_keys == 0 {
            Vec::new()
        } else {
            let a = self.keys.get(0);
            let b = self.keys.get(num_user_keys - 1);
            let cplen = a.iter().zip(b).take_while(|(x, y)| x == y).count();
            a[..cplen].to_vec()
        };

        // 2. Build the trie over prefix-stripped keys in ascending order.
        let index_bytes: Arc<Vec<u8>> = {
            let mut stripped: Vec<&[u8]> = Vec::with_capacity(num_user_keys);
            if reverse {
                for i in (0..num_user_keys).rev() {
                    stripped.push(&self.keys.get(i)[common_prefix.len()..]);
                }
            } else {
                for i in 0..num_user_keys {
                    stripped.push(&self.keys.get(i)[common_prefix.len()..]);
                }
            }
            Arc::new(build_trie(&stripped))
        };

        // 3. Encode records in arrival (old-id) order, driven by the value
        //    bitmap.
        self.store.prepare(num_user_keys)?;
        let mut old_types = TypeArrayBuilder::new(num_user_keys);
        let mut bit_pos = 0usize;
        let mut entries_seen = 0u64;
        let mut record = Vec::new();
        for old_id in 0..num_user_keys {
            let one_len = self.value_bits.one_seq_len(bit_pos);
            debug_assert!(one_len >= 1);
            let (mut seq_type, mut value) = read_staged(&mut staged)?;
            record.clear();
            let (seq, etype) = unpack_sequence_and_type(seq_type)
                .map_err(|e| Error::corruption(format!("staging file: {e}")))?;
            if one_len == 1 && (etype == EntryType::Value || etype == EntryType::Deletion) {
                if etype == EntryType::Value && seq == 0 {
                    old_types.set(old_id, ZipValueType::ZeroSeq);
                    record.extend_from_slice(&value);
                } else if etype == EntryType::Value {
                    old_types.set(old_id, ZipValueType::Value);
                    record.extend_from_slice(&seq.to_le_bytes()[..7]);
                    record.extend_from_slice(&value);
                } else {
                    old_types.set(old_id, ZipValueType::Delete);
                    record.extend_from_slice(&seq.to_le_bytes()[..7]);
                }
            } else {
                old_types.set(old_id, ZipValueType::Multi);
                let mut body = Vec::new();
                let mut offs: Vec<u32> = Vec::with_capacity(one_len + 1);
                offs.push(0);
                for j in 0..one_len {
                    if j > 0 {
                        let next = read_staged(&mut staged)?;
                        seq_type = next.0;
                        value = next.1;
                    }
                    body.extend_from_slice(&seq_type.to_le_bytes());
                    body.extend_from_slice(&value);
                    offs.push(body.len() as u32);
                }
                record.extend_from_slice(&(one_len as u32).to_le_bytes());
                for o in &offs {
                    record.extend_from_slice(&o.to_le_bytes());
                }
                record.extend_from_slice(&body);
            }
            self.store.add_record(&record)?;
            bit_pos += one_len + 1;
            entries_seen += one_len as u64;
        }
        debug_assert_eq!(entries_seen, self.props.num_entries);
        drop(staged);

        // 4. Reorder: enumerate the trie in lexicographic order, mapping the
        //    byte-lex position back to the arrival id, and rewrite the value
        //    store and type array in lockstep.
        let trie = LoudsTrie::load(
            TableBytes::Owned(Arc::clone(&index_bytes)),
            0..index_bytes.len(),
        )?;
        let mut new_types = TypeArrayBuilder::new(num_user_keys);
        let data_size = {
            let old_types = &old_types;
            let new_types = &mut new_types;
            self.store.emit(&self.file, 0, |emit| {
                trie.for_each_key(|lex_nth, new_id| {
                    let old_id = if reverse { num_user_keys - 1 - lex_nth } else { lex_nth };
                    new_types.set(new_id, old_types.get(old_id));
                    emit(new_id as u64, old_id as u64);
                });
            })?
        };
        self.offset = data_size;
        self.props.data_size = data_size;
        self.props.index_size = index_bytes.len() as u64;

        // 5. Blocks, meta-index, footer.
        let mut meta = MetaIndexBuilder::new();
        let dict_handle = write_block(&self.file, &mut self.offset, self.store.dict_bytes())?;
        meta.add(VALUE_DICT_BLOCK, dict_handle);
        let index_handle = write_block(&self.file, &mut self.offset, &index_bytes)?;
        meta.add(INDEX_BLOCK, index_handle);
        let type_handle = write_block(&self.file, &mut self.offset, &new_types.into_bytes())?;
        meta.add(VALUE_TYPE_BLOCK, type_handle);
        let prefix_handle = write_block(&self.file, &mut self.offset, &common_prefix)?;
        meta.add(COMMON_PREFIX_BLOCK, prefix_handle);
        if !self.range_del.is_empty() {
            let handle = write_block(&self.file, &mut self.offset, &self.range_del)?;
            meta.add(RANGE_DEL_BLOCK, handle);
        }
        let props_handle = write_block(&self.file, &mut self.offset, &self.props.encode())?;
        meta.add(PROPERTIES_BLOCK, props_handle);
        let meta_handle = write_block(&self.file, &mut self.offset, &meta.finish())?;
        let footer = Footer {
            meta_index: meta_handle,
        };
        write_block(&self.file, &mut self.offset, &footer.encode())?;
        self.file.sync_all()?;

        tracing::debug!(
            entries = self.props.num_entries,
            keys = num_user_keys,
            range_deletions = self.props.num_range_deletions,
            data_size,
            index_size = self.props.index_size,
            file_size = self.offset,
            "table finished"
        );
        Ok(())
    }
}

/// Append a block at `*offset`, returning its handle.
fn write_block(file: &File, offset: &mut u64, data: &[u8]) -> Result<BlockHandle> {
    let handle = BlockHandle {
        offset: *offset,
        size: data.len() as u64,
    };
    file.write_all_at(data, *offset)?;
    *offset += data.len() as u64;
    Ok(handle)
}

/// Read one staged `packed seq+type || varint len || value` frame.
fn read_staged<R: Read>(r: &mut R) -> Result<(u64, Vec<u8>)> {
    let mut packed = [0u8; 8];
    r.read_exact(&mut packed)?;
    let len = read_varint_from(r)? as usize;
    let mut value = vec![0u8; len];
    r.read_exact(&mut value)?;
    Ok((u64::from_le_bytes(packed), value))
}
