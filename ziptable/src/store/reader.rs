//! Read side of the value store: zero-copy view plus mmap and pread record
//! access.

use super::{STORE_HEADER_LEN, STORE_MAGIC, STORE_VERSION};
use crate::error::{Error, Result};
use crate::format::{read_u64_le, TableBytes};
use std::fs::File;
use std::io::Read;
use std::ops::Range;
use std::os::unix::fs::FileExt;
use xxhash_rust::xxh64::xxh64;
use zstd::dict::DecoderDictionary;
use zstd::stream::read::Decoder;

pub struct Store {
    mem: TableBytes,
    range: Range<usize>,
    num_records: usize,
    offsets: Range<usize>,
    digests: Range<usize>,
    payload: Range<usize>,
    ddict: DecoderDictionary<'static>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("mem", &self.mem)
            .field("range", &self.range)
            .field("num_records", &self.num_records)
            .field("offsets", &self.offsets)
            .field("digests", &self.digests)
            .field("payload", &self.payload)
            .finish()
    }
}

impl Store {
    /// Deserialize a store view over `mem[range]`. `dict` is the shared
    /// dictionary block, retained (copied into the decoder context) for the
    /// store's lifetime.
    ///
    /// `range` must be file-absolute when `mem` maps a whole table file;
    /// pread access reuses the same offsets against the file descriptor.
    pub fn load(mem: TableBytes, range: Range<usize>, dict: &[u8]) -> Result<Self> {
        if range.len() < STORE_HEADER_LEN {
            return Err(Error::corruption(format!(
                "value store too small: {} bytes",
                range.len()
            )));
        }
        let base = range.start;
        let header = mem.slice(base..base + STORE_HEADER_LEN);
        if header[0..4] != STORE_MAGIC {
            return Err(Error::corruption("value store magic mismatch"));
        }
        if header[4] != STORE_VERSION {
            return Err(Error::corruption(format!(
                "unsupported value store version: {}",
                header[4]
            )));
        }
        let num_records = read_u64_le(header, 8) as usize;
        let payload_len = read_u64_le(header, 16) as usize;
        let tables_digest = read_u64_le(header, 24);

        let offsets_len = (num_records + 1) * 8;
        let digests_len = num_records * 8;
        let expected = STORE_HEADER_LEN + offsets_len + digests_len + payload_len;
        if range.len() != expected {
            return Err(Error::corruption(format!(
                "value store length mismatch: expected {expected}, got {}",
                range.len()
            )));
        }
        let offsets = base + STORE_HEADER_LEN..base + STORE_HEADER_LEN + offsets_len;
        let digests = offsets.end..offsets.end + digests_len;
        let payload = digests.end..range.end;

        let computed = xxh64(mem.slice(offsets.start..digests.end), 0);
        if computed != tables_digest {
            return Err(Error::corruption(format!(
                "value store table digest mismatch: stored {tables_digest:#018x}, computed {computed:#018x}"
            )));
        }

        Ok(Store {
            ddict: DecoderDictionary::copy(dict),
            mem,
            range,
            num_records,
            offsets,
            digests,
            payload,
        })
    }

    pub fn num_records(&self) -> usize {
        self.num_records
    }

    /// Total mapped size of the data region; drives the mmap-vs-pread
    /// policy.
    pub fn mmap_len(&self) -> usize {
        self.range.len()
    }

    /// Extent of the offset + digest tables (warmed even when the payload is
    /// read with pread).
    pub fn tables_extent(&self) -> Range<usize> {
        self.offsets.start..self.digests.end
    }

    pub fn extent(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Payload extent of one record, relative to nothing: absolute indices
    /// into the backing memory.
    fn record_extent(&self, rec_id: usize) -> Result<Range<usize>> {
        debug_assert!(rec_id < self.num_records);
        let bytes = self.mem.as_slice();
        let start = read_u64_le(bytes, self.offsets.start + rec_id * 8) as usize;
        let end = read_u64_le(bytes, self.offsets.start + (rec_id + 1) * 8) as usize;
        if start > end || self.payload.start + end > self.payload.end {
            return Err(Error::corruption(format!(
                "record {rec_id} extent {start}..{end} is out of bounds"
            )));
        }
        Ok(self.payload.start + start..self.payload.start + end)
    }

    #[inline]
    fn stored_digest(&self, rec_id: usize) -> u64 {
        read_u64_le(self.mem.as_slice(), self.digests.start + rec_id * 8)
    }

    fn decode_into(&self, rec_id: usize, compressed: &[u8], buf: &mut Vec<u8>) -> Result<()> {
        let computed = xxh64(compressed, 0);
        let stored = self.stored_digest(rec_id);
        if computed != stored {
            return Err(Error::BadChecksum {
                record_id: rec_id as u64,
                stored,
                computed,
            });
        }
        let mut decoder = Decoder::with_prepared_dictionary(compressed, &self.ddict)
            .map_err(|e| Error::corruption(format!("record {rec_id}: {e}")))?;
        decoder
            .read_to_end(buf)
            .map_err(|e| Error::corruption(format!("record {rec_id} failed to decompress: {e}")))?;
        Ok(())
    }

    /// Decompress record `rec_id` and append it to `buf`, reading the
    /// compressed bytes through the memory map.
    pub fn get_record_append(&self, rec_id: usize, buf: &mut Vec<u8>) -> Result<()> {
        let extent = self.record_extent(rec_id)?;
        self.decode_into(rec_id, self.mem.slice(extent), buf)
    }

    /// Decompress record `rec_id` and append it to `buf`, reading the
    /// compressed bytes with positioned reads on `file` instead of touching
    /// the mapped payload.
    pub fn pread_record_append(&self, file: &File, rec_id: usize, buf: &mut Vec<u8>) -> Result<()> {
        let extent = self.record_extent(rec_id)?;
        let mut compressed = vec![0u8; extent.len()];
        file.read_exact_at(&mut compressed, extent.start as u64)?;
        self.decode_into(rec_id, &compressed, buf)
    }
}
