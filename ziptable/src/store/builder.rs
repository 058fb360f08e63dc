//! Build side of the value store: sample collection, dictionary training,
//! record staging, and the streamed reorder that writes the final data
//! region.

use super::{FALLBACK_DICT_SAMPLE, STORE_HEADER_LEN, STORE_MAGIC, STORE_VERSION, ZSTD_LEVEL};
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;
use xxhash_rust::xxh64::xxh64;
use zstd::bulk::Compressor;

/// Upper bound on the trained dictionary size.
const MAX_DICT_LEN: usize = 110 * 1024;

pub struct StoreBuilder {
    samples: Vec<Vec<u8>>,
    sample_len_sum: usize,
    dict: Vec<u8>,
    compressor: Option<Compressor<'static>>,
    /// Compressed records in arrival (old-id) order.
    tmp: File,
    tmp_len: u64,
    /// Per-record extents in the temp file; `offsets[i]..offsets[i+1]`.
    offsets: Vec<u64>,
    /// Per-record xxh64 of the compressed bytes.
    digests: Vec<u64>,
}

impl StoreBuilder {
    pub fn new(temp_dir: &Path) -> Result<Self> {
        let tmp = tempfile::tempfile_in(temp_dir)?;
        Ok(StoreBuilder {
            samples: Vec::new(),
            sample_len_sum: 0,
            dict: Vec::new(),
            compressor: None,
            tmp,
            tmp_len: 0,
            offsets: vec![0],
            digests: Vec::new(),
        })
    }

    /// Feed one sampled value to the dictionary trainer.
    pub fn add_sample(&mut self, value: &[u8]) {
        self.sample_len_sum += value.len();
        self.samples.push(value.to_vec());
    }

    pub fn sample_len_sum(&self) -> usize {
        self.sample_len_sum
    }

    /// Finalize the dictionary and get ready to accept `num_records`
    /// records. Must be called exactly once, before [`Self::add_record`].
    pub fn prepare(&mut self, num_records: usize) -> Result<()> {
        debug_assert!(self.compressor.is_none(), "prepare called twice");
        if self.samples.is_empty() {
            self.samples.push(FALLBACK_DICT_SAMPLE.to_vec());
            self.sample_len_sum = FALLBACK_DICT_SAMPLE.len();
        }
        self.dict = match zstd::dict::from_samples(&self.samples, MAX_DICT_LEN) {
            Ok(dict) => dict,
            Err(e) => {
                // Too few samples for the trainer; a raw-content dictionary
                // built from the samples themselves works with the same
                // codec paths.
                tracing::debug!(error = %e, "dictionary training failed, using raw sample dictionary");
                let mut raw = Vec::new();
                for s in &self.samples {
                    if raw.len() >= MAX_DICT_LEN {
                        break;
                    }
                    let take = (MAX_DICT_LEN - raw.len()).min(s.len());
                    raw.extend_from_slice(&s[..take]);
                }
                raw
            }
        };
        tracing::debug!(
            samples = self.samples.len(),
            sample_bytes = self.sample_len_sum,
            dict_bytes = self.dict.len(),
            num_records,
            "value dictionary finalized"
        );
        self.samples = Vec::new();
        self.offsets.reserve(num_records);
        self.digests.reserve(num_records);
        self.compressor = Some(Compressor::with_dictionary(ZSTD_LEVEL, &self.dict)?);
        Ok(())
    }

    /// Append one record in old-id (arrival) order.
    pub fn add_record(&mut self, record: &[u8]) -> Result<()> {
        let compressor = self
            .compressor
            .as_mut()
            .expect("add_record before prepare");
        let compressed = compressor.compress(record)?;
        self.digests.push(xxh64(&compressed, 0));
        self.tmp.write_all(&compressed)?;
        self.tmp_len += compressed.len() as u64;
        self.offsets.push(self.tmp_len);
        Ok(())
    }

    pub fn num_records(&self) -> usize {
        self.digests.len()
    }

    /// The finalized shared dictionary (contents of `ValueDictBlock`).
    pub fn dict_bytes(&self) -> &[u8] {
        &self.dict
    }

    /// Write the final data region at `base_offset` of `out`, permuting
    /// records from old ids to new ids.
    ///
    /// `gen` enumerates the complete `(new_id, old_id)` mapping and is
    /// invoked twice: once to size the new offset table, once to place the
    /// payload. Records stream straight from the temp file to their final
    /// position; no id-mapping array is ever materialized.
    ///
    /// Returns the total size of the data region.
    pub fn emit<G>(&mut self, out: &File, base_offset: u64, mut gen: G) -> Result<u64>
    where
        G: FnMut(&mut dyn FnMut(u64, u64)),
    {
        self.tmp.flush()?;
        let n = self.digests.len();

        // 1. Size pass: new offset table + reordered digest table.
        let mut new_lens = vec![0u32; n];
        let mut new_digests = vec![0u64; n];
        gen(&mut |new_id, old_id| {
            let (new_id, old_id) = (new_id as usize, old_id as usize);
            new_lens[new_id] = (self.offsets[old_id + 1] - self.offsets[old_id]) as u32;
            new_digests[new_id] = self.digests[old_id];
        });
        let mut new_offsets = Vec::with_capacity(n + 1);
        let mut acc = 0u64;
        new_offsets.push(0u64);
        for len in &new_lens {
            acc += *len as u64;
            new_offsets.push(acc);
        }
        let payload_len = acc;

        // 2. Header + tables.
        let mut tables = Vec::with_capacity((n + 1) * 8 + n * 8);
        for off in &new_offsets {
            tables.extend_from_slice(&off.to_le_bytes());
        }
        for d in &new_digests {
            tables.extend_from_slice(&d.to_le_bytes());
        }
        let mut head = Vec::with_capacity(STORE_HEADER_LEN + tables.len());
        head.extend_from_slice(&STORE_MAGIC);
        head.push(STORE_VERSION);
        head.extend_from_slice(&[0u8; 3]);
        head.extend_from_slice(&(n as u64).to_le_bytes());
        head.extend_from_slice(&payload_len.to_le_bytes());
        head.extend_from_slice(&xxh64(&tables, 0).to_le_bytes());
        head.extend_from_slice(&tables);
        out.write_all_at(&head, base_offset)?;
        let payload_base = base_offset + head.len() as u64;

        // 3. Placement pass: sequential reads from the temp file, positioned
        //    writes into the data region.
        let mut io_err: Option<io::Error> = None;
        let mut buf = Vec::new();
        gen(&mut |new_id, old_id| {
            if io_err.is_some() {
                return;
            }
            let (new_id, old_id) = (new_id as usize, old_id as usize);
            let len = (self.offsets[old_id + 1] - self.offsets[old_id]) as usize;
            buf.resize(len, 0);
            if let Err(e) = self.tmp.read_exact_at(&mut buf, self.offsets[old_id]) {
                io_err = Some(e);
                return;
            }
            if let Err(e) = out.write_all_at(&buf, payload_base + new_offsets[new_id]) {
                io_err = Some(e);
            }
        });
        if let Some(e) = io_err {
            return Err(Error::Io(e));
        }

        Ok(head.len() as u64 + payload_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::TableBytes;
    use crate::store::Store;
    use memmap2::Mmap;
    use std::sync::Arc;

    fn build_and_load(records: &[&[u8]], map: &[(u64, u64)]) -> (Vec<u8>, Vec<u8>) {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = StoreBuilder::new(dir.path()).unwrap();
        for r in records {
            builder.add_sample(r);
        }
        builder.prepare(records.len()).unwrap();
        for r in records {
            builder.add_record(r).unwrap();
        }
        let out_path = dir.path().join("store.bin");
        let out = File::create(&out_path).unwrap();
        let len = builder
            .emit(&out, 0, |f| {
                for &(new_id, old_id) in map {
                    f(new_id, old_id);
                }
            })
            .unwrap();
        drop(out);
        let bytes = std::fs::read(&out_path).unwrap();
        assert_eq!(bytes.len() as u64, len);
        (bytes, builder.dict_bytes().to_vec())
    }

    #[test]
    fn test_identity_reorder_round_trip() {
        let records: Vec<&[u8]> = vec![b"alpha-value", b"", b"gamma-gamma-gamma"];
        let map: Vec<(u64, u64)> = (0..3).map(|i| (i, i)).collect();
        let (bytes, dict) = build_and_load(&records, &map);
        let len = bytes.len();
        let store = Store::load(TableBytes::Owned(Arc::new(bytes)), 0..len, &dict).unwrap();
        assert_eq!(store.num_records(), 3);
        for (i, r) in records.iter().enumerate() {
            let mut buf = b"prefix:".to_vec();
            store.get_record_append(i, &mut buf).unwrap();
            assert_eq!(&buf[7..], *r);
        }
    }

    #[test]
    fn test_permuted_reorder() {
        let records: Vec<&[u8]> = vec![b"old-zero", b"old-one", b"old-two"];
        // new 0 <- old 2, new 1 <- old 0, new 2 <- old 1
        let map = vec![(0u64, 2u64), (1, 0), (2, 1)];
        let (bytes, dict) = build_and_load(&records, &map);
        let len = bytes.len();
        let store = Store::load(TableBytes::Owned(Arc::new(bytes)), 0..len, &dict).unwrap();
        let expect: Vec<&[u8]> = vec![b"old-two", b"old-zero", b"old-one"];
        for (i, r) in expect.iter().enumerate() {
            let mut buf = Vec::new();
            store.get_record_append(i, &mut buf).unwrap();
            assert_eq!(&buf, r);
        }
    }

    #[test]
    fn test_pread_matches_mmap() {
        let records: Vec<&[u8]> = vec![b"first record", b"second record"];
        let map: Vec<(u64, u64)> = (0..2).map(|i| (i, i)).collect();
        let dir = tempfile::tempdir().unwrap();
        let mut builder = StoreBuilder::new(dir.path()).unwrap();
        builder.prepare(records.len()).unwrap();
        for r in &records {
            builder.add_record(r).unwrap();
        }
        let out_path = dir.path().join("store.bin");
        let out = File::create(&out_path).unwrap();
        builder
            .emit(&out, 0, |f| {
                for i in 0..2u64 {
                    f(i, i);
                }
            })
            .unwrap();
        drop(out);

        let file = File::open(&out_path).unwrap();
        let mmap = unsafe { Mmap::map(&file).unwrap() };
        let len = mmap.len();
        let store = Store::load(
            TableBytes::Mapped(Arc::new(mmap)),
            0..len,
            builder.dict_bytes(),
        )
        .unwrap();
        for (i, r) in records.iter().enumerate() {
            let mut via_mmap = Vec::new();
            store.get_record_append(i, &mut via_mmap).unwrap();
            let mut via_pread = Vec::new();
            store.pread_record_append(&file, i, &mut via_pread).unwrap();
            assert_eq!(via_mmap, via_pread);
            assert_eq!(&via_mmap, r);
        }
    }

    #[test]
    fn test_empty_store() {
        let (bytes, dict) = build_and_load(&[], &[]);
        let len = bytes.len();
        let store = Store::load(TableBytes::Owned(Arc::new(bytes)), 0..len, &dict).unwrap();
        assert_eq!(store.num_records(), 0);
    }

    #[test]
    fn test_checksum_failure_is_per_record() {
        let records: Vec<&[u8]> = vec![b"aaaaaaaaaaaaaaaaaaaaaaa", b"bbbbbbbbbbbbbbbbbbbbbbb"];
        let map: Vec<(u64, u64)> = (0..2).map(|i| (i, i)).collect();
        let (mut bytes, dict) = build_and_load(&records, &map);
        // flip one byte in the last record's compressed payload
        let last = bytes.len() - 2;
        bytes[last] ^= 0xFF;
        let len = bytes.len();
        let store = Store::load(TableBytes::Owned(Arc::new(bytes)), 0..len, &dict).unwrap();
        let mut buf = Vec::new();
        store.get_record_append(0, &mut buf).unwrap();
        assert_eq!(&buf, b"aaaaaaaaaaaaaaaaaaaaaaa");
        buf.clear();
        let err = store.get_record_append(1, &mut buf).unwrap_err();
        assert!(matches!(err, Error::BadChecksum { record_id: 1, .. }));
    }
}
