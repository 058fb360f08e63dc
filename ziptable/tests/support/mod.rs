//! Shared helpers for the table integration tests.
#![allow(dead_code)]

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use ziptable::read::GetContext;
use ziptable::{
    Comparator, EntryType, ParsedInternalKey, ReadEnv, TableBuilder, TableOptions, TableReader,
};
use ziptable_core::append_internal_key;

pub fn ikey(user_key: &[u8], seq: u64, t: EntryType) -> Vec<u8> {
    let mut k = Vec::new();
    append_internal_key(&mut k, user_key, seq, t);
    k
}

/// One version surfaced by a point lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub user_key: Vec<u8>,
    pub sequence: u64,
    pub entry_type: EntryType,
    pub value: Vec<u8>,
}

/// Collects surfaced versions; asks for more only after merge operands,
/// mirroring how an LSM read path consumes them.
#[derive(Default)]
pub struct CollectCtx {
    pub versions: Vec<Version>,
}

impl GetContext for CollectCtx {
    fn save_value(&mut self, key: &ParsedInternalKey<'_>, value: &[u8]) -> bool {
        self.versions.push(Version {
            user_key: key.user_key.to_vec(),
            sequence: key.sequence,
            entry_type: key.entry_type,
            value: value.to_vec(),
        });
        key.entry_type == EntryType::Merge
    }
}

/// Build a table at `path` from `(user_key, seq, type, value)` rows, already
/// in comparator order.
pub fn build_table(
    path: &Path,
    comparator: Comparator,
    opts: Arc<TableOptions>,
    rows: &[(&[u8], u64, EntryType, &[u8])],
) -> TableBuilder {
    let file = File::create(path).unwrap();
    let mut builder = TableBuilder::new(file, comparator, opts).unwrap();
    for (user_key, seq, t, value) in rows {
        builder.add(&ikey(user_key, *seq, *t), value).unwrap();
    }
    builder.finish().unwrap();
    builder
}

pub fn open_table(path: &Path, opts: &TableOptions, comparator: &Comparator) -> TableReader {
    let file = File::open(path).unwrap();
    TableReader::open(file, opts, &ReadEnv::mmap(), comparator).unwrap()
}

/// Point lookup returning every surfaced version.
pub fn get_versions(reader: &TableReader, user_key: &[u8], seq: u64) -> Vec<Version> {
    let mut ctx = CollectCtx::default();
    reader
        .get(&ikey(user_key, seq, EntryType::Value), &mut ctx)
        .unwrap();
    ctx.versions
}

/// Full forward scan as `(internal_key, value)` pairs.
pub fn scan_forward(reader: &TableReader) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut it = reader.new_iterator();
    it.seek_to_first();
    while it.valid() {
        out.push((it.key().to_vec(), it.value().to_vec()));
        it.next();
    }
    assert!(it.status().is_none(), "scan failed: {:?}", it.status());
    out
}

/// Full backward scan as `(internal_key, value)` pairs.
pub fn scan_backward(reader: &TableReader) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut it = reader.new_iterator();
    it.seek_to_last();
    while it.valid() {
        out.push((it.key().to_vec(), it.value().to_vec()));
        it.prev();
    }
    assert!(it.status().is_none(), "scan failed: {:?}", it.status());
    out
}
