//! Forward, reverse, and uint64 table iterators.
//!
//! `ZipTableIter<REVERSE>` walks the trie in either direction while keeping
//! the decoded record for the current key cached; versions inside a record
//! are exhausted before the trie advances. `REVERSE` inverts the trie
//! primitives, so a reverse-comparator table still yields comparator-forward
//! order with versions newest-first; a full backward walk is the exact
//! reversal of a forward walk.
//!
//! The uint64 family is the forward iterator with a key codec that swaps
//! seek targets into index space and materialized keys back out of it.

use super::{
    common_prefix_len, decode_entry_head, decode_seq7, MultiRecord, TableReader,
};
use crate::error::Error;
use crate::format::type_array::ZipValueType;
use crate::index::TrieIter;
use std::ops::Range;
use ziptable_core::{
    comparator::{uint64_key_from_index, uint64_key_to_index},
    pack_sequence_and_type, parse_internal_key, EntryType, SequenceNumber,
};

/// Cursor over a table's internal keys in comparator order.
pub trait TableIterator {
    fn valid(&self) -> bool;
    fn seek_to_first(&mut self);
    fn seek_to_last(&mut self);
    /// Position on the first entry at or after `target` (an internal key).
    fn seek(&mut self, target: &[u8]);
    /// Position on the last entry at or before `target`.
    fn seek_for_prev(&mut self, target: &[u8]);
    fn next(&mut self);
    fn prev(&mut self);
    /// Current internal key. Only meaningful while `valid()`.
    fn key(&self) -> &[u8];
    /// Current value. Only meaningful while `valid()`.
    fn value(&self) -> &[u8];
    /// Error recorded by the most recent operation, if any.
    fn status(&self) -> Option<&Error>;
}

/// How user keys translate between the comparator's space and the index's
/// byte-lex space.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyCodec {
    Plain,
    Uint64Swap,
}

pub struct ZipTableIter<'a, const REVERSE: bool> {
    reader: &'a TableReader,
    trie_iter: TrieIter<'a>,
    codec: KeyCodec,
    value_buf: Vec<u8>,
    zv_type: ZipValueType,
    multi: Option<MultiRecord>,
    valnum: usize,
    validx: usize,
    ikey_buf: Vec<u8>,
    value_range: Range<usize>,
    sequence: SequenceNumber,
    status: Option<Error>,
}

impl<'a, const REVERSE: bool> ZipTableIter<'a, REVERSE> {
    pub(crate) fn new(reader: &'a TableReader, codec: KeyCodec) -> Self {
        ZipTableIter {
            trie_iter: TrieIter::new(&reader.trie),
            reader,
            codec,
            value_buf: Vec::new(),
            zv_type: ZipValueType::ZeroSeq,
            multi: None,
            valnum: 0,
            validx: 0,
            ikey_buf: Vec::new(),
            value_range: 0..0,
            sequence: 0,
            status: None,
        }
    }

    fn set_invalid(&mut self) {
        self.trie_iter.invalidate();
        self.valnum = 0;
        self.validx = 0;
        self.value_range = 0..0;
    }

    /// Load and validate the record under the trie iterator. Leaves
    /// `validx` at 0.
    fn unzip_record(&mut self, has_record: bool) -> bool {
        self.validx = 0;
        if !has_record {
            self.set_invalid();
            return false;
        }
        let rec_id = self.trie_iter.id();
        self.zv_type = self.reader.types.get(rec_id);
        self.value_buf.clear();
        if let Err(e) = self.reader.read_record_append(rec_id, &mut self.value_buf) {
            self.status = Some(e);
            self.set_invalid();
            return false;
        }
        if self.zv_type == ZipValueType::Multi {
            match MultiRecord::parse(&self.value_buf, rec_id) {
                Ok(multi) => {
                    self.valnum = multi.num;
                    self.multi = Some(multi);
                }
                Err(e) => {
                    self.status = Some(e);
                    self.set_invalid();
                    return false;
                }
            }
        } else {
            self.valnum = 1;
            self.multi = None;
        }
        true
    }

    /// Decode version `validx` of the cached record and materialize the
    /// internal key.
    fn decode_curr(&mut self) -> bool {
        let (sequence, entry_type, value_range) = match self.zv_type {
            ZipValueType::ZeroSeq => (
                self.reader.effective_global_seqno(),
                EntryType::Value,
                0..self.value_buf.len(),
            ),
            ZipValueType::Value => {
                let seq = match decode_seq7(&self.value_buf, self.trie_iter.id()) {
                    Ok(seq) => seq,
                    Err(e) => {
                        self.status = Some(e);
                        self.set_invalid();
                        return false;
                    }
                };
                (seq, EntryType::Value, 7..self.value_buf.len())
            }
            ZipValueType::Delete => {
                let seq = match decode_seq7(&self.value_buf, self.trie_iter.id()) {
                    Ok(seq) => seq,
                    Err(e) => {
                        self.status = Some(e);
                        self.set_invalid();
                        return false;
                    }
                };
                (seq, EntryType::Deletion, 0..0)
            }
            ZipValueType::Multi => {
                let rec_id = self.trie_iter.id();
                let multi = self.multi.expect("multi record without header");
                let decoded = multi
                    .entry(&self.value_buf, self.validx, rec_id)
                    .and_then(|entry| {
                        decode_entry_head(entry, rec_id).map(|head| (head, entry.len()))
                    });
                match decoded {
                    Ok(((seq, etype), entry_len)) => {
                        let start = multi.header_len
                            + crate::format::read_u32_le(&self.value_buf, 4 + self.validx * 4)
                                as usize;
                        (seq, etype, start + 8..start + entry_len)
                    }
                    Err(e) => {
                        self.status = Some(e);
                        self.set_invalid();
                        return false;
                    }
                }
            }
        };

        self.sequence = sequence;
        self.value_range = value_range;

        let mut ikey = std::mem::take(&mut self.ikey_buf);
        ikey.clear();
        ikey.extend_from_slice(&self.reader.common_prefix);
        ikey.extend_from_slice(self.trie_iter.key());
        if self.codec == KeyCodec::Uint64Swap {
            debug_assert_eq!(ikey.len(), 8, "uint64 tables carry 8-byte user keys");
            if ikey.len() == 8 {
                let swapped = uint64_key_from_index(&ikey[..8].try_into().unwrap());
                ikey.copy_from_slice(&swapped);
            }
        }
        ikey.extend_from_slice(&pack_sequence_and_type(sequence, entry_type).to_le_bytes());
        self.ikey_buf = ikey;
        true
    }

    fn trie_seek_to_first(&mut self) -> bool {
        if REVERSE {
            self.trie_iter.seek_last()
        } else {
            self.trie_iter.seek_first()
        }
    }

    fn trie_seek_to_last(&mut self) -> bool {
        if REVERSE {
            self.trie_iter.seek_first()
        } else {
            self.trie_iter.seek_last()
        }
    }

    fn trie_next(&mut self) -> bool {
        if REVERSE {
            self.trie_iter.prev()
        } else {
            self.trie_iter.next()
        }
    }

    fn trie_prev(&mut self) -> bool {
        if REVERSE {
            self.trie_iter.next()
        } else {
            self.trie_iter.prev()
        }
    }

    /// Position on the byte-lex smallest key (comparator-first for forward
    /// tables, comparator-last for reverse ones).
    fn seek_ascending_first(&mut self) {
        let ok = self.trie_iter.seek_first();
        if self.unzip_record(ok) {
            if REVERSE {
                self.validx = self.valnum - 1;
            }
            self.decode_curr();
        }
    }

    /// Byte-lex largest key, mirroring [`Self::seek_ascending_first`].
    fn seek_ascending_last(&mut self) {
        let ok = self.trie_iter.seek_last();
        if self.unzip_record(ok) {
            if !REVERSE {
                self.validx = self.valnum - 1;
            }
            self.decode_curr();
        }
    }

    /// Core of `seek`: `user_key` is already in index space.
    fn seek_internal(&mut self, user_key: &[u8], req_seq: SequenceNumber) {
        let cp_len = self.reader.common_prefix.len();
        let cplen = common_prefix_len(user_key, &self.reader.common_prefix);
        if cplen != cp_len {
            // Target falls outside the table's prefix: it compares entirely
            // before or entirely after every stored key.
            if user_key.len() == cplen {
                if REVERSE {
                    self.set_invalid();
                } else {
                    self.seek_ascending_first();
                }
            } else if (user_key[cplen] < self.reader.common_prefix[cplen]) ^ REVERSE {
                if REVERSE {
                    self.seek_ascending_last();
                } else {
                    self.seek_ascending_first();
                }
            } else {
                self.set_invalid();
            }
            return;
        }

        let sub = &user_key[cplen..];
        let mut ok = self.trie_iter.seek(sub);
        let exact;
        if REVERSE {
            if !ok {
                // target is past every key in byte-lex order, i.e. before
                // every key in reverse order
                ok = self.trie_iter.seek_last();
                exact = false;
            } else {
                exact = self.trie_iter.key() == sub;
                if !exact {
                    ok = self.trie_iter.prev();
                }
            }
        } else {
            exact = ok && self.trie_iter.key() == sub;
        }

        if self.unzip_record(ok) {
            if exact {
                loop {
                    if !self.decode_curr() {
                        return;
                    }
                    if self.sequence <= req_seq {
                        return;
                    }
                    if self.validx + 1 >= self.valnum {
                        break;
                    }
                    self.validx += 1;
                }
                // no version of the exact key is visible at `req_seq`
                self.step_forward();
            } else {
                self.decode_curr();
            }
        }
    }

    fn step_forward(&mut self) {
        self.validx += 1;
        if self.validx < self.valnum {
            self.decode_curr();
        } else {
            let ok = self.trie_next();
            if self.unzip_record(ok) {
                self.decode_curr();
            }
        }
    }

    fn step_backward(&mut self) {
        if self.validx > 0 {
            self.validx -= 1;
            self.decode_curr();
        } else {
            let ok = self.trie_prev();
            if self.unzip_record(ok) {
                self.validx = self.valnum - 1;
                self.decode_curr();
            }
        }
    }
}

impl<'a, const REVERSE: bool> TableIterator for ZipTableIter<'a, REVERSE> {
    fn valid(&self) -> bool {
        self.trie_iter.valid() && self.status.is_none()
    }

    fn seek_to_first(&mut self) {
        self.status = None;
        let ok = self.trie_seek_to_first();
        if self.unzip_record(ok) {
            self.decode_curr();
        }
    }

    fn seek_to_last(&mut self) {
        self.status = None;
        let ok = self.trie_seek_to_last();
        if self.unzip_record(ok) {
            self.validx = self.valnum - 1;
            self.decode_curr();
        }
    }

    fn seek(&mut self, target: &[u8]) {
        self.status = None;
        let pik = match parse_internal_key(target) {
            Ok(pik) => pik,
            Err(e) => {
                self.status = Some(Error::invalid(format!("seek target: {e}")));
                self.set_invalid();
                return;
            }
        };
        match self.codec {
            KeyCodec::Plain => {
                self.seek_internal(pik.user_key, pik.sequence);
            }
            KeyCodec::Uint64Swap => {
                let raw: [u8; 8] = match pik.user_key.try_into() {
                    Ok(raw) => raw,
                    Err(_) => {
                        self.status = Some(Error::invalid(
                            "uint64 comparator requires 8-byte user keys",
                        ));
                        self.set_invalid();
                        return;
                    }
                };
                let swapped = uint64_key_to_index(&raw);
                self.seek_internal(&swapped, pik.sequence);
            }
        }
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        self.seek(target);
        if self.status.is_some() {
            return;
        }
        if !self.valid() {
            self.seek_to_last();
        }
        while self.valid()
            && self
                .reader
                .comparator()
                .compare_internal(self.key(), target)
                == std::cmp::Ordering::Greater
        {
            self.prev();
        }
    }

    fn next(&mut self) {
        if !self.valid() {
            return;
        }
        self.step_forward();
    }

    fn prev(&mut self) {
        if !self.valid() {
            return;
        }
        self.step_backward();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.ikey_buf
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.value_buf[self.value_range.clone()]
    }

    fn status(&self) -> Option<&Error> {
        self.status.as_ref()
    }
}
