//! Zero-copy LOUDS trie view.
//!
//! States are numbered in breadth-first order; state 0 is the root. The
//! `i`-th one-bit of the LOUDS sequence belongs to state `i`, the `i+1`-th
//! zero-bit closes state `i`'s child block, and the children of a state are
//! a contiguous run of state numbers. Every distinct key maps to the rank of
//! its terminal state, which is the record id shared with the value store
//! and the type array.

use super::bits::RankBits;
use crate::error::{Error, Result};
use crate::format::{read_u32_le, read_u64_le, TableBytes};
use std::ops::Range;

use super::build::{INDEX_HEADER_LEN, INDEX_MAGIC, INDEX_VERSION};
use xxhash_rust::xxh64::xxh64;

#[derive(Debug)]
pub struct LoudsTrie {
    mem: TableBytes,
    num_keys: usize,
    num_states: usize,
    louds: RankBits,
    term: RankBits,
    zbits: RankBits,
    labels: Range<usize>,
    zoffsets: Range<usize>,
    zdata: Range<usize>,
    /// Optional first-byte dispatch over the root's children; a pure
    /// accelerator for `find`.
    root_dispatch: Option<Box<[i64; 256]>>,
}

impl LoudsTrie {
    /// Deserialize a trie view over `mem[range]` without copying the bulk
    /// sections.
    pub fn load(mem: TableBytes, range: Range<usize>) -> Result<Self> {
        if range.len() < INDEX_HEADER_LEN {
            return Err(Error::corruption(format!(
                "index block too small: {} bytes",
                range.len()
            )));
        }
        let base = range.start;
        let header = mem.slice(base..base + INDEX_HEADER_LEN);
        if header[0..4] != INDEX_MAGIC {
            return Err(Error::invalid("index block is not a ZTI1 trie"));
        }
        if header[4] != INDEX_VERSION {
            return Err(Error::invalid(format!(
                "unsupported trie version: {}",
                header[4]
            )));
        }
        let num_keys = read_u64_le(header, 8) as usize;
        let num_states = read_u64_le(header, 16) as usize;
        let num_zpath = read_u64_le(header, 24) as usize;
        let zdata_len = read_u64_le(header, 32) as usize;
        let digest = read_u64_le(header, 40);

        let louds_bits = if num_states > 0 { 2 * num_states + 1 } else { 0 };
        let state_words = num_states.div_ceil(64) * 8;
        let louds_len = louds_bits.div_ceil(64) * 8;
        let labels_len = num_states.saturating_sub(1);
        let zoffsets_len = if num_states > 0 { (num_zpath + 1) * 4 } else { 0 };

        let mut pos = base + INDEX_HEADER_LEN;
        let mut section = |len: usize| -> Range<usize> {
            let r = pos..pos + len;
            pos += len;
            r
        };
        let louds_range = section(louds_len);
        let term_range = section(state_words);
        let zbits_range = section(state_words);
        let labels = section(labels_len);
        let zoffsets = section(zoffsets_len);
        let zdata = section(zdata_len);
        if pos != range.end {
            return Err(Error::corruption(format!(
                "index block length mismatch: expected {}, got {}",
                pos - base,
                range.len()
            )));
        }

        let computed = xxh64(mem.slice(base + INDEX_HEADER_LEN..range.end), 0);
        if computed != digest {
            return Err(Error::corruption(format!(
                "index block digest mismatch: stored {digest:#018x}, computed {computed:#018x}"
            )));
        }

        let louds = RankBits::load(mem.clone(), louds_range, louds_bits)?;
        let term = RankBits::load(mem.clone(), term_range, num_states)?;
        let zbits = RankBits::load(mem.clone(), zbits_range, num_states)?;
        if term.total_ones() != num_keys {
            return Err(Error::corruption(format!(
                "index terminal count {} disagrees with key count {}",
                term.total_ones(),
                num_keys
            )));
        }
        if zbits.total_ones() != num_zpath {
            return Err(Error::corruption("index path-segment count mismatch"));
        }

        Ok(LoudsTrie {
            mem,
            num_keys,
            num_states,
            louds,
            term,
            zbits,
            labels,
            zoffsets,
            zdata,
            root_dispatch: None,
        })
    }

    pub fn num_keys(&self) -> usize {
        self.num_keys
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    // ------------------------------------------------------------------
    // State navigation
    // ------------------------------------------------------------------

    /// Child block of `state`: (first child state, degree).
    #[inline]
    pub(crate) fn children(&self, state: usize) -> (usize, usize) {
        let z0 = self.louds.select0(state);
        let z1 = self.louds.select0(state + 1);
        (z0 - state, z1 - z0 - 1)
    }

    /// Incoming edge label of a non-root state.
    #[inline]
    pub(crate) fn label_of(&self, state: usize) -> u8 {
        debug_assert!(state > 0);
        self.mem.as_slice()[self.labels.start + state - 1]
    }

    #[inline]
    pub(crate) fn is_term(&self, state: usize) -> bool {
        self.term.get(state)
    }

    /// Record id of a terminal state: its rank among terminal states.
    #[inline]
    pub fn key_id(&self, state: usize) -> usize {
        debug_assert!(self.is_term(state));
        self.term.rank1(state)
    }

    /// Path segment entered together with `state` (empty for most states).
    #[inline]
    pub(crate) fn zpath(&self, state: usize) -> &[u8] {
        if !self.zbits.get(state) {
            return &[];
        }
        let zi = self.zbits.rank1(state);
        let bytes = self.mem.as_slice();
        let off0 = read_u32_le(bytes, self.zoffsets.start + zi * 4) as usize;
        let off1 = read_u32_le(bytes, self.zoffsets.start + (zi + 1) * 4) as usize;
        &bytes[self.zdata.start + off0..self.zdata.start + off1]
    }

    /// Child of `state` whose incoming label equals `c`.
    #[inline]
    pub(crate) fn child_by_label(&self, state: usize, c: u8) -> Option<usize> {
        if state == 0 {
            if let Some(dispatch) = &self.root_dispatch {
                let entry = dispatch[c as usize];
                return (entry >= 0).then_some(entry as usize);
            }
        }
        let (first, deg) = self.children(state);
        let labels = &self.mem.as_slice()[self.labels.start + first - 1..][..deg];
        labels.binary_search(&c).ok().map(|i| first + i)
    }

    /// Smallest-labeled child of `state` with label >= `c`, with its label.
    #[inline]
    pub(crate) fn lower_bound_child(&self, state: usize, c: u8) -> Option<(usize, u8)> {
        let (first, deg) = self.children(state);
        if deg == 0 {
            return None;
        }
        let labels = &self.mem.as_slice()[self.labels.start + first - 1..][..deg];
        let i = labels.partition_point(|&l| l < c);
        (i < deg).then(|| (first + i, labels[i]))
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Record id of `key`, or `None` when the trie does not contain it.
    pub fn find(&self, key: &[u8]) -> Option<usize> {
        if self.num_states == 0 {
            return None;
        }
        let mut state = 0usize;
        let mut pos = 0usize;
        loop {
            if pos == key.len() {
                return self.is_term(state).then(|| self.key_id(state));
            }
            let child = self.child_by_label(state, key[pos])?;
            pos += 1;
            let zp = self.zpath(child);
            if !zp.is_empty() {
                if key.len() - pos < zp.len() || &key[pos..pos + zp.len()] != zp {
                    return None;
                }
                pos += zp.len();
            }
            state = child;
        }
    }

    /// Build the root dispatch accelerator. `ratio` <= 0 disables it; any
    /// positive ratio enables it (the table is 2 KiB regardless of trie
    /// size, so there is nothing further to scale).
    pub fn build_cache(&mut self, ratio: f64) {
        if ratio <= 0.0 || self.num_states == 0 {
            return;
        }
        let mut dispatch = Box::new([-1i64; 256]);
        let (first, deg) = self.children(0);
        for i in 0..deg {
            let child = first + i;
            dispatch[self.label_of(child) as usize] = child as i64;
        }
        self.root_dispatch = Some(dispatch);
    }
}
