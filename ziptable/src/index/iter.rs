//! Bidirectional lexicographic iteration over the LOUDS trie.
//!
//! The iterator keeps the explicit root-to-state path plus the key bytes it
//! spells. When valid it always rests on a terminal state, so `id()` equals
//! `find(key())`. Traversal order is depth-first preorder over terminal
//! states, which is byte-lexicographic order of the key set.

use super::trie::LoudsTrie;

struct Frame {
    state: u32,
    /// Key length before this state's label and path segment were appended;
    /// popping truncates back to it.
    key_len_before: u32,
}

pub struct TrieIter<'a> {
    trie: &'a LoudsTrie,
    path: Vec<Frame>,
    key: Vec<u8>,
    valid: bool,
}

impl<'a> TrieIter<'a> {
    pub fn new(trie: &'a LoudsTrie) -> Self {
        TrieIter {
            trie,
            path: Vec::new(),
            key: Vec::new(),
            valid: false,
        }
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Key spelled by the current position (without any table-level common
    /// prefix).
    pub fn key(&self) -> &[u8] {
        debug_assert!(self.valid);
        &self.key
    }

    /// Record id of the current key.
    pub fn id(&self) -> usize {
        debug_assert!(self.valid);
        self.trie.key_id(self.top())
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    // ------------------------------------------------------------------
    // Positioning
    // ------------------------------------------------------------------

    pub fn seek_first(&mut self) -> bool {
        if !self.reset() {
            return false;
        }
        self.descend_min();
        self.valid = true;
        true
    }

    pub fn seek_last(&mut self) -> bool {
        if !self.reset() {
            return false;
        }
        self.descend_max();
        self.valid = true;
        true
    }

    /// Position on the smallest key >= `key`; false when no such key exists.
    pub fn seek(&mut self, key: &[u8]) -> bool {
        if !self.reset() {
            return false;
        }
        self.valid = true;
        let trie = self.trie;
        let mut pos = 0usize;
        loop {
            if pos == key.len() {
                self.descend_min();
                return true;
            }
            let Some((child, label)) = trie.lower_bound_child(self.top(), key[pos]) else {
                return self.advance_up();
            };
            self.push_state(child);
            if label > key[pos] {
                self.descend_min();
                return true;
            }
            pos += 1;
            let zp = trie.zpath(child);
            for &zb in zp {
                if pos == key.len() || zb > key[pos] {
                    // the current state's key already exceeds (or extends)
                    // the target, so its subtree minimum is the answer
                    self.descend_min();
                    return true;
                }
                if zb < key[pos] {
                    return self.advance_up();
                }
                pos += 1;
            }
        }
    }

    /// Move to the next key in lexicographic order.
    pub fn next(&mut self) -> bool {
        debug_assert!(self.valid);
        let (first, deg) = self.trie.children(self.top());
        if deg > 0 {
            self.push_state(first);
            self.descend_min();
            return true;
        }
        self.advance_up()
    }

    /// Move to the previous key in lexicographic order.
    pub fn prev(&mut self) -> bool {
        debug_assert!(self.valid);
        loop {
            if self.path.len() == 1 {
                self.valid = false;
                return false;
            }
            let t = self.top();
            let parent = self.path[self.path.len() - 2].state as usize;
            let (first, _) = self.trie.children(parent);
            let idx = t - first;
            self.pop_state();
            if idx > 0 {
                self.push_state(first + idx - 1);
                self.descend_max();
                return true;
            }
            if self.trie.is_term(parent) {
                return true;
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn top(&self) -> usize {
        self.path.last().unwrap().state as usize
    }

    fn reset(&mut self) -> bool {
        self.path.clear();
        self.key.clear();
        self.valid = false;
        if self.trie.num_states() == 0 {
            return false;
        }
        self.path.push(Frame {
            state: 0,
            key_len_before: 0,
        });
        true
    }

    fn push_state(&mut self, state: usize) {
        let trie = self.trie;
        self.path.push(Frame {
            state: state as u32,
            key_len_before: self.key.len() as u32,
        });
        self.key.push(trie.label_of(state));
        self.key.extend_from_slice(trie.zpath(state));
    }

    fn pop_state(&mut self) {
        let frame = self.path.pop().unwrap();
        self.key.truncate(frame.key_len_before as usize);
    }

    /// Descend to the smallest terminal at or below the current state.
    fn descend_min(&mut self) {
        loop {
            if self.trie.is_term(self.top()) {
                return;
            }
            let (first, deg) = self.trie.children(self.top());
            debug_assert!(deg > 0, "non-terminal leaf state");
            self.push_state(first);
        }
    }

    /// Descend to the largest terminal below the current state (the deepest
    /// last-child path; its end is always terminal).
    fn descend_max(&mut self) {
        loop {
            let (first, deg) = self.trie.children(self.top());
            if deg == 0 {
                debug_assert!(self.trie.is_term(self.top()));
                return;
            }
            self.push_state(first + deg - 1);
        }
    }

    /// Climb until a following sibling exists, then take its subtree
    /// minimum. Invalidates when the current position was the last key.
    fn advance_up(&mut self) -> bool {
        loop {
            if self.path.len() == 1 {
                self.valid = false;
                return false;
            }
            let t = self.top();
            let parent = self.path[self.path.len() - 2].state as usize;
            let (first, deg) = self.trie.children(parent);
            let idx = t - first;
            self.pop_state();
            if idx + 1 < deg {
                self.push_state(first + idx + 1);
                self.descend_min();
                return true;
            }
        }
    }
}

impl LoudsTrie {
    /// Enumerate keys in byte-lexicographic order as
    /// `(byte_lex_nth, record_id)` pairs. This is the enumeration the build
    /// pipeline hands to the value store's reorder pass.
    pub fn for_each_key<F: FnMut(usize, usize)>(&self, mut f: F) {
        let mut it = TrieIter::new(self);
        let mut nth = 0usize;
        let mut ok = it.seek_first();
        while ok {
            f(nth, it.id());
            nth += 1;
            ok = it.next();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::TableBytes;
    use crate::index::build::build_trie;
    use std::sync::Arc;

    fn load(keys: &[&[u8]]) -> LoudsTrie {
        let bytes = build_trie(keys);
        let len = bytes.len();
        LoudsTrie::load(TableBytes::Owned(Arc::new(bytes)), 0..len).unwrap()
    }

    const KEYS: &[&[u8]] = &[
        b"", b"a", b"ab", b"abc", b"abd", b"b", b"bcd", b"bce", b"xyzzy",
    ];

    #[test]
    fn test_forward_iteration_is_sorted() {
        let trie = load(KEYS);
        let mut it = TrieIter::new(&trie);
        let mut seen = Vec::new();
        let mut ok = it.seek_first();
        while ok {
            seen.push(it.key().to_vec());
            assert_eq!(trie.find(it.key()), Some(it.id()));
            ok = it.next();
        }
        let expected: Vec<Vec<u8>> = KEYS.iter().map(|k| k.to_vec()).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_backward_iteration_is_reverse_sorted() {
        let trie = load(KEYS);
        let mut it = TrieIter::new(&trie);
        let mut seen = Vec::new();
        let mut ok = it.seek_last();
        while ok {
            seen.push(it.key().to_vec());
            ok = it.prev();
        }
        let mut expected: Vec<Vec<u8>> = KEYS.iter().map(|k| k.to_vec()).collect();
        expected.reverse();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_seek_lower_bound() {
        let trie = load(KEYS);
        let mut it = TrieIter::new(&trie);
        let cases: &[(&[u8], Option<&[u8]>)] = &[
            (b"", Some(b"")),
            (b"a", Some(b"a")),
            (b"aa", Some(b"ab")),
            (b"abca", Some(b"abd")),
            (b"abd", Some(b"abd")),
            (b"abdz", Some(b"b")),
            (b"bcf", Some(b"xyzzy")),
            (b"xyzzy", Some(b"xyzzy")),
            (b"xyzzz", None),
            (b"zzzz", None),
        ];
        for (target, expect) in cases {
            let ok = it.seek(target);
            match expect {
                Some(k) => {
                    assert!(ok, "seek({:?}) should land", target);
                    assert_eq!(it.key(), *k, "seek({:?})", target);
                }
                None => assert!(!ok, "seek({:?}) should invalidate", target),
            }
        }
    }

    #[test]
    fn test_seek_then_walk_both_ways() {
        let trie = load(KEYS);
        let mut it = TrieIter::new(&trie);
        assert!(it.seek(b"b"));
        assert_eq!(it.key(), b"b");
        assert!(it.prev());
        assert_eq!(it.key(), b"abd");
        assert!(it.next());
        assert_eq!(it.key(), b"b");
        assert!(it.next());
        assert_eq!(it.key(), b"bcd");
    }

    #[test]
    fn test_single_key_trie() {
        let trie = load(&[b"only"]);
        let mut it = TrieIter::new(&trie);
        assert!(it.seek_first());
        assert_eq!(it.key(), b"only");
        assert!(!it.next());
        assert!(it.seek_last());
        assert_eq!(it.key(), b"only");
        assert!(!it.prev());
    }

    #[test]
    fn test_for_each_key_is_a_permutation() {
        let trie = load(KEYS);
        let mut pairs = Vec::new();
        trie.for_each_key(|nth, id| pairs.push((nth, id)));
        assert_eq!(pairs.len(), KEYS.len());
        let mut ids: Vec<usize> = pairs.iter().map(|&(_, id)| id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..KEYS.len()).collect::<Vec<_>>());
    }
}
