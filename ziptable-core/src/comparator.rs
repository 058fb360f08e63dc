//! User-key comparators recognized by the table format.
//!
//! | Name | Order |
//! |------|-------|
//! | `leveldb.BytewiseComparator` | forward byte-lexicographic |
//! | `rev:...` (any name with the prefix) | reverse byte-lexicographic |
//! | `rocksdb.Uint64Comparator` | 8-byte host-endian unsigned integer |
//!
//! The succinct-trie index always stores keys in forward byte-lex order. The
//! uint64 comparator is bridged onto that order by swapping keys into
//! big-endian "index space" on the way in and back out on the way out; on a
//! big-endian host the swap is the identity.

use crate::internal_key::{parse_internal_key, INTERNAL_KEY_SUFFIX_LEN};
use std::cmp::Ordering;

/// Canonical name of the forward bytewise comparator.
pub const BYTEWISE_NAME: &str = "leveldb.BytewiseComparator";

/// Name prefix marking reverse-bytewise comparators.
pub const REVERSE_PREFIX: &str = "rev:";

/// Canonical name of the fixed-width uint64 comparator.
pub const UINT64_NAME: &str = "rocksdb.Uint64Comparator";

/// The three orderings the format supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparatorKind {
    Bytewise,
    ReverseBytewise,
    Uint64,
}

/// A recognized user-key comparator: its kind plus the exact name that is
/// written to (and validated against) the table's property block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparator {
    kind: ComparatorKind,
    name: String,
}

impl Comparator {
    /// The forward bytewise comparator.
    pub fn bytewise() -> Self {
        Comparator {
            kind: ComparatorKind::Bytewise,
            name: BYTEWISE_NAME.to_string(),
        }
    }

    /// A reverse-bytewise comparator under its full `rev:`-prefixed name.
    pub fn reverse_bytewise(name: &str) -> Self {
        debug_assert!(name.starts_with(REVERSE_PREFIX));
        Comparator {
            kind: ComparatorKind::ReverseBytewise,
            name: name.to_string(),
        }
    }

    /// The fixed 8-byte uint64 comparator.
    pub fn uint64() -> Self {
        Comparator {
            kind: ComparatorKind::Uint64,
            name: UINT64_NAME.to_string(),
        }
    }

    /// Resolve a comparator by name. Returns `None` for unsupported names.
    pub fn from_name(name: &str) -> Option<Self> {
        if name == BYTEWISE_NAME {
            Some(Self::bytewise())
        } else if name.starts_with(REVERSE_PREFIX) {
            Some(Self::reverse_bytewise(name))
        } else if name == UINT64_NAME {
            Some(Self::uint64())
        } else {
            None
        }
    }

    pub fn kind(&self) -> ComparatorKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compare two user keys under this comparator's order.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self.kind {
            ComparatorKind::Bytewise => a.cmp(b),
            ComparatorKind::ReverseBytewise => b.cmp(a),
            ComparatorKind::Uint64 => {
                debug_assert!(a.len() == 8 && b.len() == 8, "uint64 keys must be 8 bytes");
                if a.len() != 8 || b.len() != 8 {
                    return a.cmp(b);
                }
                let av = u64::from_ne_bytes(a.try_into().unwrap());
                let bv = u64::from_ne_bytes(b.try_into().unwrap());
                av.cmp(&bv)
            }
        }
    }

    /// Compare two internal keys: user key under this comparator, then packed
    /// `(sequence, type)` trailer descending (newer versions sort first).
    ///
    /// Keys that fail to parse sort after well-formed keys.
    pub fn compare_internal(&self, a: &[u8], b: &[u8]) -> Ordering {
        let (pa, pb) = match (parse_internal_key(a), parse_internal_key(b)) {
            (Ok(pa), Ok(pb)) => (pa, pb),
            (Ok(_), Err(_)) => return Ordering::Less,
            (Err(_), Ok(_)) => return Ordering::Greater,
            (Err(_), Err(_)) => return a.cmp(b),
        };
        self.compare(pa.user_key, pb.user_key).then_with(|| {
            let ta = u64::from_le_bytes(a[a.len() - INTERNAL_KEY_SUFFIX_LEN..].try_into().unwrap());
            let tb = u64::from_le_bytes(b[b.len() - INTERNAL_KEY_SUFFIX_LEN..].try_into().unwrap());
            tb.cmp(&ta)
        })
    }

    /// True when user keys must be transformed before they enter the byte-lex
    /// index (only the uint64 comparator needs this).
    pub fn needs_index_transform(&self) -> bool {
        self.kind == ComparatorKind::Uint64
    }
}

/// Swap an 8-byte uint64 user key from comparator space into the big-endian
/// form the index stores. Identity on big-endian hosts.
#[inline]
pub fn uint64_key_to_index(key: &[u8; 8]) -> [u8; 8] {
    u64::from_ne_bytes(*key).to_be_bytes()
}

/// Inverse of [`uint64_key_to_index`].
#[inline]
pub fn uint64_key_from_index(key: &[u8; 8]) -> [u8; 8] {
    u64::from_be_bytes(*key).to_ne_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal_key::{append_internal_key, EntryType};

    #[test]
    fn test_from_name() {
        assert_eq!(
            Comparator::from_name("leveldb.BytewiseComparator").unwrap().kind(),
            ComparatorKind::Bytewise
        );
        let rev = Comparator::from_name("rev:leveldb.BytewiseComparator").unwrap();
        assert_eq!(rev.kind(), ComparatorKind::ReverseBytewise);
        assert_eq!(rev.name(), "rev:leveldb.BytewiseComparator");
        assert_eq!(
            Comparator::from_name("rocksdb.Uint64Comparator").unwrap().kind(),
            ComparatorKind::Uint64
        );
        assert!(Comparator::from_name("something.Else").is_none());
    }

    #[test]
    fn test_bytewise_and_reverse() {
        let fwd = Comparator::bytewise();
        let rev = Comparator::reverse_bytewise("rev:leveldb.BytewiseComparator");
        assert_eq!(fwd.compare(b"a", b"b"), Ordering::Less);
        assert_eq!(rev.compare(b"a", b"b"), Ordering::Greater);
        assert_eq!(rev.compare(b"x", b"x"), Ordering::Equal);
    }

    #[test]
    fn test_uint64_numeric_order() {
        let cmp = Comparator::uint64();
        let a = 255u64.to_ne_bytes();
        let b = 256u64.to_ne_bytes();
        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
        assert_eq!(cmp.compare(&b, &a), Ordering::Greater);
    }

    #[test]
    fn test_uint64_index_transform_preserves_order() {
        let mut values: Vec<u64> = vec![1, 255, 256, 257, u64::MAX, 0];
        values.sort_unstable();
        let index_keys: Vec<[u8; 8]> =
            values.iter().map(|v| uint64_key_to_index(&v.to_ne_bytes())).collect();
        let mut sorted = index_keys.clone();
        sorted.sort_unstable();
        assert_eq!(index_keys, sorted);
        for (v, ik) in values.iter().zip(&index_keys) {
            assert_eq!(u64::from_ne_bytes(uint64_key_from_index(ik)), *v);
        }
    }

    #[test]
    fn test_internal_key_order_seq_descending() {
        let cmp = Comparator::bytewise();
        let mut newer = Vec::new();
        append_internal_key(&mut newer, b"k", 9, EntryType::Value);
        let mut older = Vec::new();
        append_internal_key(&mut older, b"k", 3, EntryType::Value);
        assert_eq!(cmp.compare_internal(&newer, &older), Ordering::Less);
        let mut other = Vec::new();
        append_internal_key(&mut other, b"l", 1, EntryType::Value);
        assert_eq!(cmp.compare_internal(&newer, &other), Ordering::Less);
    }
}
