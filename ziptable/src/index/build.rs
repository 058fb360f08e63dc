//! LOUDS trie construction from a sorted, deduplicated key sequence.
//!
//! Construction runs in two stages: a pointer-form radix tree with unary
//! chains collapsed into per-node path segments, then a breadth-first
//! renumbering that emits the LOUDS bit sequence, edge labels, terminal
//! bits, and path-segment data.
//!
//! ## Serialized layout (all little-endian)
//!
//! ```text
//! magic "ZTI1" (4B) | version u8 | reserved 3B
//! num_keys:   u64
//! num_states: u64
//! num_zpath:  u64      (states carrying a path segment)
//! zdata_len:  u64
//! digest:     u64      (xxh64 of everything after the header)
//! louds bits  ceil((2*num_states + 1) / 64) words
//! term bits   ceil(num_states / 64) words
//! zpath bits  ceil(num_states / 64) words
//! labels      num_states - 1 bytes
//! zoffsets    (num_zpath + 1) x u32
//! zdata       zdata_len bytes
//! ```
//!
//! A trie with zero keys serializes as a bare header with zero counts.

use super::bits::BitVecBuilder;
use std::collections::VecDeque;
use xxhash_rust::xxh64::xxh64;

pub(crate) const INDEX_MAGIC: [u8; 4] = *b"ZTI1";
pub(crate) const INDEX_VERSION: u8 = 1;
pub(crate) const INDEX_HEADER_LEN: usize = 48;

struct TempNode {
    label: u8,
    zpath: Vec<u8>,
    term: bool,
    children: Vec<u32>,
}

/// Build a serialized trie from strictly ascending, distinct keys.
pub fn build_trie(keys: &[&[u8]]) -> Vec<u8> {
    debug_assert!(keys.windows(2).all(|w| w[0] < w[1]), "keys must be sorted and distinct");
    if keys.is_empty() {
        return serialize(&[], 0);
    }

    let mut nodes = vec![TempNode {
        label: 0,
        zpath: Vec::new(),
        term: false,
        children: Vec::new(),
    }];

    // (node, key range, depth); children are created in ascending label order
    // so every `children` list stays sorted.
    let mut work = vec![(0u32, 0usize..keys.len(), 0usize)];
    while let Some((node_idx, range, depth)) = work.pop() {
        let mut start = range.start;
        if keys[start].len() == depth {
            nodes[node_idx as usize].term = true;
            start += 1;
        }
        let mut i = start;
        while i < range.end {
            let label = keys[i][depth];
            let mut j = i + 1;
            while j < range.end && keys[j][depth] == label {
                j += 1;
            }
            // Longest common run from `depth` across the group; because keys
            // are sorted it equals the common prefix of the first and last.
            let lcp = common_prefix_len(&keys[i][depth..], &keys[j - 1][depth..]);
            debug_assert!(lcp >= 1);
            let child = nodes.len() as u32;
            nodes.push(TempNode {
                label,
                zpath: keys[i][depth + 1..depth + lcp].to_vec(),
                term: false,
                children: Vec::new(),
            });
            nodes[node_idx as usize].children.push(child);
            work.push((child, i..j, depth + lcp));
            i = j;
        }
    }

    // Breadth-first renumbering: BFS order is the state order of the
    // serialized form, and the order labels and bits are emitted in.
    let mut bfs_order = Vec::with_capacity(nodes.len());
    let mut queue = VecDeque::new();
    queue.push_back(0u32);
    while let Some(n) = queue.pop_front() {
        bfs_order.push(n);
        for &c in &nodes[n as usize].children {
            queue.push_back(c);
        }
    }
    debug_assert_eq!(bfs_order.len(), nodes.len());

    serialize(&bfs_order.iter().map(|&i| &nodes[i as usize]).collect::<Vec<_>>(), keys.len())
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn serialize(bfs_nodes: &[&TempNode], num_keys: usize) -> Vec<u8> {
    let num_states = bfs_nodes.len();

    let mut louds = BitVecBuilder::new();
    let mut term = BitVecBuilder::new();
    let mut zbits = BitVecBuilder::new();
    let mut labels = Vec::new();
    let mut zoffsets: Vec<u32> = Vec::new();
    let mut zdata = Vec::new();

    if num_states > 0 {
        // super-root
        louds.push(true);
        louds.push(false);
        zoffsets.push(0);
        for node in bfs_nodes {
            for _ in 0..node.children.len() {
                louds.push(true);
            }
            louds.push(false);
            term.push(node.term);
            zbits.push(!node.zpath.is_empty());
            if !node.zpath.is_empty() {
                zdata.extend_from_slice(&node.zpath);
                zoffsets.push(zdata.len() as u32);
            }
        }
        // labels in BFS edge order = BFS order of the nodes they lead to
        for node in bfs_nodes.iter().skip(1) {
            labels.push(node.label);
        }
    }
    let num_zpath = zoffsets.len().saturating_sub(1);

    let mut body = Vec::new();
    body.extend_from_slice(&louds.to_le_bytes());
    body.extend_from_slice(&term.to_le_bytes());
    body.extend_from_slice(&zbits.to_le_bytes());
    body.extend_from_slice(&labels);
    for off in &zoffsets {
        body.extend_from_slice(&off.to_le_bytes());
    }
    body.extend_from_slice(&zdata);

    let mut out = Vec::with_capacity(INDEX_HEADER_LEN + body.len());
    out.extend_from_slice(&INDEX_MAGIC);
    out.push(INDEX_VERSION);
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&(num_keys as u64).to_le_bytes());
    out.extend_from_slice(&(num_states as u64).to_le_bytes());
    out.extend_from_slice(&(num_zpath as u64).to_le_bytes());
    out.extend_from_slice(&(zdata.len() as u64).to_le_bytes());
    out.extend_from_slice(&xxh64(&body, 0).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::TableBytes;
    use crate::index::trie::LoudsTrie;
    use std::sync::Arc;

    fn load(keys: &[&[u8]]) -> LoudsTrie {
        let bytes = build_trie(keys);
        let len = bytes.len();
        LoudsTrie::load(TableBytes::Owned(Arc::new(bytes)), 0..len).unwrap()
    }

    #[test]
    fn test_empty_trie() {
        let trie = load(&[]);
        assert_eq!(trie.num_keys(), 0);
        assert!(trie.find(b"anything").is_none());
        assert!(trie.find(b"").is_none());
    }

    #[test]
    fn test_single_empty_key() {
        let trie = load(&[b""]);
        assert_eq!(trie.num_keys(), 1);
        assert_eq!(trie.find(b""), Some(0));
        assert!(trie.find(b"a").is_none());
    }

    #[test]
    fn test_find_assigns_distinct_ids() {
        let keys: Vec<&[u8]> = vec![b"a", b"ab", b"abc", b"b", b"banana", b"bx"];
        let trie = load(&keys);
        assert_eq!(trie.num_keys(), keys.len());
        let mut ids: Vec<usize> = keys.iter().map(|k| trie.find(k).unwrap()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), keys.len());
    }

    #[test]
    fn test_find_misses() {
        let keys: Vec<&[u8]> = vec![b"apple", b"apply", b"banana"];
        let trie = load(&keys);
        assert!(trie.find(b"app").is_none()); // prefix of a key, not a key
        assert!(trie.find(b"applz").is_none()); // diverges inside path segment
        assert!(trie.find(b"applesauce").is_none()); // longer than any key
        assert!(trie.find(b"c").is_none());
        for k in &keys {
            assert!(trie.find(k).is_some());
        }
    }

    #[test]
    fn test_path_compression_single_long_key() {
        // one long key collapses into a single edge + path segment
        let keys: Vec<&[u8]> = vec![b"supercalifragilistic"];
        let trie = load(&keys);
        assert_eq!(trie.num_states(), 2);
        assert_eq!(trie.find(b"supercalifragilistic"), Some(0));
        assert!(trie.find(b"supercali").is_none());
    }

    #[test]
    fn test_state_order_differs_from_lex_order() {
        // BFS state numbering puts shallow keys first, so key-id order is a
        // genuine permutation of insertion order for nested keys.
        let keys: Vec<&[u8]> = vec![b"a", b"ab", b"b"];
        let trie = load(&keys);
        let ids: Vec<usize> = keys.iter().map(|k| trie.find(k).unwrap()).collect();
        assert_eq!(ids, vec![0, 2, 1]);
    }
}
